use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::collection::PageSortMode;
use crate::frame::Frame;
use crate::page::Page;
use crate::position::PageDirection;

/// Who asked for a navigation. Carried through to the events it causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId(pub &'static str);

impl SenderId {
    pub const USER: SenderId = SenderId("user");
    pub const BOOK: SenderId = SenderId("book");
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, Clone)]
pub enum BookEvent {
    /// The primary frame of a navigation. Once per epoch.
    ViewContentsChanged { sender: SenderId, frame: Frame },
    /// A decoded frame of the epoch, in reading order from the view frame on.
    NextContentsChanged {
        sender: SenderId,
        frame: Frame,
        token: CancellationToken,
    },
    /// Navigation ran past an end of the book.
    PageTerminated {
        sender: SenderId,
        direction: PageDirection,
    },
    PagesSorted { mode: PageSortMode },
    PagesRemoved { pages: Vec<Arc<Page>> },
}

pub type BookEventSender = mpsc::UnboundedSender<BookEvent>;
pub type BookEventReceiver = mpsc::UnboundedReceiver<BookEvent>;
