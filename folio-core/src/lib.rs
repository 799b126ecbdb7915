//! Navigation and view generation for paged books.
//!
//! A [`Book`] owns an ordered page list and turns navigation intents into
//! frames: the one or two page parts that should be on screen, plus a stream
//! of decoded frames further along the reading direction.

pub mod book;
pub mod collection;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod frame;
pub mod generator;
pub mod marker;
pub mod page;
pub mod position;
pub mod range;
pub mod readahead;
pub mod services;
pub mod viewer;

pub use book::{book_id_for_path, Book, BookId};
pub use collection::{natural_cmp, PageCollection, PageSortMode};
pub use command::{BookCommand, CommandKind, CommandOutcome};
pub use config::{BookConfig, PageMode, ReadOrder};
pub use engine::{CommandEngine, CommandHandler, CommandTicket};
pub use error::{BookError, BookResult};
pub use event::{BookEvent, BookEventReceiver, BookEventSender, SenderId};
pub use frame::{Frame, FrameComposer, FrameContent, FrameLayout, FramePart};
pub use generator::{FrameGenerator, FrameSink, GeneratorHandle};
pub use marker::PageMarkers;
pub use page::{Page, PageImage, PageKind, PageState};
pub use position::{PageDirection, PagePosition};
pub use range::PageRange;
pub use readahead::ReadaheadOrderer;
pub use services::{
    wait_for_pages, DecodePriority, DecodeScheduler, MemoryService, PageLoadedSender,
    PageSupplier, UnboundedMemory, WaitOutcome,
};
pub use viewer::BookViewer;
