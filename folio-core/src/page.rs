use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageKind {
    Image,
    Media,
    Pdf,
    Folder,
    Archive,
    Empty,
}

impl PageKind {
    /// Folder-like pages always display alone and sort as a group.
    pub fn is_container(self) -> bool {
        matches!(self, PageKind::Folder | PageKind::Archive)
    }

    pub fn is_media(self) -> bool {
        self == PageKind::Media
    }
}

/// Retention hint read by the decode scheduler and memory service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PageState {
    None = 0,
    Ahead = 1,
    View = 2,
}

impl PageState {
    fn from_u8(value: u8) -> Self {
        match value {
            2 => PageState::View,
            1 => PageState::Ahead,
            _ => PageState::None,
        }
    }
}

#[derive(Clone)]
pub struct PageImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl PageImage {
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// One page of a book. Shared between the collection, frames, the decode
/// scheduler and the readahead orderer, so every mutable field is atomic or
/// behind its own lock.
pub struct Page {
    index: AtomicUsize,
    entry_name: String,
    entry_order: usize,
    kind: PageKind,
    width: f64,
    height: f64,
    last_modified: Option<SystemTime>,
    length: u64,
    state: AtomicU8,
    marked: AtomicBool,
    loaded: AtomicBool,
    content: Mutex<Option<Arc<PageImage>>>,
    loaded_notify: Notify,
}

impl Page {
    pub fn new(entry_name: impl Into<String>, kind: PageKind, width: f64, height: f64) -> Self {
        Self {
            index: AtomicUsize::new(0),
            entry_name: entry_name.into(),
            entry_order: 0,
            kind,
            width,
            height,
            last_modified: None,
            length: 0,
            state: AtomicU8::new(PageState::None as u8),
            marked: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            content: Mutex::new(None),
            loaded_notify: Notify::new(),
        }
    }

    pub fn with_entry_order(mut self, entry_order: usize) -> Self {
        self.entry_order = entry_order;
        self
    }

    pub fn with_last_modified(mut self, last_modified: SystemTime) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = length;
        self
    }

    pub fn index(&self) -> usize {
        self.index.load(Ordering::Acquire)
    }

    pub(crate) fn set_index(&self, index: usize) {
        self.index.store(index, Ordering::Release);
    }

    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    /// Last component of the entry name.
    pub fn name(&self) -> &str {
        self.entry_name
            .rsplit(|c| c == '/' || c == '\\')
            .find(|part| !part.is_empty())
            .unwrap_or(&self.entry_name)
    }

    pub fn entry_order(&self) -> usize {
        self.entry_order
    }

    pub fn kind(&self) -> PageKind {
        self.kind
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn is_wide(&self, wide_ratio: f64) -> bool {
        self.width > self.height * wide_ratio
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        self.last_modified
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn state(&self) -> PageState {
        PageState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: PageState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Raises the retention state to at least `state`.
    pub fn raise_state(&self, state: PageState) {
        self.state.fetch_max(state as u8, Ordering::AcqRel);
    }

    pub fn is_marked(&self) -> bool {
        self.marked.load(Ordering::Acquire)
    }

    pub(crate) fn set_marked(&self, marked: bool) {
        self.marked.store(marked, Ordering::Release);
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn content(&self) -> Option<Arc<PageImage>> {
        self.content.lock().clone()
    }

    pub fn set_content(&self, image: PageImage) {
        *self.content.lock() = Some(Arc::new(image));
        self.mark_loaded();
    }

    /// Marks the page loaded without pixel content (folders, empty pages).
    pub fn mark_loaded(&self) {
        self.loaded.store(true, Ordering::Release);
        self.loaded_notify.notify_waiters();
    }

    /// Drops decoded content. Returns the number of bytes released.
    pub fn unload(&self) -> usize {
        self.loaded.store(false, Ordering::Release);
        self.content
            .lock()
            .take()
            .map(|image| image.byte_len())
            .unwrap_or(0)
    }

    pub async fn wait_loaded(&self) {
        loop {
            let notified = self.loaded_notify.notified();
            if self.is_loaded() {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("index", &self.index())
            .field("entry_name", &self.entry_name)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

pub(crate) fn contains_page(pages: &[Arc<Page>], page: &Arc<Page>) -> bool {
    pages.iter().any(|candidate| Arc::ptr_eq(candidate, page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn name_is_last_entry_component() {
        let page = Page::new("comics/vol1/001.png", PageKind::Image, 10.0, 20.0);
        assert_eq!(page.name(), "001.png");
        let page = Page::new("C:\\scans\\002.jpg", PageKind::Image, 10.0, 20.0);
        assert_eq!(page.name(), "002.jpg");
        let page = Page::new("chapter/", PageKind::Folder, 0.0, 0.0);
        assert_eq!(page.name(), "chapter");
    }

    #[test]
    fn raise_state_never_demotes() {
        let page = Page::new("a.png", PageKind::Image, 1.0, 1.0);
        page.raise_state(PageState::Ahead);
        assert_eq!(page.state(), PageState::Ahead);
        page.set_state(PageState::View);
        page.raise_state(PageState::Ahead);
        assert_eq!(page.state(), PageState::View);
        page.set_state(PageState::None);
        assert_eq!(page.state(), PageState::None);
    }

    #[test]
    fn wide_uses_ratio() {
        let page = Page::new("a.png", PageKind::Image, 300.0, 200.0);
        assert!(page.is_wide(1.0));
        assert!(!page.is_wide(1.5));
    }

    #[test]
    fn unload_reports_released_bytes() {
        let page = Page::new("a.png", PageKind::Image, 1.0, 1.0);
        page.set_content(PageImage {
            width: 1,
            height: 1,
            pixels: vec![0; 4],
        });
        assert!(page.is_loaded());
        assert_eq!(page.unload(), 4);
        assert!(!page.is_loaded());
        assert!(page.content().is_none());
    }

    #[tokio::test]
    async fn wait_loaded_wakes_on_load() {
        let page = Arc::new(Page::new("a.png", PageKind::Image, 1.0, 1.0));
        let waiter = {
            let page = Arc::clone(&page);
            tokio::spawn(async move { page.wait_loaded().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        page.mark_loaded();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
