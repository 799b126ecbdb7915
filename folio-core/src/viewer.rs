//! Turns navigation requests into frames.
//!
//! [`BookViewer::update_view_page`] is the only entry point that moves the
//! view. It is always called from the command engine, so two navigations
//! never overlap; the generator it starts keeps running after it returns.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::collection::{PageCollection, PageSortMode};
use crate::config::BookConfig;
use crate::error::{BookError, BookResult};
use crate::event::{BookEvent, BookEventSender, SenderId};
use crate::frame::{Frame, FrameComposer, FrameLayout};
use crate::generator::{FrameGenerator, FrameSink, GeneratorHandle};
use crate::page::{contains_page, Page, PageState};
use crate::position::{PageDirection, PagePosition};
use crate::range::PageRange;
use crate::readahead::ReadaheadOrderer;
use crate::services::{DecodePriority, DecodeScheduler, MemoryService};

#[derive(Default)]
struct ViewState {
    epoch: u64,
    frame: Option<Frame>,
    display_index: Option<usize>,
    requested: Option<PageRange>,
}

/// Forwards one epoch's frames to the event channel, dropping them once a
/// newer epoch has started.
struct EpochSink {
    epoch: u64,
    sender: SenderId,
    view: Arc<Mutex<ViewState>>,
    events: BookEventSender,
}

impl FrameSink for EpochSink {
    fn view_changed(&self, frame: Frame) {
        let mut view = self.view.lock();
        if view.epoch != self.epoch {
            return;
        }
        view.display_index = frame.first_index();
        view.frame = Some(frame.clone());
        let _ = self.events.send(BookEvent::ViewContentsChanged {
            sender: self.sender,
            frame,
        });
    }

    fn next_changed(&self, frame: Frame, token: CancellationToken) {
        let mut view = self.view.lock();
        if view.epoch != self.epoch || token.is_cancelled() {
            return;
        }
        // a view frame forced before decode finished gets its decoded twin
        if view
            .frame
            .as_ref()
            .is_some_and(|current| current.range() == frame.range())
        {
            view.frame = Some(frame.clone());
        }
        let _ = self.events.send(BookEvent::NextContentsChanged {
            sender: self.sender,
            frame,
            token,
        });
    }
}

pub struct BookViewer {
    pages: RwLock<PageCollection>,
    config: RwLock<BookConfig>,
    decoder: Arc<dyn DecodeScheduler>,
    memory: Arc<dyn MemoryService>,
    readahead: ReadaheadOrderer,
    events: BookEventSender,
    view: Arc<Mutex<ViewState>>,
    generator: Mutex<Option<FrameGenerator>>,
    retained: Mutex<Vec<Arc<Page>>>,
    page_change_count: AtomicUsize,
    page_terminated: AtomicBool,
    disposed: AtomicBool,
}

impl BookViewer {
    pub fn new(
        pages: Vec<Page>,
        config: BookConfig,
        decoder: Arc<dyn DecodeScheduler>,
        memory: Arc<dyn MemoryService>,
        events: BookEventSender,
    ) -> Self {
        let pages = PageCollection::new(pages, config.sort_mode, config.folders_first);
        let readahead = ReadaheadOrderer::new(Arc::clone(&decoder), Arc::clone(&memory));
        Self {
            pages: RwLock::new(pages),
            config: RwLock::new(config),
            decoder,
            memory,
            readahead,
            events,
            view: Arc::new(Mutex::new(ViewState::default())),
            generator: Mutex::new(None),
            retained: Mutex::new(Vec::new()),
            page_change_count: AtomicUsize::new(0),
            page_terminated: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Moves the view to `range`.
    ///
    /// Returns once the view pages are decoded or the wait timed out, with
    /// the view frame emitted either way. Frames beyond the view keep
    /// arriving from the generator afterwards.
    #[instrument(skip_all, fields(sender = %sender, range = %range))]
    pub async fn update_view_page(
        &self,
        sender: SenderId,
        range: PageRange,
        token: CancellationToken,
    ) -> BookResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(BookError::Disposed);
        }
        let config = self.config.read().clone();
        let (pages, first, last) = {
            let collection = self.pages.read();
            (
                collection.snapshot(),
                collection.first_position(),
                collection.last_position(),
            )
        };

        if range.position() < first {
            self.terminate(sender, PageDirection::Backward);
            return Ok(());
        }
        if range.position() > last {
            self.terminate(sender, PageDirection::Forward);
            return Ok(());
        }

        if pages.is_empty() {
            self.show_empty(sender, range);
            return Ok(());
        }

        let frame_size = config.frame_size();
        let range = range.with_part_size(frame_size * 2);
        let view_pages = view_pages(&pages, range, frame_size);

        let ahead_range = (config.prefetch_size > 0).then(|| {
            PageRange::whole_pages(range.next().index(), config.prefetch_size, range.direction())
        });
        let ahead_pages: Vec<Arc<Page>> = ahead_range
            .map(|ahead| pages_in_range(&pages, ahead))
            .unwrap_or_default()
            .into_iter()
            .filter(|page| !contains_page(&view_pages, page))
            .collect();

        self.update_retention(&view_pages, &ahead_pages);

        self.page_change_count.fetch_add(1, Ordering::AcqRel);
        self.page_terminated
            .store(range.max() >= last, Ordering::Release);

        let generator = self.start_epoch(sender, pages, &config, range, ahead_range);

        if let Some(page) = view_pages.first() {
            self.memory.set_reference(page.index());
        }
        self.decoder.order(&view_pages, DecodePriority::View);
        self.readahead.order(ahead_pages);

        let outcome = {
            let wait_token = token.child_token();
            let _stop_wait = wait_token.clone().drop_guard();
            self.decoder
                .wait(&view_pages, config.wait_timeout(), wait_token)
                .await
        };
        trace!(?outcome, "view pages wait finished");

        if token.is_cancelled() {
            return Err(BookError::Canceled);
        }

        generator.force_materialize_view(&token).await?;
        generator.signal();
        Ok(())
    }

    fn terminate(&self, sender: SenderId, direction: PageDirection) {
        debug!(%direction, "navigation ran past the end of the book");
        let _ = self
            .events
            .send(BookEvent::PageTerminated { sender, direction });
    }

    fn show_empty(&self, sender: SenderId, range: PageRange) {
        self.stop_generator();
        let frame = Frame::empty(range);
        let mut view = self.view.lock();
        view.epoch += 1;
        view.frame = Some(frame.clone());
        view.display_index = None;
        view.requested = Some(range);
        let _ = self
            .events
            .send(BookEvent::ViewContentsChanged { sender, frame });
    }

    fn update_retention(&self, view_pages: &[Arc<Page>], ahead_pages: &[Arc<Page>]) {
        let mut retained = self.retained.lock();
        for page in retained.iter() {
            if !contains_page(view_pages, page) {
                page.set_state(PageState::None);
            }
        }
        for page in view_pages {
            page.set_state(PageState::View);
        }
        *retained = view_pages.iter().chain(ahead_pages).cloned().collect();
    }

    fn start_epoch(
        &self,
        sender: SenderId,
        pages: Arc<[Arc<Page>]>,
        config: &BookConfig,
        view_range: PageRange,
        ahead_range: Option<PageRange>,
    ) -> GeneratorHandle {
        let mut slot = self.generator.lock();
        if let Some(previous) = slot.take() {
            previous.cancel();
        }
        let epoch = {
            let mut view = self.view.lock();
            view.epoch += 1;
            view.requested = Some(view_range);
            view.epoch
        };
        debug!(epoch, "starting frame epoch");
        let sink = Arc::new(EpochSink {
            epoch,
            sender,
            view: Arc::clone(&self.view),
            events: self.events.clone(),
        });
        let composer = FrameComposer::new(pages, FrameLayout::from(config));
        let generator = FrameGenerator::spawn(composer, view_range, ahead_range, sink);
        let handle = generator.handle();
        *slot = Some(generator);
        handle
    }

    /// Silences the running epoch before the page list changes under it.
    fn end_epoch(&self) {
        self.stop_generator();
        self.view.lock().epoch += 1;
    }

    fn stop_generator(&self) {
        if let Some(generator) = self.generator.lock().take() {
            generator.cancel();
        }
    }

    /// Routes a decoded page to readahead and the running epoch.
    pub fn on_page_loaded(&self, page: &Arc<Page>) {
        self.readahead.on_page_loaded(page);
        // decoders release memory before reporting the page
        self.readahead.resume();
        if let Some(generator) = self.generator.lock().as_ref() {
            generator.signal();
        }
    }

    /// Target range for a relative move from the current view.
    pub fn move_target(&self, delta: isize) -> PageRange {
        let frame_size = self.config.read().frame_size();
        let current = self.current_range().unwrap_or_else(|| {
            PageRange::new(PagePosition::ZERO, PageDirection::Forward, frame_size * 2)
        });
        PageRange::at(
            current.move_by(delta, frame_size),
            PageDirection::from_delta(delta),
        )
    }

    /// Range of the displayed frame, else the last requested one.
    pub fn current_range(&self) -> Option<PageRange> {
        let view = self.view.lock();
        view.frame
            .as_ref()
            .filter(|frame| !frame.is_empty())
            .map(Frame::range)
            .or(view.requested)
    }

    /// Shows the current position again, following `anchor` if it moved.
    pub async fn refresh(
        &self,
        sender: SenderId,
        anchor: Option<Arc<Page>>,
        token: CancellationToken,
    ) -> BookResult<()> {
        let current = self
            .current_range()
            .unwrap_or_else(|| PageRange::at(PagePosition::ZERO, PageDirection::Forward));
        let (position, count) = {
            let pages = self.pages.read();
            let position = match anchor {
                Some(page) if contains_page(&pages.snapshot(), &page) => {
                    PagePosition::new(page.index() as isize, current.position().part())
                }
                _ => current.position(),
            };
            (pages.clamp_position(position), pages.len())
        };
        debug!(%position, count, "refreshing view");
        self.update_view_page(sender, PageRange::at(position, current.direction()), token)
            .await
    }

    /// Page the current view starts from, used to keep the reader in place
    /// across sorts.
    pub fn anchor_page(&self) -> Option<Arc<Page>> {
        let position = self.current_range()?.position();
        let index = position.page_index()?;
        self.pages.read().get(index).cloned()
    }

    pub fn sort_pages(&self, mode: PageSortMode) {
        self.end_epoch();
        self.pages.write().sort(mode);
        let _ = self.events.send(BookEvent::PagesSorted { mode });
    }

    /// Removes pages and returns the ones that were part of the book.
    pub fn remove_pages(&self, pages: &[Arc<Page>]) -> Vec<Arc<Page>> {
        let current = self.pages.read().snapshot();
        if !pages.iter().any(|page| contains_page(&current, page)) {
            return Vec::new();
        }
        self.end_epoch();
        self.readahead.clear();
        let removed = self.pages.write().remove(pages);
        self.retained
            .lock()
            .retain(|page| !contains_page(&removed, page));
        for page in &removed {
            page.set_state(PageState::None);
        }
        let _ = self.events.send(BookEvent::PagesRemoved {
            pages: removed.clone(),
        });
        removed
    }

    /// Stops background work and releases every retained page.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_generator();
        self.readahead.clear();
        for page in self.retained.lock().drain(..) {
            page.set_state(PageState::None);
        }
        self.view.lock().epoch += 1;
        debug!("viewer disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn current_frame(&self) -> Option<Frame> {
        self.view.lock().frame.clone()
    }

    pub fn display_index(&self) -> Option<usize> {
        self.view.lock().display_index
    }

    pub fn page_change_count(&self) -> usize {
        self.page_change_count.load(Ordering::Acquire)
    }

    /// True once the view reached the last page.
    pub fn is_page_terminated(&self) -> bool {
        self.page_terminated.load(Ordering::Acquire)
    }

    pub fn pages(&self) -> Arc<[Arc<Page>]> {
        self.pages.read().snapshot()
    }

    pub fn page_count(&self) -> usize {
        self.pages.read().len()
    }

    pub fn sort_mode(&self) -> PageSortMode {
        self.pages.read().sort_mode()
    }

    pub fn config(&self) -> BookConfig {
        self.config.read().clone()
    }

    pub fn set_config(&self, config: BookConfig) {
        *self.config.write() = config;
    }

    pub fn retained_pages(&self) -> Vec<Arc<Page>> {
        self.retained.lock().clone()
    }
}

impl Drop for BookViewer {
    fn drop(&mut self) {
        self.stop_generator();
    }
}

/// `frame_size` pages from the range start along its direction, clamped to
/// the book and without repeats.
fn view_pages(pages: &[Arc<Page>], range: PageRange, frame_size: usize) -> Vec<Arc<Page>> {
    let last = pages.len() as isize - 1;
    let start = range.position().index();
    let sign = range.direction().sign();
    let mut result: Vec<Arc<Page>> = Vec::with_capacity(frame_size);
    for step in 0..frame_size as isize {
        let index = (start + step * sign).clamp(0, last) as usize;
        let page = &pages[index];
        if !contains_page(&result, page) {
            result.push(Arc::clone(page));
        }
    }
    result
}

/// In-book pages covered by `range`, nearest to its start first.
fn pages_in_range(pages: &[Arc<Page>], range: PageRange) -> Vec<Arc<Page>> {
    let last = pages.len() as isize - 1;
    let low = range.min().index().max(0);
    let high = range.max().index().min(last);
    if low > high {
        return Vec::new();
    }
    let indexes = low as usize..=high as usize;
    match range.direction() {
        PageDirection::Forward => indexes.map(|index| Arc::clone(&pages[index])).collect(),
        PageDirection::Backward => indexes.rev().map(|index| Arc::clone(&pages[index])).collect(),
    }
}
