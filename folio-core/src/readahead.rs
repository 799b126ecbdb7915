use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::page::{Page, PageState};
use crate::services::{DecodePriority, DecodeScheduler, MemoryService};

#[derive(Default)]
struct ReadaheadState {
    targets: Vec<Arc<Page>>,
    cursor: usize,
    tracked: Option<Arc<Page>>,
    busy: bool,
}

/// Orders decode of readahead pages one at a time, stopping while memory is
/// full. `order`/`clear` come from the navigation command, `on_page_loaded`
/// from the decode side; one lock covers both.
pub struct ReadaheadOrderer {
    decoder: Arc<dyn DecodeScheduler>,
    memory: Arc<dyn MemoryService>,
    state: Mutex<ReadaheadState>,
}

impl ReadaheadOrderer {
    pub fn new(decoder: Arc<dyn DecodeScheduler>, memory: Arc<dyn MemoryService>) -> Self {
        Self {
            decoder,
            memory,
            state: Mutex::new(ReadaheadState::default()),
        }
    }

    pub fn order(&self, pages: Vec<Arc<Page>>) {
        let mut state = self.state.lock();
        *state = ReadaheadState {
            targets: pages,
            ..ReadaheadState::default()
        };
        self.advance(&mut state);
    }

    pub fn clear(&self) {
        *self.state.lock() = ReadaheadState::default();
    }

    pub fn on_page_loaded(&self, page: &Arc<Page>) {
        let mut state = self.state.lock();
        let matches = state
            .tracked
            .as_ref()
            .is_some_and(|tracked| Arc::ptr_eq(tracked, page));
        if matches {
            state.tracked = None;
            state.cursor += 1;
            self.advance(&mut state);
        }
    }

    /// Picks up again after memory was released. No-op while a page is in
    /// flight or nothing is left to order.
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if !state.busy {
            self.advance(&mut state);
        }
    }

    /// True while a readahead page is being decoded.
    pub fn is_busy(&self) -> bool {
        self.state.lock().busy
    }

    pub fn tracked_page(&self) -> Option<Arc<Page>> {
        self.state.lock().tracked.clone()
    }

    fn advance(&self, state: &mut ReadaheadState) {
        while let Some(page) = state.targets.get(state.cursor) {
            if page.is_loaded() {
                state.cursor += 1;
                continue;
            }
            if self.memory.is_full() {
                debug!(cursor = state.cursor, "readahead paused, memory full");
                state.busy = false;
                state.tracked = None;
                return;
            }
            page.raise_state(PageState::Ahead);
            trace!(index = page.index(), "readahead");
            self.decoder
                .order(std::slice::from_ref(page), DecodePriority::Ahead);
            state.tracked = Some(Arc::clone(page));
            state.busy = true;
            return;
        }
        state.busy = false;
        state.tracked = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageKind;
    use crate::services::PageLoadedSender;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingDecoder {
        orders: Mutex<Vec<(usize, DecodePriority)>>,
    }

    #[async_trait::async_trait]
    impl DecodeScheduler for RecordingDecoder {
        fn order(&self, pages: &[Arc<Page>], priority: DecodePriority) {
            let mut orders = self.orders.lock();
            orders.extend(pages.iter().map(|page| (page.index(), priority)));
        }

        fn subscribe(&self, _sender: PageLoadedSender) {}
    }

    #[derive(Default)]
    struct SwitchMemory {
        full: AtomicBool,
    }

    impl MemoryService for SwitchMemory {
        fn set_reference(&self, _index: usize) {}

        fn is_full(&self) -> bool {
            self.full.load(Ordering::SeqCst)
        }
    }

    fn pages(count: usize) -> Vec<Arc<Page>> {
        crate::collection::PageCollection::new(
            (0..count)
                .map(|i| Page::new(format!("{i}.png"), PageKind::Image, 1.0, 1.0))
                .collect(),
            crate::collection::PageSortMode::FileName,
            true,
        )
        .snapshot()
        .to_vec()
    }

    fn setup() -> (Arc<RecordingDecoder>, Arc<SwitchMemory>, ReadaheadOrderer) {
        let decoder = Arc::new(RecordingDecoder::default());
        let memory = Arc::new(SwitchMemory::default());
        let orderer = ReadaheadOrderer::new(decoder.clone(), memory.clone());
        (decoder, memory, orderer)
    }

    #[test]
    fn orders_one_page_at_a_time() {
        let (decoder, _memory, orderer) = setup();
        let pages = pages(3);
        orderer.order(pages.clone());
        assert!(orderer.is_busy());
        assert_eq!(*decoder.orders.lock(), [(0, DecodePriority::Ahead)]);
        assert_eq!(pages[0].state(), PageState::Ahead);
        assert_eq!(pages[1].state(), PageState::None);

        pages[0].mark_loaded();
        orderer.on_page_loaded(&pages[0]);
        assert_eq!(decoder.orders.lock().len(), 2);
        assert!(Arc::ptr_eq(&orderer.tracked_page().unwrap(), &pages[1]));
    }

    #[test]
    fn skips_loaded_pages_and_finishes() {
        let (decoder, _memory, orderer) = setup();
        let pages = pages(2);
        pages[0].mark_loaded();
        orderer.order(pages.clone());
        assert_eq!(*decoder.orders.lock(), [(1, DecodePriority::Ahead)]);
        pages[1].mark_loaded();
        orderer.on_page_loaded(&pages[1]);
        assert!(!orderer.is_busy());
        assert!(orderer.tracked_page().is_none());
    }

    #[test]
    fn unrelated_loads_are_ignored() {
        let (decoder, _memory, orderer) = setup();
        let pages = pages(3);
        orderer.order(pages.clone());
        pages[2].mark_loaded();
        orderer.on_page_loaded(&pages[2]);
        assert_eq!(decoder.orders.lock().len(), 1);
    }

    #[test]
    fn pauses_while_memory_is_full() {
        let (decoder, memory, orderer) = setup();
        let pages = pages(2);
        memory.full.store(true, Ordering::SeqCst);
        orderer.order(pages.clone());
        assert!(!orderer.is_busy());
        assert!(decoder.orders.lock().is_empty());

        memory.full.store(false, Ordering::SeqCst);
        orderer.resume();
        assert!(orderer.is_busy());
        assert_eq!(decoder.orders.lock().len(), 1);
    }

    #[test]
    fn clear_drops_tracking() {
        let (decoder, _memory, orderer) = setup();
        let pages = pages(2);
        orderer.order(pages.clone());
        orderer.clear();
        pages[0].mark_loaded();
        orderer.on_page_loaded(&pages[0]);
        assert_eq!(decoder.orders.lock().len(), 1);
        assert!(!orderer.is_busy());
    }
}
