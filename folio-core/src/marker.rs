use std::sync::Arc;

use parking_lot::Mutex;

use crate::page::{contains_page, Page};
use crate::position::PageDirection;

/// Bookmarked pages of one book.
#[derive(Default)]
pub struct PageMarkers {
    marked: Mutex<Vec<Arc<Page>>>,
}

impl PageMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, page: &Arc<Page>, marked: bool) {
        let mut list = self.marked.lock();
        let present = contains_page(&list, page);
        if marked && !present {
            list.push(Arc::clone(page));
        } else if !marked && present {
            list.retain(|candidate| !Arc::ptr_eq(candidate, page));
        }
        page.set_marked(marked);
    }

    /// Flips the marker and returns the new state.
    pub fn toggle(&self, page: &Arc<Page>) -> bool {
        let marked = !page.is_marked();
        self.set(page, marked);
        marked
    }

    /// Marked pages in current page order.
    pub fn marked_pages(&self) -> Vec<Arc<Page>> {
        let mut pages = self.marked.lock().clone();
        pages.sort_by_key(|page| page.index());
        pages
    }

    pub fn remove_pages(&self, pages: &[Arc<Page>]) {
        self.marked
            .lock()
            .retain(|candidate| !contains_page(pages, candidate));
    }

    pub fn clear(&self) {
        for page in self.marked.lock().drain(..) {
            page.set_marked(false);
        }
    }

    /// Index of the closest marker strictly beyond `current` in `direction`.
    ///
    /// With `include_terminal` the first and last pages count as markers.
    /// With `is_loop` the search wraps to the opposite end of the book.
    pub fn near_marked_page(
        &self,
        current: usize,
        direction: PageDirection,
        is_loop: bool,
        include_terminal: bool,
        page_count: usize,
    ) -> Option<usize> {
        let mut indexes: Vec<usize> = self
            .marked
            .lock()
            .iter()
            .map(|page| page.index())
            .filter(|index| *index < page_count)
            .collect();
        if include_terminal && page_count > 0 {
            indexes.push(0);
            indexes.push(page_count - 1);
        }
        indexes.sort_unstable();
        indexes.dedup();

        match direction {
            PageDirection::Forward => indexes
                .iter()
                .copied()
                .find(|index| *index > current)
                .or_else(|| is_loop.then(|| indexes.first().copied()).flatten()),
            PageDirection::Backward => indexes
                .iter()
                .rev()
                .copied()
                .find(|index| *index < current)
                .or_else(|| is_loop.then(|| indexes.last().copied()).flatten()),
        }
    }
}
