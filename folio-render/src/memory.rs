use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use folio_core::{MemoryService, Page, PageState};
use parking_lot::Mutex;
use tracing::debug;

/// Byte budget for decoded pages.
///
/// Decoded pages are tracked as they arrive; once the budget is exceeded,
/// pages no longer retained by the view are unloaded.
pub struct MemoryBudget {
    limit: usize,
    used: AtomicUsize,
    reference: AtomicUsize,
    tracked: Mutex<Vec<Arc<Page>>>,
}

impl MemoryBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
            reference: AtomicUsize::new(0),
            tracked: Mutex::new(Vec::new()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Page index the reader is currently at.
    pub fn reference(&self) -> usize {
        self.reference.load(Ordering::Acquire)
    }

    /// Accounts a freshly decoded page.
    pub fn track(&self, page: &Arc<Page>) {
        let bytes = page.content().map(|image| image.byte_len()).unwrap_or(0);
        let mut tracked = self.tracked.lock();
        if tracked.iter().any(|known| Arc::ptr_eq(known, page)) {
            return;
        }
        tracked.push(Arc::clone(page));
        self.used.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Unloads tracked pages whose retention state is `None`, farthest from
    /// the reference page first, until the budget fits again. Returns the
    /// number of bytes released.
    pub fn release_unretained(&self) -> usize {
        let reference = self.reference();
        let mut tracked = self.tracked.lock();
        tracked.retain(|page| page.is_loaded());
        tracked.sort_by_key(|page| std::cmp::Reverse(page.index().abs_diff(reference)));

        let mut released = 0;
        tracked.retain(|page| {
            if self.used() <= self.limit || page.state() != PageState::None {
                return true;
            }
            let bytes = page.unload();
            self.used.fetch_sub(bytes.min(self.used()), Ordering::AcqRel);
            released += bytes;
            false
        });
        if released > 0 {
            debug!(released, used = self.used(), limit = self.limit, "released pages");
        }
        released
    }
}

impl MemoryService for MemoryBudget {
    fn set_reference(&self, index: usize) {
        self.reference.store(index, Ordering::Release);
    }

    fn is_full(&self) -> bool {
        self.used() >= self.limit
    }
}
