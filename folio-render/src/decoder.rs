use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use folio_core::{
    DecodePriority, DecodeScheduler, MemoryService, Page, PageImage, PageLoadedSender, PageState,
};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, trace, warn};

use crate::memory::MemoryBudget;

/// Decodes page images on a rayon pool and reports each finished page to
/// the subscribers.
pub struct ImageDecodeScheduler {
    pool: ThreadPool,
    shared: Arc<DecoderShared>,
}

struct DecoderShared {
    root: PathBuf,
    budget: Arc<MemoryBudget>,
    generations: Mutex<HashMap<DecodePriority, u64>>,
    in_flight: Mutex<HashSet<usize>>,
    subscribers: Mutex<Vec<PageLoadedSender>>,
    decoded: AtomicU64,
}

impl ImageDecodeScheduler {
    pub fn new(root: impl Into<PathBuf>, budget: Arc<MemoryBudget>, threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|index| format!("folio-decode-{index}"))
            .build()
            .context("failed to start decode pool")?;
        Ok(Self {
            pool,
            shared: Arc::new(DecoderShared {
                root: root.into(),
                budget,
                generations: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
                subscribers: Mutex::new(Vec::new()),
                decoded: AtomicU64::new(0),
            }),
        })
    }

    /// Number of pages decoded so far.
    pub fn decoded_count(&self) -> u64 {
        self.shared.decoded.load(Ordering::Acquire)
    }
}

#[async_trait]
impl DecodeScheduler for ImageDecodeScheduler {
    fn order(&self, pages: &[Arc<Page>], priority: DecodePriority) {
        let generation = {
            let mut generations = self.shared.generations.lock();
            let generation = generations.entry(priority).or_insert(0);
            *generation += 1;
            *generation
        };
        for page in pages {
            if page.is_loaded() {
                self.shared.publish(page);
                continue;
            }
            if !self.shared.in_flight.lock().insert(page_key(page)) {
                continue;
            }
            let shared = Arc::clone(&self.shared);
            let page = Arc::clone(page);
            self.pool
                .spawn(move || shared.run_job(&page, priority, generation));
        }
    }

    fn subscribe(&self, sender: PageLoadedSender) {
        self.shared.subscribers.lock().push(sender);
    }
}

impl DecoderShared {
    fn run_job(&self, page: &Arc<Page>, priority: DecodePriority, generation: u64) {
        let result = if self.is_stale(page, priority, generation) {
            trace!(index = page.index(), "skipping stale decode");
            None
        } else {
            Some(self.decode(page))
        };
        self.in_flight.lock().remove(&page_key(page));
        let Some(result) = result else {
            return;
        };
        match result {
            Ok(()) => {
                self.decoded.fetch_add(1, Ordering::AcqRel);
                self.budget.track(page);
                if self.budget.is_full() {
                    self.budget.release_unretained();
                }
            }
            Err(err) => {
                // unreadable pages resolve blank
                warn!(index = page.index(), "decode failed: {err:#}");
                page.mark_loaded();
            }
        }
        self.publish(page);
    }

    /// A job is stale once a newer order of its priority arrived and the
    /// page dropped out of the retained set.
    fn is_stale(&self, page: &Page, priority: DecodePriority, generation: u64) -> bool {
        let current = self
            .generations
            .lock()
            .get(&priority)
            .copied()
            .unwrap_or(generation);
        current != generation && page.state() == PageState::None
    }

    fn decode(&self, page: &Page) -> Result<()> {
        if page.kind().is_container() || page.width() == 0.0 {
            page.mark_loaded();
            return Ok(());
        }
        let path = self.root.join(page.entry_name());
        page.set_content(load_image(&path)?);
        trace!(index = page.index(), "decoded");
        Ok(())
    }

    fn publish(&self, page: &Arc<Page>) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sender| sender.send(Arc::clone(page)).is_ok());
        if subscribers.is_empty() {
            debug!("no page subscribers left");
        }
    }
}

fn load_image(path: &Path) -> Result<PageImage> {
    let image = image::open(path)
        .with_context(|| format!("failed to decode {}", path.display()))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    Ok(PageImage {
        width,
        height,
        pixels: image.into_raw(),
    })
}

fn page_key(page: &Arc<Page>) -> usize {
    Arc::as_ptr(page) as usize
}
