use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::collection::PageSortMode;
use crate::command::{BookCommand, CommandKind};
use crate::config::BookConfig;
use crate::engine::{CommandEngine, CommandHandler, CommandTicket};
use crate::error::{BookError, BookResult};
use crate::event::{BookEventReceiver, SenderId};
use crate::frame::Frame;
use crate::marker::PageMarkers;
use crate::page::Page;
use crate::position::{PageDirection, PagePosition};
use crate::range::PageRange;
use crate::services::{DecodeScheduler, MemoryService, PageSupplier};
use crate::viewer::BookViewer;

pub type BookId = Uuid;

static BOOK_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, b"folio:book")
});

/// Stable id of the book at `path`, independent of how the path was spelled.
pub fn book_id_for_path(path: &Path) -> BookId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    Uuid::new_v5(&BOOK_NAMESPACE, resolved.to_string_lossy().as_bytes())
}

/// Runs queued commands against the viewer.
struct BookExecutor {
    viewer: Arc<BookViewer>,
    markers: Arc<PageMarkers>,
}

#[async_trait]
impl CommandHandler for BookExecutor {
    async fn execute(&self, command: BookCommand, token: CancellationToken) -> BookResult<()> {
        let sender = command.sender;
        match command.kind {
            CommandKind::MovePage { delta } => {
                let range = self.viewer.move_target(delta);
                self.viewer.update_view_page(sender, range, token).await
            }
            CommandKind::SetPosition {
                position,
                direction,
            } => {
                self.viewer
                    .update_view_page(sender, PageRange::at(position, direction), token)
                    .await
            }
            CommandKind::MoveToMarker {
                direction,
                is_loop,
                include_terminal,
            } => {
                let current = self.viewer.display_index().unwrap_or(0);
                let target = self.markers.near_marked_page(
                    current,
                    direction,
                    is_loop,
                    include_terminal,
                    self.viewer.page_count(),
                );
                let Some(index) = target else {
                    debug!(current, %direction, "no marker to move to");
                    return Ok(());
                };
                let range = PageRange::at(
                    PagePosition::new(index as isize, 0),
                    PageDirection::Forward,
                );
                self.viewer.update_view_page(sender, range, token).await
            }
            CommandKind::Refresh => self.viewer.refresh(sender, None, token).await,
            CommandKind::Sort { mode } => {
                let anchor = self.viewer.anchor_page();
                self.viewer.sort_pages(mode);
                self.viewer.refresh(sender, anchor, token).await
            }
            CommandKind::Remove { pages } => {
                let removed = self.viewer.remove_pages(&pages);
                if removed.is_empty() {
                    return Ok(());
                }
                self.markers.remove_pages(&removed);
                self.viewer.refresh(sender, None, token).await
            }
            CommandKind::Dispose => {
                self.viewer.dispose();
                Ok(())
            }
        }
    }
}

/// An open book: translates navigation intents into queued commands.
///
/// Every navigation method returns immediately with a [`CommandTicket`];
/// the resulting frames arrive on the event receiver handed out by
/// [`Book::open`] or [`Book::new`].
pub struct Book {
    id: BookId,
    path: PathBuf,
    viewer: Arc<BookViewer>,
    markers: Arc<PageMarkers>,
    engine: CommandEngine,
    loaded_task: JoinHandle<()>,
}

impl Book {
    #[instrument(skip(supplier, decoder, memory, config))]
    pub async fn open<S>(
        path: &Path,
        supplier: &S,
        decoder: Arc<dyn DecodeScheduler>,
        memory: Arc<dyn MemoryService>,
        config: BookConfig,
    ) -> BookResult<(Self, BookEventReceiver)>
    where
        S: PageSupplier + ?Sized,
    {
        let pages = supplier
            .load_pages(path)
            .await
            .map_err(|err| BookError::Supplier(format!("{err:#}")))?;
        Ok(Self::new(path, pages, decoder, memory, config))
    }

    /// Builds a book over an already listed set of pages. Must be called
    /// inside a tokio runtime.
    pub fn new(
        path: &Path,
        pages: Vec<Page>,
        decoder: Arc<dyn DecodeScheduler>,
        memory: Arc<dyn MemoryService>,
        config: BookConfig,
    ) -> (Self, BookEventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        let merge_moves = config.merge_move_commands;
        let viewer = Arc::new(BookViewer::new(
            pages,
            config,
            Arc::clone(&decoder),
            memory,
            events,
        ));
        let markers = Arc::new(PageMarkers::new());

        let (loaded_tx, mut loaded_rx) = mpsc::unbounded_channel::<Arc<Page>>();
        decoder.subscribe(loaded_tx);
        let weak = Arc::downgrade(&viewer);
        let loaded_task = tokio::spawn(async move {
            while let Some(page) = loaded_rx.recv().await {
                let Some(viewer) = weak.upgrade() else {
                    break;
                };
                viewer.on_page_loaded(&page);
            }
        });

        let executor = Arc::new(BookExecutor {
            viewer: Arc::clone(&viewer),
            markers: Arc::clone(&markers),
        });
        let engine = CommandEngine::new(executor, merge_moves);
        let id = book_id_for_path(path);
        info!(%id, path = %path.display(), pages = viewer.page_count(), "book opened");
        (
            Self {
                id,
                path: path.to_path_buf(),
                viewer,
                markers,
                engine,
                loaded_task,
            },
            receiver,
        )
    }

    pub fn id(&self) -> BookId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn enqueue(&self, sender: SenderId, kind: CommandKind) -> CommandTicket {
        self.engine.enqueue(BookCommand::new(sender, kind))
    }

    pub fn move_pages(&self, sender: SenderId, delta: isize) -> CommandTicket {
        self.enqueue(sender, CommandKind::MovePage { delta })
    }

    /// Next frame: one or two pages depending on the page mode.
    pub fn next_page(&self, sender: SenderId) -> CommandTicket {
        let delta = self.viewer.config().frame_size() as isize;
        self.move_pages(sender, delta)
    }

    pub fn prev_page(&self, sender: SenderId) -> CommandTicket {
        let delta = self.viewer.config().frame_size() as isize;
        self.move_pages(sender, -delta)
    }

    pub fn next_one_page(&self, sender: SenderId) -> CommandTicket {
        self.move_pages(sender, 1)
    }

    pub fn prev_one_page(&self, sender: SenderId) -> CommandTicket {
        self.move_pages(sender, -1)
    }

    pub fn first_page(&self, sender: SenderId) -> CommandTicket {
        self.jump_position(sender, PagePosition::ZERO, PageDirection::Forward)
    }

    pub fn last_page(&self, sender: SenderId) -> CommandTicket {
        let last = self.viewer.page_count().saturating_sub(1) as isize;
        let position = if self.viewer.page_count() == 0 {
            PagePosition::ZERO
        } else {
            PagePosition::new(last, 1)
        };
        self.jump_position(sender, position, PageDirection::Backward)
    }

    pub fn jump_page(&self, sender: SenderId, index: usize) -> CommandTicket {
        self.jump_position(
            sender,
            PagePosition::new(index as isize, 0),
            PageDirection::Forward,
        )
    }

    pub fn jump_position(
        &self,
        sender: SenderId,
        position: PagePosition,
        direction: PageDirection,
    ) -> CommandTicket {
        self.enqueue(
            sender,
            CommandKind::SetPosition {
                position,
                direction,
            },
        )
    }

    pub fn next_marked_page(
        &self,
        sender: SenderId,
        is_loop: bool,
        include_terminal: bool,
    ) -> CommandTicket {
        self.enqueue(
            sender,
            CommandKind::MoveToMarker {
                direction: PageDirection::Forward,
                is_loop,
                include_terminal,
            },
        )
    }

    pub fn prev_marked_page(
        &self,
        sender: SenderId,
        is_loop: bool,
        include_terminal: bool,
    ) -> CommandTicket {
        self.enqueue(
            sender,
            CommandKind::MoveToMarker {
                direction: PageDirection::Backward,
                is_loop,
                include_terminal,
            },
        )
    }

    pub fn refresh(&self, sender: SenderId) -> CommandTicket {
        self.enqueue(sender, CommandKind::Refresh)
    }

    pub fn sort(&self, sender: SenderId, mode: PageSortMode) -> CommandTicket {
        self.enqueue(sender, CommandKind::Sort { mode })
    }

    pub fn remove(&self, sender: SenderId, pages: Vec<Arc<Page>>) -> CommandTicket {
        self.enqueue(sender, CommandKind::Remove { pages })
    }

    /// Applies new settings and redraws the current position.
    pub fn set_config(&self, config: BookConfig) -> CommandTicket {
        self.engine.set_merge_moves(config.merge_move_commands);
        self.viewer.set_config(config);
        self.refresh(SenderId::BOOK)
    }

    /// Flips the marker on the displayed page. Returns the new state, or
    /// `None` when nothing is displayed.
    pub fn toggle_marker(&self) -> Option<bool> {
        let index = self.viewer.display_index()?;
        let page = self.viewer.pages().get(index).cloned()?;
        Some(self.markers.toggle(&page))
    }

    pub fn marked_pages(&self) -> Vec<Arc<Page>> {
        self.markers.marked_pages()
    }

    pub fn pages(&self) -> Arc<[Arc<Page>]> {
        self.viewer.pages()
    }

    pub fn page_count(&self) -> usize {
        self.viewer.page_count()
    }

    pub fn current_frame(&self) -> Option<Frame> {
        self.viewer.current_frame()
    }

    pub fn display_index(&self) -> Option<usize> {
        self.viewer.display_index()
    }

    pub fn sort_mode(&self) -> PageSortMode {
        self.viewer.sort_mode()
    }

    pub fn config(&self) -> BookConfig {
        self.viewer.config()
    }

    pub fn is_page_terminated(&self) -> bool {
        self.viewer.is_page_terminated()
    }

    pub fn page_change_count(&self) -> usize {
        self.viewer.page_change_count()
    }

    /// Queues disposal behind whatever is running, then stops the engine.
    pub async fn dispose(self) {
        let ticket = self.enqueue(SenderId::BOOK, CommandKind::Dispose);
        let outcome = ticket.outcome().await;
        debug!(?outcome, "dispose command finished");
        self.engine.join().await;
        self.viewer.dispose();
        info!(id = %self.id, "book closed");
    }
}

impl Drop for Book {
    fn drop(&mut self) {
        self.loaded_task.abort();
        self.engine.shutdown();
        self.viewer.dispose();
    }
}
