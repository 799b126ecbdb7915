//! Single-flight command queue.
//!
//! One command runs at a time. At most one more waits behind it: relative
//! moves fold into the waiting move, anything else competes on priority and
//! the loser is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace};

use crate::command::{BookCommand, CommandOutcome};
use crate::error::{BookError, BookResult};

#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn execute(&self, command: BookCommand, token: CancellationToken) -> BookResult<()>;

    /// Called when a running command gave up because it was canceled.
    fn canceled(&self, command: &BookCommand) {
        debug!(%command, "command canceled while running");
    }
}

/// Handle to one enqueued command.
pub struct CommandTicket {
    id: u64,
    token: CancellationToken,
    outcome: oneshot::Receiver<CommandOutcome>,
}

impl CommandTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub async fn outcome(self) -> CommandOutcome {
        self.outcome.await.unwrap_or(CommandOutcome::Canceled)
    }
}

struct QueuedCommand {
    id: u64,
    command: BookCommand,
    token: CancellationToken,
    done: oneshot::Sender<CommandOutcome>,
}

impl QueuedCommand {
    fn finish(self, outcome: CommandOutcome) {
        let _ = self.done.send(outcome);
    }
}

#[derive(Default)]
struct QueueState {
    pending: Option<QueuedCommand>,
    running: Option<(u64, CancellationToken)>,
    next_id: u64,
}

struct EngineShared {
    queue: Mutex<QueueState>,
    wake: Notify,
    shutdown: CancellationToken,
    merge_moves: AtomicBool,
}

pub struct CommandEngine {
    shared: Arc<EngineShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CommandEngine {
    /// Starts the worker task. Must be called inside a tokio runtime.
    pub fn new(handler: Arc<dyn CommandHandler>, merge_moves: bool) -> Self {
        let shared = Arc::new(EngineShared {
            queue: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
            merge_moves: AtomicBool::new(merge_moves),
        });
        let worker = tokio::spawn(run_worker(Arc::clone(&shared), handler));
        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn set_merge_moves(&self, merge_moves: bool) {
        self.shared.merge_moves.store(merge_moves, Ordering::Release);
    }

    #[instrument(skip(self, command), fields(command = %command))]
    pub fn enqueue(&self, command: BookCommand) -> CommandTicket {
        let (done, outcome) = oneshot::channel();
        let token = self.shared.shutdown.child_token();
        let mut queue = self.shared.queue.lock();
        let id = queue.next_id;
        queue.next_id += 1;
        let ticket = CommandTicket {
            id,
            token: token.clone(),
            outcome,
        };

        if self.shared.shutdown.is_cancelled() {
            debug!(id, "engine stopped, command dropped");
            let _ = done.send(CommandOutcome::Canceled);
            return ticket;
        }

        if self.shared.merge_moves.load(Ordering::Acquire) {
            if let Some(waiting) = queue.pending.as_mut() {
                if !waiting.token.is_cancelled() && waiting.command.try_merge(&command) {
                    debug!(id, into = waiting.id, "merged into pending command");
                    let _ = done.send(CommandOutcome::Merged);
                    return ticket;
                }
            }
        }

        let incoming = QueuedCommand {
            id,
            command,
            token,
            done,
        };
        let kept = match queue.pending.take() {
            None => incoming,
            Some(waiting) => {
                let incoming_wins = waiting.token.is_cancelled()
                    || incoming.command.priority() >= waiting.command.priority();
                let (kept, evicted) = if incoming_wins {
                    (incoming, waiting)
                } else {
                    (waiting, incoming)
                };
                debug!(kept = kept.id, evicted = evicted.id, "command superseded");
                evicted.token.cancel();
                evicted.finish(CommandOutcome::Superseded);
                kept
            }
        };
        queue.pending = Some(kept);
        drop(queue);
        self.shared.wake.notify_one();
        ticket
    }

    /// The waiting command, if any.
    pub fn pending_command(&self) -> Option<BookCommand> {
        self.shared
            .queue
            .lock()
            .pending
            .as_ref()
            .map(|queued| queued.command.clone())
    }

    pub fn is_running(&self) -> bool {
        self.shared.queue.lock().running.is_some()
    }

    /// Cancels the pending and running commands and stops the worker.
    pub fn shutdown(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        debug!("command engine shutting down");
        self.shared.shutdown.cancel();
        let pending = self.shared.queue.lock().pending.take();
        if let Some(pending) = pending {
            pending.finish(CommandOutcome::Canceled);
        }
    }

    /// Shuts down and waits for the running command to unwind.
    pub async fn join(&self) {
        self.shutdown();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                error!(%err, "command worker failed");
            }
        }
    }
}

impl Drop for CommandEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_worker(shared: Arc<EngineShared>, handler: Arc<dyn CommandHandler>) {
    loop {
        let next = {
            let mut queue = shared.queue.lock();
            let next = queue.pending.take();
            queue.running = next
                .as_ref()
                .map(|queued| (queued.id, queued.token.clone()));
            next
        };
        let Some(queued) = next else {
            tokio::select! {
                _ = shared.shutdown.cancelled() => break,
                _ = shared.wake.notified() => {}
            }
            continue;
        };

        let outcome = if queued.token.is_cancelled() {
            debug!(id = queued.id, "command canceled before start");
            CommandOutcome::Canceled
        } else {
            execute(&handler, &queued).await
        };
        shared.queue.lock().running = None;
        trace!(id = queued.id, ?outcome, "command finished");
        queued.finish(outcome);

        if shared.shutdown.is_cancelled() {
            break;
        }
    }

    let pending = shared.queue.lock().pending.take();
    if let Some(pending) = pending {
        pending.finish(CommandOutcome::Canceled);
    }
    trace!("command worker stopped");
}

#[instrument(skip_all, fields(id = queued.id, command = %queued.command))]
async fn execute(handler: &Arc<dyn CommandHandler>, queued: &QueuedCommand) -> CommandOutcome {
    let body = {
        let handler = Arc::clone(handler);
        let command = queued.command.clone();
        let token = queued.token.clone();
        tokio::spawn(async move { handler.execute(command, token).await })
    };
    match body.await {
        Ok(Ok(())) => CommandOutcome::Completed,
        Ok(Err(BookError::Canceled)) => {
            handler.canceled(&queued.command);
            CommandOutcome::Canceled
        }
        Ok(Err(err)) => {
            error!(%err, "command failed");
            CommandOutcome::Faulted(err.to_string())
        }
        Err(err) if err.is_panic() => {
            error!("command panicked");
            CommandOutcome::Faulted("command panicked".to_string())
        }
        Err(err) => {
            debug!(%err, "command task aborted");
            CommandOutcome::Canceled
        }
    }
}
