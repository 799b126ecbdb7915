//! Per-epoch frame generation.
//!
//! Each navigation starts one generator. It runs as its own task and owns all
//! of its range bookkeeping; the decode side only sends it wake-up signals.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{BookError, BookResult};
use crate::frame::{Frame, FrameComposer};
use crate::range::PageRange;

/// Receives the frames of one epoch.
pub trait FrameSink: Send + Sync {
    fn view_changed(&self, frame: Frame);

    fn next_changed(&self, frame: Frame, token: CancellationToken);
}

enum GeneratorMessage {
    Signal,
    ForceView(oneshot::Sender<bool>),
}

/// Cheap handle for poking a running generator.
#[derive(Clone)]
pub struct GeneratorHandle {
    tx: mpsc::UnboundedSender<GeneratorMessage>,
}

impl GeneratorHandle {
    /// Wakes the loop, e.g. after a page finished decoding.
    pub fn signal(&self) {
        let _ = self.tx.send(GeneratorMessage::Signal);
    }

    /// Emits the view frame right away unless the loop already emitted
    /// something. Returns whether a frame was emitted.
    pub async fn force_materialize_view(&self, token: &CancellationToken) -> BookResult<bool> {
        let (reply, answer) = oneshot::channel();
        if self.tx.send(GeneratorMessage::ForceView(reply)).is_err() {
            return Ok(false);
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(BookError::Canceled),
            answer = answer => Ok(answer.unwrap_or(false)),
        }
    }
}

/// Owning handle of an epoch. Dropping it cancels the epoch.
pub struct FrameGenerator {
    handle: GeneratorHandle,
    token: CancellationToken,
}

impl FrameGenerator {
    pub fn spawn(
        composer: FrameComposer,
        view_range: PageRange,
        ahead_range: Option<PageRange>,
        sink: std::sync::Arc<dyn FrameSink>,
    ) -> Self {
        let content_range = match ahead_range {
            Some(ahead) => view_range.merge(&ahead),
            None => view_range,
        }
        .truncate();
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = GeneratorWorker {
            composer,
            view_range,
            next_range: view_range,
            content_range,
            emitted_count: 0,
            view_emitted: false,
            finished: false,
            sink,
            token: token.clone(),
        };
        tokio::spawn(worker.run(rx));
        Self {
            handle: GeneratorHandle { tx },
            token,
        }
    }

    pub fn handle(&self) -> GeneratorHandle {
        self.handle.clone()
    }

    pub fn signal(&self) {
        self.handle.signal();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for FrameGenerator {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct GeneratorWorker {
    composer: FrameComposer,
    view_range: PageRange,
    next_range: PageRange,
    content_range: PageRange,
    emitted_count: usize,
    view_emitted: bool,
    finished: bool,
    sink: std::sync::Arc<dyn FrameSink>,
    token: CancellationToken,
}

impl GeneratorWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<GeneratorMessage>) {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            match message {
                GeneratorMessage::Signal => {
                    if !self.finished {
                        self.step();
                    }
                }
                GeneratorMessage::ForceView(reply) => {
                    let _ = reply.send(self.force_view());
                }
            }
        }
        trace!(emitted = self.emitted_count, "frame generator stopped");
    }

    /// Emits frames until one is not decoded yet or the epoch runs out.
    fn step(&mut self) {
        while !self.token.is_cancelled() {
            let Some(frame) = self.composer.compose(self.next_range) else {
                self.finish();
                return;
            };
            if !self.content_range.contains(frame.range().last()) {
                self.finish();
                return;
            }
            if !frame.is_valid() {
                return;
            }
            self.next_range = frame.range().next_range();
            self.emitted_count += 1;
            if !self.view_emitted {
                self.view_emitted = true;
                self.sink.view_changed(frame.clone());
            }
            self.sink.next_changed(frame, self.token.clone());
        }
    }

    fn force_view(&mut self) -> bool {
        if self.emitted_count > 0 || self.view_emitted || self.token.is_cancelled() {
            return false;
        }
        let Some(frame) = self.composer.compose(self.view_range) else {
            return false;
        };
        self.view_emitted = true;
        self.sink.view_changed(frame);
        true
    }

    fn finish(&mut self) {
        self.finished = true;
        trace!(emitted = self.emitted_count, range = %self.content_range, "epoch exhausted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{PageCollection, PageSortMode};
    use crate::config::{BookConfig, PageMode};
    use crate::frame::FrameLayout;
    use crate::page::{Page, PageKind};
    use crate::position::{PageDirection, PagePosition};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        View(PagePosition),
        Next(PagePosition),
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<Seen>>,
    }

    impl RecordingSink {
        fn seen(&self) -> Vec<Seen> {
            self.seen.lock().clone()
        }
    }

    impl FrameSink for RecordingSink {
        fn view_changed(&self, frame: Frame) {
            self.seen.lock().push(Seen::View(frame.range().position()));
        }

        fn next_changed(&self, frame: Frame, _token: CancellationToken) {
            self.seen.lock().push(Seen::Next(frame.range().position()));
        }
    }

    fn snapshot(count: usize) -> Arc<[Arc<Page>]> {
        PageCollection::new(
            (0..count)
                .map(|i| Page::new(format!("{i:02}.png"), PageKind::Image, 100.0, 150.0))
                .collect(),
            PageSortMode::FileName,
            true,
        )
        .snapshot()
    }

    fn single_composer(pages: Arc<[Arc<Page>]>) -> FrameComposer {
        FrameComposer::new(pages, FrameLayout::from(&BookConfig::default()))
    }

    fn at(index: isize) -> PagePosition {
        PagePosition::new(index, 0)
    }

    async fn settle(sink: &RecordingSink, count: usize) -> Vec<Seen> {
        for _ in 0..200 {
            if sink.seen().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // give a misbehaving generator the chance to over-emit
        tokio::time::sleep(Duration::from_millis(20)).await;
        sink.seen()
    }

    fn view_range(index: isize) -> PageRange {
        PageRange::new(at(index), PageDirection::Forward, 2)
    }

    #[tokio::test]
    async fn emits_view_once_then_next_frames_in_order() {
        let pages = snapshot(10);
        pages.iter().for_each(|page| page.mark_loaded());
        let sink = Arc::new(RecordingSink::default());
        let ahead = PageRange::whole_pages(3, 2, PageDirection::Forward);
        let generator =
            FrameGenerator::spawn(single_composer(pages), view_range(2), Some(ahead), sink.clone());
        generator.signal();

        let seen = settle(&sink, 4).await;
        assert_eq!(
            seen,
            [
                Seen::View(at(2)),
                Seen::Next(at(2)),
                Seen::Next(at(3)),
                Seen::Next(at(4)),
            ]
        );
        // exhausted epochs ignore further signals
        generator.signal();
        assert_eq!(settle(&sink, 5).await.len(), 4);
    }

    #[tokio::test]
    async fn waits_for_decode_then_resumes_same_range() {
        let pages = snapshot(10);
        pages[2].mark_loaded();
        let sink = Arc::new(RecordingSink::default());
        let ahead = PageRange::whole_pages(3, 2, PageDirection::Forward);
        let generator = FrameGenerator::spawn(
            single_composer(Arc::clone(&pages)),
            view_range(2),
            Some(ahead),
            sink.clone(),
        );
        generator.signal();
        assert_eq!(settle(&sink, 2).await, [Seen::View(at(2)), Seen::Next(at(2))]);

        pages[4].mark_loaded();
        generator.signal();
        assert_eq!(settle(&sink, 3).await.len(), 2);

        pages[3].mark_loaded();
        generator.signal();
        assert_eq!(
            settle(&sink, 4).await,
            [
                Seen::View(at(2)),
                Seen::Next(at(2)),
                Seen::Next(at(3)),
                Seen::Next(at(4)),
            ]
        );
    }

    #[tokio::test]
    async fn force_view_emits_undecoded_frame_once() {
        let pages = snapshot(4);
        let sink = Arc::new(RecordingSink::default());
        let generator = FrameGenerator::spawn(
            single_composer(Arc::clone(&pages)),
            view_range(0),
            None,
            sink.clone(),
        );
        let token = CancellationToken::new();
        assert!(generator.handle().force_materialize_view(&token).await.unwrap());
        assert!(!generator.handle().force_materialize_view(&token).await.unwrap());

        pages[0].mark_loaded();
        generator.signal();
        assert_eq!(settle(&sink, 2).await, [Seen::View(at(0)), Seen::Next(at(0))]);
    }

    #[tokio::test]
    async fn force_view_is_noop_after_loop_emitted() {
        let pages = snapshot(4);
        pages[0].mark_loaded();
        let sink = Arc::new(RecordingSink::default());
        let generator =
            FrameGenerator::spawn(single_composer(pages), view_range(0), None, sink.clone());
        generator.signal();
        let emitted = generator
            .handle()
            .force_materialize_view(&CancellationToken::new())
            .await
            .unwrap();
        assert!(!emitted);
        assert_eq!(settle(&sink, 2).await, [Seen::View(at(0)), Seen::Next(at(0))]);
    }

    #[tokio::test]
    async fn dropping_the_generator_stops_output() {
        let pages = snapshot(6);
        let sink = Arc::new(RecordingSink::default());
        let generator = FrameGenerator::spawn(
            single_composer(Arc::clone(&pages)),
            view_range(0),
            Some(PageRange::whole_pages(1, 3, PageDirection::Forward)),
            sink.clone(),
        );
        let handle = generator.handle();
        let token = generator.token().clone();
        drop(generator);
        assert!(token.is_cancelled());
        pages.iter().for_each(|page| page.mark_loaded());
        handle.signal();
        assert!(settle(&sink, 1).await.is_empty());
    }

    #[tokio::test]
    async fn backward_epoch_walks_down() {
        let pages = snapshot(10);
        pages.iter().for_each(|page| page.mark_loaded());
        let config = BookConfig {
            page_mode: PageMode::WidePage,
            ..BookConfig::default()
        };
        let composer = FrameComposer::new(pages, FrameLayout::from(&config));
        let view = PageRange::new(PagePosition::new(9, 1), PageDirection::Backward, 4);
        let ahead = PageRange::whole_pages(7, 2, PageDirection::Backward);
        let sink = Arc::new(RecordingSink::default());
        let generator = FrameGenerator::spawn(composer, view, Some(ahead), sink.clone());
        generator.signal();
        assert_eq!(
            settle(&sink, 3).await,
            [
                Seen::View(PagePosition::new(9, 1)),
                Seen::Next(PagePosition::new(9, 1)),
                Seen::Next(PagePosition::new(7, 1)),
            ]
        );
    }
}
