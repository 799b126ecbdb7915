//! Boundaries to the collaborators that live outside the navigation core:
//! whoever lists the pages, whoever decodes them and whoever tracks memory.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::page::Page;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodePriority {
    /// Pages of the frame being navigated to.
    View,
    /// Readahead beyond the visible frame.
    Ahead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Loaded,
    TimedOut,
    Canceled,
}

/// Receives every page the decode scheduler finishes.
pub type PageLoadedSender = mpsc::UnboundedSender<Arc<Page>>;

#[async_trait]
pub trait PageSupplier: Send + Sync {
    async fn load_pages(&self, path: &Path) -> Result<Vec<Page>>;
}

#[async_trait]
pub trait DecodeScheduler: Send + Sync {
    /// Requests decode of `pages`. A later order of the same priority
    /// replaces the earlier one.
    fn order(&self, pages: &[Arc<Page>], priority: DecodePriority);

    fn subscribe(&self, sender: PageLoadedSender);

    /// Waits until every page is loaded, the timeout elapses or `token` is
    /// canceled, whichever comes first.
    async fn wait(
        &self,
        pages: &[Arc<Page>],
        timeout: Duration,
        token: CancellationToken,
    ) -> WaitOutcome {
        wait_for_pages(pages, timeout, token).await
    }
}

pub trait MemoryService: Send + Sync {
    /// Locality hint: the page the reader is looking at.
    fn set_reference(&self, index: usize);

    fn is_full(&self) -> bool;
}

/// Memory service for hosts that do not budget decoded pages.
#[derive(Debug, Default)]
pub struct UnboundedMemory;

impl MemoryService for UnboundedMemory {
    fn set_reference(&self, _index: usize) {}

    fn is_full(&self) -> bool {
        false
    }
}

pub async fn wait_for_pages(
    pages: &[Arc<Page>],
    timeout: Duration,
    token: CancellationToken,
) -> WaitOutcome {
    let all_loaded = async {
        for page in pages {
            page.wait_loaded().await;
        }
    };
    tokio::select! {
        biased;
        _ = token.cancelled() => WaitOutcome::Canceled,
        result = tokio::time::timeout(timeout, all_loaded) => match result {
            Ok(()) => WaitOutcome::Loaded,
            Err(_) => WaitOutcome::TimedOut,
        },
    }
}
