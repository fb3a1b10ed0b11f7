use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::AmoError;
use crate::response::DomainResponse;

/// One HTTP call plus its response handling, as submitted to a runner.
pub type QueuedTask<'a> = BoxFuture<'a, Result<DomainResponse, AmoError>>;

/// Strategy that decides how queued HTTP tasks are executed.
#[async_trait]
pub trait RequestRunner: Send + Sync {
    /// Run `task` and hand its outcome back to the caller that submitted it.
    async fn run<'a>(&'a self, task: QueuedTask<'a>) -> Result<DomainResponse, AmoError>;
}

impl std::fmt::Debug for dyn RequestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRunner").finish()
    }
}

/// FIFO runner with at most one task in flight.
///
/// Waiters on a tokio mutex are granted the lock in the order they started
/// waiting, which gives arrival-order execution. A failing task only fails
/// its own caller; the slot is released either way.
#[derive(Debug, Default)]
pub struct SerialQueue {
    slot: Mutex<()>,
    pending: AtomicUsize,
    next_ticket: AtomicU64,
}

impl SerialQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks submitted and not yet finished, including the one in flight.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestRunner for SerialQueue {
    async fn run<'a>(&'a self, task: QueuedTask<'a>) -> Result<DomainResponse, AmoError> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        self.pending.fetch_add(1, Ordering::SeqCst);

        let result = {
            let _slot = self.slot.lock().await;
            debug!(ticket, "request slot acquired");
            task.await
        };

        self.pending.fetch_sub(1, Ordering::SeqCst);
        debug!(ticket, ok = result.is_ok(), "request slot released");
        result
    }
}

/// Runs each task directly in the caller's future, with no serialization.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineRunner;

#[async_trait]
impl RequestRunner for InlineRunner {
    async fn run<'a>(&'a self, task: QueuedTask<'a>) -> Result<DomainResponse, AmoError> {
        task.await
    }
}
