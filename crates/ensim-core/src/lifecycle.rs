//! Per-node task lifecycle.
//!
//! Every background task of a node is spawned through its `NodeLifecycle`:
//! the task is tracked (so `shutdown` can wait for it), instrumented with
//! the node's span, and expected to exit once the token is cancelled.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span};

#[derive(Debug, Clone)]
pub struct NodeLifecycle {
    cancel: CancellationToken,
    tracker: TaskTracker,
    span: Span,
    ready: Arc<watch::Sender<bool>>,
}

impl NodeLifecycle {
    pub fn new(uuid: &str) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            span: tracing::info_span!("edge_node", %uuid),
            ready: Arc::new(ready),
        }
    }

    /// Spawn a tracked task inside the node's span.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(fut.instrument(self.span.clone()))
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once termination was requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Number of tracked tasks still running.
    pub fn running_tasks(&self) -> usize {
        self.tracker.len()
    }

    pub fn signal_ready(&self) {
        self.ready.send_replace(true);
    }

    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Cancel every task and wait until all of them have exited.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
