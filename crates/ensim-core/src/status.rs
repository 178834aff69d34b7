//! Bounded status event queue between a node's subsystems and its collector.
//!
//! Producers wait while the queue is full. Once the collector has gone away
//! (its receiver dropped on termination) events are discarded, so late
//! reports from exiting tasks never block or fail.

use tokio::sync::mpsc;
use tracing::trace;

use crate::types::{NodeStatus, StatusSource};

pub type StatusReceiver = mpsc::Receiver<NodeStatus>;

/// Create a status queue holding at most `capacity` undelivered events.
pub fn status_channel(capacity: usize) -> (StatusSender, StatusReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (StatusSender { tx }, rx)
}

#[derive(Debug, Clone)]
pub struct StatusSender {
    tx: mpsc::Sender<NodeStatus>,
}

impl StatusSender {
    pub async fn push(&self, status: NodeStatus) {
        if let Err(e) = self.tx.send(status).await {
            trace!(source = %e.0.source, "status collector gone, event dropped");
        }
    }

    pub async fn ok(&self, source: StatusSource, details: impl Into<String>) {
        self.push(NodeStatus::ok(source, details)).await;
    }

    pub async fn failed(&self, source: StatusSource, details: impl Into<String>) {
        self.push(NodeStatus::failed(source, details)).await;
    }

    /// True once the collector has dropped its end.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
