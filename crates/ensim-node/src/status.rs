//! Latest status per source, fed by the node's stats collector.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use ensim_core::{NodeStatus, StatusReceiver, StatusSource};

#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    entries: Arc<RwLock<HashMap<StatusSource, NodeStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<StatusSource, NodeStatus>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<StatusSource, NodeStatus>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `status` as the latest of its source.
    pub fn record(&self, status: NodeStatus) {
        self.write().insert(status.source, status);
    }

    pub fn get(&self, source: StatusSource) -> Option<NodeStatus> {
        self.read().get(&source).cloned()
    }

    pub fn snapshot(&self) -> HashMap<StatusSource, NodeStatus> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drain `rx` into the board until `cancel` fires.
    ///
    /// The receiver is dropped on return, after which producers discard
    /// their events instead of waiting.
    pub async fn collect(self, mut rx: StatusReceiver, cancel: CancellationToken) {
        debug!("stats collector started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                status = rx.recv() => match status {
                    Some(status) => self.record(status),
                    None => break,
                },
            }
        }
        debug!("stats collector stopped");
    }
}
