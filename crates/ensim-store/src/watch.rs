//! Store change events and their fan-out to watchers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::trace;
use uuid::Uuid;

/// Capacity of every watcher's channel.
pub const WATCH_CHANNEL_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Replay of a node that was already stored.
    None,
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::None => "none",
            EventType::Created => "created",
            EventType::Updated => "updated",
            EventType::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// One store change. `value` is `None` for deletions.
#[derive(Debug)]
pub struct Event<N> {
    pub kind: EventType,
    pub uuid: String,
    pub value: Option<Arc<N>>,
}

impl<N> Clone for Event<N> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            uuid: self.uuid.clone(),
            value: self.value.clone(),
        }
    }
}

impl<N> Event<N> {
    pub fn new(kind: EventType, uuid: impl Into<String>, value: Option<Arc<N>>) -> Self {
        Self {
            kind,
            uuid: uuid.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Emit a `None` event for every node stored when the watch starts.
    pub replay: bool,
    /// Stay registered for live events until cancelled.
    pub monitor: bool,
}

/// Registered watcher channels, keyed by watcher id.
pub struct Watchers<N> {
    senders: Arc<RwLock<HashMap<Uuid, mpsc::Sender<Event<N>>>>>,
}

impl<N> Clone for Watchers<N> {
    fn clone(&self) -> Self {
        Self {
            senders: Arc::clone(&self.senders),
        }
    }
}

impl<N> Default for Watchers<N> {
    fn default() -> Self {
        Self {
            senders: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<N: Send + Sync + 'static> Watchers<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: Uuid, tx: mpsc::Sender<Event<N>>) {
        self.senders.write().await.insert(id, tx);
        trace!(%id, "watcher registered");
    }

    pub async fn deregister(&self, id: Uuid) {
        if self.senders.write().await.remove(&id).is_some() {
            trace!(%id, "watcher deregistered");
        }
    }

    pub async fn len(&self) -> usize {
        self.senders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.senders.read().await.is_empty()
    }

    /// Deliver `event` to every registered watcher.
    ///
    /// Returns immediately. Delivery runs on its own task and visits the
    /// watchers one after another, so a full channel delays the watchers
    /// behind it for this event only.
    pub fn send(&self, event: Event<N>) {
        let senders = Arc::clone(&self.senders);
        tokio::spawn(async move {
            let targets: Vec<_> = senders.read().await.values().cloned().collect();
            for tx in targets {
                if tx.send(event.clone()).await.is_err() {
                    trace!(uuid = %event.uuid, "watcher gone, event dropped");
                }
            }
        });
    }
}
