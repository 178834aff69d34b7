//! Store — UUID-keyed map of running nodes.
//!
//! The whole map sits behind one `RwLock`. Values are handed out as
//! `Arc<N>`, so a caller can keep using a node after it has been removed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::watch::{Event, EventType, WatchOptions, Watchers, WATCH_CHANNEL_SIZE};

/// Anything the store can hold: it only needs to know the key.
pub trait StoreEntry: Send + Sync + 'static {
    fn uuid(&self) -> &str;
}

pub struct Store<N> {
    nodes: Arc<RwLock<HashMap<String, Arc<N>>>>,
    watchers: Watchers<N>,
}

impl<N> Clone for Store<N> {
    fn clone(&self) -> Self {
        Self {
            nodes: Arc::clone(&self.nodes),
            watchers: self.watchers.clone(),
        }
    }
}

impl<N: StoreEntry> Default for Store<N> {
    fn default() -> Self {
        Self {
            nodes: Arc::new(RwLock::new(HashMap::new())),
            watchers: Watchers::new(),
        }
    }
}

impl<N: StoreEntry> Store<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node and emit a `Created` event.
    pub async fn add(&self, node: Arc<N>) -> StoreResult<()> {
        let uuid = node.uuid().to_string();
        if uuid.is_empty() {
            return Err(StoreError::EmptyUuid);
        }
        {
            let mut nodes = self.nodes.write().await;
            if nodes.contains_key(&uuid) {
                return Err(StoreError::AlreadyExists(uuid));
            }
            nodes.insert(uuid.clone(), Arc::clone(&node));
        }
        debug!(%uuid, "node stored");
        self.watchers
            .send(Event::new(EventType::Created, uuid, Some(node)));
        Ok(())
    }

    /// Remove a node and emit a `Deleted` event without value.
    pub async fn remove(&self, uuid: &str) -> StoreResult<Arc<N>> {
        if uuid.is_empty() {
            return Err(StoreError::EmptyUuid);
        }
        let node = self
            .nodes
            .write()
            .await
            .remove(uuid)
            .ok_or_else(|| StoreError::NotFound(uuid.to_string()))?;
        debug!(%uuid, "node removed");
        self.watchers.send(Event::new(EventType::Deleted, uuid, None));
        Ok(node)
    }

    pub async fn get(&self, uuid: &str) -> StoreResult<Arc<N>> {
        self.nodes
            .read()
            .await
            .get(uuid)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(uuid.to_string()))
    }

    pub async fn contains(&self, uuid: &str) -> bool {
        self.nodes.read().await.contains_key(uuid)
    }

    /// Every stored node, in no particular order.
    pub async fn list(&self) -> Vec<Arc<N>> {
        self.nodes.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }

    pub fn watchers(&self) -> &Watchers<N> {
        &self.watchers
    }

    /// Open a watch on the store.
    ///
    /// With `replay`, a `None` event is sent for every node stored at the
    /// time the replay runs; nodes added or removed meanwhile may or may
    /// not show up in it. With `monitor`, live events follow until `cancel`
    /// fires or the receiver is dropped. Without it the stream ends once
    /// the replay is done.
    pub async fn watch(
        &self,
        cancel: CancellationToken,
        options: WatchOptions,
    ) -> mpsc::Receiver<Event<N>> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_SIZE);
        let id = Uuid::new_v4();
        if options.monitor {
            self.watchers.register(id, tx.clone()).await;
        }
        debug!(watcher = %id, replay = options.replay, monitor = options.monitor, "watch opened");

        let store = self.clone();
        tokio::spawn(async move {
            if options.replay {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = store.replay(&tx) => {}
                }
            }
            if options.monitor {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tx.closed() => {}
                }
                store.watchers.deregister(id).await;
            }
            debug!(watcher = %id, "watch closed");
        });
        rx
    }

    async fn replay(&self, tx: &mpsc::Sender<Event<N>>) {
        for node in self.list().await {
            let event = Event::new(EventType::None, node.uuid(), Some(Arc::clone(&node)));
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
}
