//! FleetService — northbound operations over the node store.
//!
//! Creating a node means building its settings, starting it and storing
//! it; a node that fails to start is stopped again and never stored.
//! Bulk operations run in batches: every node of a batch runs
//! concurrently, and the next batch starts once the previous one is done.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use ensim_core::{AgentState, AgentType, Credentials, Settings, SimConfig, Timings};
use ensim_node::{EdgeNode, NodeCollaborators, NodeError};
use ensim_store::{Event, Store, WatchOptions};

use crate::error::{BatchFailure, ServiceError, ServiceResult};

/// Per-node options supplied by the caller of a create operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct NodeOptions {
    pub credentials: Credentials,
    pub enable_nio: bool,
    pub enable_teardown: bool,
}

#[derive(Clone)]
pub struct FleetService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    store: Store<EdgeNode>,
    config: SimConfig,
    timings: Timings,
    collaborators: NodeCollaborators,
    shutdown: CancellationToken,
    /// UUIDs of nodes being created but not yet stored.
    pending: Mutex<HashSet<String>>,
}

/// Holds a UUID in `pending` until dropped.
struct Reservation<'a> {
    pending: &'a Mutex<HashSet<String>>,
    uuid: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.uuid);
    }
}

impl FleetService {
    pub fn new(
        store: Store<EdgeNode>,
        config: SimConfig,
        collaborators: NodeCollaborators,
    ) -> ServiceResult<Self> {
        let timings = config.timings.to_timings()?;
        Ok(Self {
            inner: Arc::new(ServiceInner {
                store,
                config,
                timings,
                collaborators,
                shutdown: CancellationToken::new(),
                pending: Mutex::new(HashSet::new()),
            }),
        })
    }

    pub fn store(&self) -> &Store<EdgeNode> {
        &self.inner.store
    }

    pub fn config(&self) -> &SimConfig {
        &self.inner.config
    }

    /// Cancelled once `shutdown` begins; watches are tied to it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    // ── Create ─────────────────────────────────────────────────

    /// Create, start and store one node. An empty `uuid` gets a fresh one.
    pub async fn create_node(&self, uuid: &str, options: &NodeOptions) -> ServiceResult<Arc<EdgeNode>> {
        let uuid = new_uuid(uuid)?;
        // Reserved until stored, so a concurrent create of the same UUID is
        // rejected before it can touch the node folder.
        let _reservation = self.reserve(&uuid)?;
        if self.inner.store.contains(&uuid).await {
            return Err(ServiceError::AlreadyExists(uuid));
        }
        let settings = self.node_settings(&uuid, options).await?;
        let node = Arc::new(EdgeNode::new(settings, self.inner.collaborators.clone()));

        info!(%uuid, "starting node");
        if let Err(source) = node.start().await {
            error!(%uuid, error = %source, "failed to start node");
            self.stop_quietly(&node).await;
            return Err(ServiceError::Node { uuid, source });
        }

        if let Err(e) = self.inner.store.add(Arc::clone(&node)).await {
            error!(%uuid, error = %e, "failed to store node");
            self.stop_quietly(&node).await;
            return Err(e.into());
        }
        info!(%uuid, "node created");
        Ok(node)
    }

    /// Create `number` nodes, `batch_size` at a time.
    ///
    /// Returns the UUIDs of the created nodes. If any node fails, the error
    /// lists the failed nodes along with the ones that were created.
    pub async fn create_nodes(
        &self,
        number: usize,
        batch_size: usize,
        options: &NodeOptions,
    ) -> ServiceResult<Vec<String>> {
        if number == 0 {
            return Err(ServiceError::InvalidArgument(
                "number of nodes must be at least 1".into(),
            ));
        }
        let batch = batch_size.clamp(1, number);
        info!(number, batch, "creating nodes");

        let uuids: Vec<String> = (0..number).map(|_| Uuid::new_v4().to_string()).collect();
        let mut created = Vec::with_capacity(number);
        let mut failures = Vec::new();

        for (i, chunk) in uuids.chunks(batch).enumerate() {
            let results = join_all(chunk.iter().map(|uuid| self.create_node(uuid, options))).await;
            for (uuid, result) in chunk.iter().zip(results) {
                match result {
                    Ok(_) => created.push(uuid.clone()),
                    Err(e) => failures.push(BatchFailure {
                        uuid: uuid.clone(),
                        error: e.to_string(),
                    }),
                }
            }
            info!(batch = i + 1, created = created.len(), failed = failures.len(), "node batch done");
        }

        if failures.is_empty() {
            Ok(created)
        } else {
            warn!(failed = failures.len(), "bulk create finished with failures");
            Err(ServiceError::Batch {
                succeeded: created,
                failures,
            })
        }
    }

    // ── Read ───────────────────────────────────────────────────

    pub async fn get_node(&self, uuid: &str) -> ServiceResult<Arc<EdgeNode>> {
        if uuid.is_empty() {
            return Err(ServiceError::InvalidArgument("empty node uuid".into()));
        }
        Ok(self.inner.store.get(uuid).await?)
    }

    pub async fn list_nodes(&self) -> Vec<Arc<EdgeNode>> {
        self.inner.store.list().await
    }

    /// Store events of every node, for as long as `cancel` is live.
    ///
    /// `replay` sends every existing node first; `subscribe` keeps the
    /// stream open for live changes.
    pub async fn watch_nodes(
        &self,
        cancel: CancellationToken,
        replay: bool,
        subscribe: bool,
    ) -> mpsc::Receiver<Event<EdgeNode>> {
        self.inner
            .store
            .watch(
                cancel,
                WatchOptions {
                    replay,
                    monitor: subscribe,
                },
            )
            .await
    }

    // ── Update ─────────────────────────────────────────────────

    /// Apply desired agent states to a running node.
    pub async fn update_node(
        &self,
        uuid: &str,
        states: &HashMap<AgentType, AgentState>,
    ) -> ServiceResult<()> {
        let node = self.get_node(uuid).await?;
        match node.set_agents_states(states) {
            Ok(()) => {
                info!(%uuid, "node agents updated");
                Ok(())
            }
            Err(NodeError::AgentsNotRunning) => Err(ServiceError::FailedPrecondition(format!(
                "agents of node {uuid} are not running"
            ))),
            Err(source) => Err(ServiceError::Node {
                uuid: uuid.to_string(),
                source,
            }),
        }
    }

    // ── Delete ─────────────────────────────────────────────────

    /// Stop a node, then remove it from the store.
    pub async fn delete_node(&self, uuid: &str) -> ServiceResult<()> {
        let node = self.get_node(uuid).await?;
        info!(%uuid, "stopping node");
        node.stop().await.map_err(|source| ServiceError::Node {
            uuid: uuid.to_string(),
            source,
        })?;
        self.inner.store.remove(uuid).await?;
        info!(%uuid, "node deleted");
        Ok(())
    }

    /// Delete `number` nodes (0 means all of them), in batches of
    /// `delete_batch_size`. Returns how many were deleted.
    pub async fn delete_nodes(&self, number: usize) -> ServiceResult<usize> {
        let nodes = self.inner.store.list().await;
        if number > nodes.len() {
            return Err(ServiceError::InvalidArgument(format!(
                "cannot delete {number} nodes, only {} exist",
                nodes.len()
            )));
        }
        let total = if number == 0 { nodes.len() } else { number };
        let batch = self.inner.config.delete_batch_size.max(1);
        let uuids: Vec<String> = nodes
            .iter()
            .take(total)
            .map(|n| n.uuid().to_string())
            .collect();

        let mut deleted = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for chunk in uuids.chunks(batch) {
            let results = join_all(chunk.iter().map(|uuid| self.delete_node(uuid))).await;
            for (uuid, result) in chunk.iter().zip(results) {
                match result {
                    Ok(()) => deleted.push(uuid.clone()),
                    Err(e) => failures.push(BatchFailure {
                        uuid: uuid.clone(),
                        error: e.to_string(),
                    }),
                }
            }
            info!(deleted = deleted.len(), total, "node delete batch done");
        }

        if failures.is_empty() {
            Ok(deleted.len())
        } else {
            Err(ServiceError::Batch {
                succeeded: deleted,
                failures,
            })
        }
    }

    /// Close every watch and delete every node.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        match self.delete_nodes(0).await {
            Ok(0) => {}
            Ok(n) => info!(deleted = n, "fleet shut down"),
            Err(e) => error!(error = %e, "fleet shutdown incomplete"),
        }
    }

    // ── Helpers ────────────────────────────────────────────────

    fn reserve(&self, uuid: &str) -> ServiceResult<Reservation<'_>> {
        let pending = &self.inner.pending;
        if !pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(uuid.to_string())
        {
            return Err(ServiceError::AlreadyExists(uuid.to_string()));
        }
        Ok(Reservation {
            pending,
            uuid: uuid.to_string(),
        })
    }

    async fn stop_quietly(&self, node: &EdgeNode) {
        if let Err(e) = node.stop().await {
            warn!(uuid = %node.uuid(), error = %e, "failed to stop node");
        }
    }

    async fn node_settings(&self, uuid: &str, options: &NodeOptions) -> ServiceResult<Settings> {
        let config = &self.inner.config;
        let mut settings = Settings::new(uuid, config.base_folder.join(uuid));
        if let Some(path) = &config.orch_ca_path {
            settings.ca_cert = tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ServiceError::Io {
                    path: path.clone(),
                    source,
                })?;
            settings.ca_cert_path = Some(path.clone());
        }
        settings.orch_fqdn = config.orch_fqdn.clone();
        settings.org = config.org.clone();
        settings.credentials = options.credentials.clone();
        settings.nio_onboard = options.enable_nio;
        settings.setup_teardown = options.enable_teardown;
        settings.enable_downloads = config.enable_downloads;
        settings.artifacts_url = config.artifacts_url.clone();
        settings.tinker_actions_version = config.tinker_actions_version.clone();
        settings.agents_manifest_version = config.agents_manifest_version.clone();
        settings.timings = self.inner.timings.clone();
        Ok(settings)
    }
}

/// Validate a caller-supplied node UUID, or generate one if empty.
pub fn new_uuid(uuid: &str) -> ServiceResult<String> {
    if uuid.is_empty() {
        let uuid = Uuid::new_v4().to_string();
        info!(%uuid, "node uuid not provided, generated one");
        return Ok(uuid);
    }
    Uuid::parse_str(uuid)
        .map(|_| uuid.to_string())
        .map_err(|e| ServiceError::InvalidArgument(format!("invalid node uuid {uuid}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_validation() {
        assert!(Uuid::parse_str(&new_uuid("").unwrap()).is_ok());
        let id = "0b7c1f0e-8d3a-4b6e-9f21-3c4d5e6f7a8b";
        assert_eq!(new_uuid(id).unwrap(), id);
        assert!(matches!(new_uuid("not-a-uuid"), Err(ServiceError::InvalidArgument(_))));
    }
}
