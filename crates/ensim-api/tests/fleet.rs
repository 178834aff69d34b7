//! End-to-end fleet scenarios against the in-process control plane.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use ensim_agents::{LocalTokenProvider, LoopbackFleet};
use ensim_api::{FleetService, NodeOptions, ServiceError};
use ensim_core::{AgentState, AgentType, Credentials, Settings, SimConfig};
use ensim_node::{LocalOnboarder, NodeCollaborators, Onboarder, OnboardError, OnboardResult};
use ensim_store::{EventType, Store};
use tokio_util::sync::CancellationToken;

const TENANT: &str = "7d6c5b4a-3928-4716-a5b4-c3d2e1f00a1b";

fn config(dir: &std::path::Path) -> SimConfig {
    let mut config = SimConfig::default();
    config.base_folder = dir.to_path_buf();
    config.delete_batch_size = 4;
    config.timings.provision_settle = "10ms".into();
    config.timings.node_agent_interval = "200ms".into();
    config.timings.hd_agent_interval = "200ms".into();
    config.timings.update_agent_interval = "200ms".into();
    config.timings.telemetry_agent_interval = "200ms".into();
    config.timings.backoff_interval = "20ms".into();
    config
}

fn options() -> NodeOptions {
    NodeOptions {
        credentials: Credentials {
            onboard_username: "onboard".into(),
            onboard_password: "onboard-pass".into(),
            api_username: "api".into(),
            api_password: "api-pass".into(),
            project: "itep".into(),
        },
        enable_nio: true,
        enable_teardown: false,
    }
}

fn service(dir: &std::path::Path, onboarder: Arc<dyn Onboarder>) -> (FleetService, LoopbackFleet) {
    let fleet = LoopbackFleet::new();
    let collaborators = NodeCollaborators {
        onboarder,
        connector: Arc::new(fleet.clone()),
        tokens: Arc::new(LocalTokenProvider::new(TENANT)),
    };
    let svc = FleetService::new(Store::new(), config(dir), collaborators).unwrap();
    (svc, fleet)
}

#[tokio::test]
async fn create_list_update_get_delete() {
    let dir = tempfile::tempdir().unwrap();
    let (svc, fleet) = service(dir.path(), Arc::new(LocalOnboarder::new()));

    let node = svc.create_node("", &options()).await.unwrap();
    let uuid = node.uuid().to_string();
    assert!(dir.path().join(&uuid).join("tenantId").exists());

    let listed = svc.list_nodes().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].uuid(), uuid);

    let all_off: HashMap<_, _> = AgentType::ALL.iter().map(|t| (*t, AgentState::Off)).collect();
    svc.update_node(&uuid, &all_off).await.unwrap();

    let states = svc.get_node(&uuid).await.unwrap().agents_states();
    assert!(AgentType::ALL
        .iter()
        .all(|t| states.current[t] == AgentState::Off && states.desired[t] == AgentState::Off));

    // Off agents stop calling the control plane.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let before = fleet.calls(AgentType::Hd);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(fleet.calls(AgentType::Hd), before);

    svc.delete_node(&uuid).await.unwrap();
    assert!(svc.list_nodes().await.is_empty());
    assert!(!dir.path().join(&uuid).exists());
    assert!(matches!(
        svc.get_node(&uuid).await,
        Err(ServiceError::Store(_))
    ));
}

#[tokio::test]
async fn bulk_create_in_batches() {
    let dir = tempfile::tempdir().unwrap();
    let (svc, _fleet) = service(dir.path(), Arc::new(LocalOnboarder::new()));

    let uuids = svc.create_nodes(10, 3, &options()).await.unwrap();
    assert_eq!(uuids.len(), 10);
    assert_eq!(svc.list_nodes().await.len(), 10);

    assert!(matches!(
        svc.delete_nodes(11).await,
        Err(ServiceError::InvalidArgument(_))
    ));
    assert_eq!(svc.delete_nodes(4).await.unwrap(), 4);
    assert_eq!(svc.list_nodes().await.len(), 6);
    assert_eq!(svc.delete_nodes(0).await.unwrap(), 6);
    assert!(svc.list_nodes().await.is_empty());
}

/// Fails the onboarding of exactly one node.
struct FlakyOnboarder {
    inner: LocalOnboarder,
    onboards: AtomicU32,
    fail_at: u32,
}

#[async_trait]
impl Onboarder for FlakyOnboarder {
    async fn fetch_artifacts(&self, s: &Settings) -> OnboardResult<()> {
        self.inner.fetch_artifacts(s).await
    }
    async fn register_host(&self, s: &Settings) -> OnboardResult<()> {
        self.inner.register_host(s).await
    }
    async fn onboard(&self, s: &Settings) -> OnboardResult<String> {
        if self.onboards.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_at {
            return Err(OnboardError::Rejected("onboarding stream refused".into()));
        }
        self.inner.onboard(s).await
    }
    async fn provision(&self, s: &Settings) -> OnboardResult<()> {
        self.inner.provision(s).await
    }
    async fn set_credentials(&self, s: &Settings) -> OnboardResult<()> {
        self.inner.set_credentials(s).await
    }
    async fn teardown(&self, s: &Settings) -> OnboardResult<()> {
        self.inner.teardown(s).await
    }
}

#[tokio::test]
async fn bulk_create_reports_only_failed_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let onboarder = Arc::new(FlakyOnboarder {
        inner: LocalOnboarder::new(),
        onboards: AtomicU32::new(0),
        fail_at: 5,
    });
    let (svc, _fleet) = service(dir.path(), onboarder);

    let err = svc.create_nodes(10, 3, &options()).await.unwrap_err();
    let ServiceError::Batch { succeeded, failures } = err else {
        panic!("expected a batch error, got {err:?}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(succeeded.len(), 9);
    assert!(failures[0].error.contains("onboarding stream refused"));
    assert!(!succeeded.contains(&failures[0].uuid));

    assert_eq!(svc.list_nodes().await.len(), 9);
    assert!(!dir.path().join(&failures[0].uuid).exists());
    svc.shutdown().await;
    assert!(svc.list_nodes().await.is_empty());
}

#[tokio::test]
async fn watch_replays_then_follows() {
    let dir = tempfile::tempdir().unwrap();
    let (svc, _fleet) = service(dir.path(), Arc::new(LocalOnboarder::new()));
    let first = svc.create_node("", &options()).await.unwrap();

    let cancel = CancellationToken::new();
    let mut rx = svc.watch_nodes(cancel.clone(), true, true).await;
    let replayed = rx.recv().await.unwrap();
    assert_eq!(replayed.kind, EventType::None);
    assert_eq!(replayed.uuid, first.uuid());

    let second = svc.create_node("", &options()).await.unwrap();
    let created = rx.recv().await.unwrap();
    assert_eq!(created.kind, EventType::Created);
    assert_eq!(created.uuid, second.uuid());

    svc.delete_node(first.uuid()).await.unwrap();
    let deleted = rx.recv().await.unwrap();
    assert_eq!(deleted.kind, EventType::Deleted);
    assert!(deleted.value.is_none());

    cancel.cancel();
    assert!(rx.recv().await.is_none());
    svc.shutdown().await;
}

#[tokio::test]
async fn concurrent_creates_with_one_uuid_keep_the_winner_intact() {
    let dir = tempfile::tempdir().unwrap();
    let (svc, _fleet) = service(dir.path(), Arc::new(LocalOnboarder::new()));
    let uuid = "5a4b3c2d-1e0f-4a9b-8c7d-6e5f4a3b2c1d";
    let opts = options();

    let (a, b) = tokio::join!(svc.create_node(uuid, &opts), svc.create_node(uuid, &opts));
    let (winner, loser) = match (a, b) {
        (Ok(node), Err(e)) | (Err(e), Ok(node)) => (node, e),
        (a, b) => panic!("expected exactly one create to succeed, got {a:?} and {b:?}"),
    };
    assert_eq!(winner.uuid(), uuid);
    assert!(matches!(loser, ServiceError::AlreadyExists(_)), "{loser:?}");

    assert_eq!(svc.list_nodes().await.len(), 1);
    assert!(dir.path().join(uuid).join("tenantId").exists());

    // Once stored, the UUID stays taken.
    assert!(matches!(
        svc.create_node(uuid, &opts).await,
        Err(ServiceError::AlreadyExists(_))
    ));
    assert!(dir.path().join(uuid).join("tenantId").exists());
    svc.shutdown().await;
}
