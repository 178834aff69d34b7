//! EdgeNode — one simulated edge node from onboarding to teardown.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::watch;
use tracing::{error, info, warn, Instrument};

use ensim_agents::{Agents, FleetConnector, TokenManager, TokenProvider};
use ensim_core::{
    status_channel, AgentState, AgentType, NodeLifecycle, NodeStatus, Settings, StateMap,
    StatusReceiver, StatusSender, StatusSource, UpdateStatus,
};
use ensim_store::StoreEntry;

use crate::error::{NodeError, NodeResult, OnboardResult};
use crate::onboard::Onboarder;
use crate::status::StatusBoard;

/// Shared services every node of a fleet is started with.
#[derive(Clone)]
pub struct NodeCollaborators {
    pub onboarder: Arc<dyn Onboarder>,
    pub connector: Arc<dyn FleetConnector>,
    pub tokens: Arc<dyn TokenProvider>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePhase {
    Created,
    RequirementsReady,
    Onboarded,
    Provisioned,
    CredentialsSet,
    AgentsRunning,
    TeardownPending,
    Stopped,
}

impl fmt::Display for NodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodePhase::Created => "created",
            NodePhase::RequirementsReady => "requirements_ready",
            NodePhase::Onboarded => "onboarded",
            NodePhase::Provisioned => "provisioned",
            NodePhase::CredentialsSet => "credentials_set",
            NodePhase::AgentsRunning => "agents_running",
            NodePhase::TeardownPending => "teardown_pending",
            NodePhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub struct EdgeNode {
    settings: Arc<Settings>,
    collaborators: NodeCollaborators,
    lifecycle: NodeLifecycle,
    status: StatusSender,
    status_rx: Mutex<Option<StatusReceiver>>,
    board: StatusBoard,
    agents: OnceLock<Agents>,
    phase: watch::Sender<NodePhase>,
    started: AtomicBool,
    teardown_armed: AtomicBool,
}

impl fmt::Debug for EdgeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeNode")
            .field("uuid", &self.settings.uuid)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl StoreEntry for EdgeNode {
    fn uuid(&self) -> &str {
        &self.settings.uuid
    }
}

impl EdgeNode {
    pub fn new(settings: Settings, collaborators: NodeCollaborators) -> Self {
        let (status, status_rx) = status_channel(settings.timings.status_queue_size);
        let (phase, _) = watch::channel(NodePhase::Created);
        Self {
            lifecycle: NodeLifecycle::new(&settings.uuid),
            settings: Arc::new(settings),
            collaborators,
            status,
            status_rx: Mutex::new(Some(status_rx)),
            board: StatusBoard::new(),
            agents: OnceLock::new(),
            phase,
            started: AtomicBool::new(false),
            teardown_armed: AtomicBool::new(false),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.settings.uuid
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn phase(&self) -> NodePhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<NodePhase> {
        self.phase.subscribe()
    }

    /// Resolves to `true` once the node's agents are up.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.lifecycle.ready()
    }

    fn set_phase(&self, phase: NodePhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            info!(parent: self.lifecycle.span(), from = %previous, to = %phase, "node phase changed");
        }
    }

    /// Run the node up to running agents.
    ///
    /// Every stage reports its own status. On error the node is left half
    /// started; the caller is expected to `stop` it.
    pub async fn start(&self) -> NodeResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyStarted);
        }
        let span = self.lifecycle.span().clone();
        async {
            self.start_requirements().await?;
            self.start_onboard_provision().await?;
            self.settle().await?;
            self.start_agents().await?;
            if self.settings.setup_teardown {
                self.arm_teardown().await;
            }
            info!("edge node onboarded and started");
            self.status
                .ok(StatusSource::Setup, "successfully onboarded/started")
                .await;
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Terminate every task of the node, wait for them, and delete the
    /// node's folder.
    pub async fn stop(&self) -> NodeResult<()> {
        if self.teardown_armed.load(Ordering::SeqCst) {
            self.set_phase(NodePhase::TeardownPending);
        }
        info!(parent: self.lifecycle.span(), "waiting for node tasks to stop");
        self.lifecycle.shutdown().await;

        let base = &self.settings.base_folder;
        match tokio::fs::remove_dir_all(base).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                error!(parent: self.lifecycle.span(), path = %base.display(), error = %source, "failed to delete node folder");
                return Err(NodeError::Folder {
                    path: base.clone(),
                    source,
                });
            }
        }
        self.set_phase(NodePhase::Stopped);
        info!(parent: self.lifecycle.span(), "edge node stopped");
        Ok(())
    }

    // ── Agents ─────────────────────────────────────────────────

    fn agents(&self) -> NodeResult<&Agents> {
        self.agents.get().ok_or(NodeError::AgentsNotRunning)
    }

    pub fn set_agents_states(&self, states: &HashMap<AgentType, AgentState>) -> NodeResult<()> {
        self.agents()?.set_desired_states(states);
        Ok(())
    }

    /// Agent state tables; empty while the agents are not running.
    pub fn agents_states(&self) -> StateMap {
        self.agents().map(Agents::states).unwrap_or_default()
    }

    pub fn agents_status(&self) -> HashMap<StatusSource, NodeStatus> {
        self.board.snapshot()
    }

    pub fn update_status(&self) -> Option<UpdateStatus> {
        self.agents().ok().map(Agents::update_status)
    }

    // ── Start stages ───────────────────────────────────────────

    async fn start_requirements(&self) -> NodeResult<()> {
        let rx = self
            .status_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(rx) = rx {
            self.lifecycle
                .spawn(self.board.clone().collect(rx, self.lifecycle.token()));
        }

        let base = &self.settings.base_folder;
        if let Err(source) = tokio::fs::create_dir_all(base).await {
            error!(path = %base.display(), error = %source, "failed to create base folder");
            self.status
                .failed(
                    StatusSource::Requirements,
                    format!("failed to create base folders: {source}"),
                )
                .await;
            return Err(NodeError::Folder {
                path: base.clone(),
                source,
            });
        }

        if let Err(e) = self.collaborators.onboarder.fetch_artifacts(&self.settings).await {
            warn!(error = %e, "failed to fetch artifacts");
            self.status
                .failed(StatusSource::Requirements, e.to_string())
                .await;
        }
        self.status.ok(StatusSource::Requirements, "").await;
        self.set_phase(NodePhase::RequirementsReady);
        Ok(())
    }

    async fn start_onboard_provision(&self) -> NodeResult<()> {
        let limit = self.settings.timings.onboard_timeout;
        match tokio::time::timeout(limit, self.onboard_provision()).await {
            Ok(result) => result,
            Err(_) => {
                error!(?limit, "onboarding timed out");
                self.status
                    .failed(StatusSource::Onboarded, format!("timed out after {limit:?}"))
                    .await;
                Err(NodeError::OnboardTimeout(limit))
            }
        }
    }

    async fn onboard_provision(&self) -> NodeResult<()> {
        let onb = &self.collaborators.onboarder;
        let settings = &*self.settings;

        self.stage(StatusSource::Registered, async {
            onb.register_host(settings).await.map(|()| String::new())
        })
        .await?;
        self.stage(StatusSource::Onboarded, onb.onboard(settings)).await?;
        self.set_phase(NodePhase::Onboarded);

        self.stage(StatusSource::Provisioned, async {
            onb.provision(settings).await.map(|()| String::new())
        })
        .await?;
        self.set_phase(NodePhase::Provisioned);

        self.stage(StatusSource::Credentials, async {
            onb.set_credentials(settings).await.map(|()| String::new())
        })
        .await?;
        self.set_phase(NodePhase::CredentialsSet);
        Ok(())
    }

    /// Run one onboarding stage and report its outcome under `source`.
    async fn stage<F>(&self, source: StatusSource, fut: F) -> NodeResult<()>
    where
        F: Future<Output = OnboardResult<String>>,
    {
        match fut.await {
            Ok(details) => {
                self.status.ok(source, details).await;
                Ok(())
            }
            Err(e) => {
                error!(stage = %source, error = %e, "onboarding stage failed");
                self.status.failed(source, e.to_string()).await;
                Err(NodeError::Onboard { stage: source, source: e })
            }
        }
    }

    async fn settle(&self) -> NodeResult<()> {
        tokio::select! {
            _ = self.lifecycle.cancelled() => Err(NodeError::Cancelled),
            _ = tokio::time::sleep(self.settings.timings.provision_settle) => Ok(()),
        }
    }

    async fn start_agents(&self) -> NodeResult<()> {
        let tokens = Arc::new(TokenManager::new(
            Arc::clone(&self.settings),
            Arc::clone(&self.collaborators.tokens),
        ));
        if let Err(e) = tokens.start(&self.lifecycle).await {
            error!(error = %e, "failed to start token manager");
            self.status
                .failed(
                    StatusSource::TokenManager,
                    format!("failed to start token manager: {e}"),
                )
                .await;
            return Err(e.into());
        }
        self.status.ok(StatusSource::TokenManager, "").await;

        if !self.settings.run_agents {
            self.lifecycle.signal_ready();
            return Ok(());
        }

        let started = async {
            let agents = Agents::new(
                self.lifecycle.clone(),
                self.status.clone(),
                Arc::clone(&self.settings),
                Arc::clone(&self.collaborators.connector),
            )?;
            agents.start().await?;
            Ok::<_, NodeError>(agents)
        }
        .await;

        match started {
            Ok(agents) => {
                // start() runs once per node, so the cell is always empty here.
                let _ = self.agents.set(agents);
                self.set_phase(NodePhase::AgentsRunning);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to start simulated agents");
                self.status
                    .failed(
                        StatusSource::Setup,
                        format!("failed to start simulated agents: {e}"),
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// Spawn the task that removes the host record once the node is told
    /// to terminate.
    async fn arm_teardown(&self) {
        let onboarder = Arc::clone(&self.collaborators.onboarder);
        let settings = Arc::clone(&self.settings);
        let lifecycle = self.lifecycle.clone();
        self.lifecycle.spawn(async move {
            lifecycle.cancelled().await;
            let limit = settings.timings.onboard_timeout;
            match tokio::time::timeout(limit, onboarder.teardown(&settings)).await {
                Ok(Ok(())) => info!("teardown finished"),
                Ok(Err(e)) => error!(error = %e, "failed to teardown"),
                Err(_) => error!(?limit, "teardown timed out"),
            }
        });
        self.teardown_armed.store(true, Ordering::SeqCst);
        info!("teardown enabled");
        self.status.ok(StatusSource::Teardown, "teardown armed").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use async_trait::async_trait;
    use ensim_agents::{LocalTokenProvider, LoopbackFleet};
    use ensim_core::{Credentials, StatusMode};

    use crate::onboard::LocalOnboarder;

    const TENANT: &str = "0f0e0d0c-0b0a-4908-8706-050403020100";

    fn settings(dir: &std::path::Path, uuid: &str) -> Settings {
        let mut s = Settings::new(uuid, dir.join(uuid));
        s.credentials = Credentials {
            onboard_username: "onb".into(),
            onboard_password: "pass".into(),
            api_username: "api".into(),
            api_password: "pass".into(),
            project: String::new(),
        };
        s.timings.provision_settle = Duration::from_millis(10);
        s.timings.node_agent_interval = Duration::from_millis(200);
        s.timings.hd_agent_interval = Duration::from_millis(200);
        s.timings.update_agent_interval = Duration::from_millis(200);
        s.timings.telemetry_agent_interval = Duration::from_millis(200);
        s.timings.backoff_interval = Duration::from_millis(20);
        s.timings.status_queue_size = 32;
        s
    }

    fn collaborators(onboarder: Arc<dyn Onboarder>, fleet: &LoopbackFleet) -> NodeCollaborators {
        NodeCollaborators {
            onboarder,
            connector: Arc::new(fleet.clone()),
            tokens: Arc::new(LocalTokenProvider::new(TENANT)),
        }
    }

    async fn wait_for_status(node: &EdgeNode, source: StatusSource) -> NodeStatus {
        for _ in 0..100 {
            if let Some(status) = node.board.get(source) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no {source} status recorded");
    }

    #[tokio::test]
    async fn start_runs_every_stage_and_stop_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = LoopbackFleet::new();
        let s = settings(dir.path(), "11111111-2222-4333-8444-555555555555");
        let base = s.base_folder.clone();
        let node = EdgeNode::new(s, collaborators(Arc::new(LocalOnboarder::new()), &fleet));

        node.start().await.unwrap();
        assert_eq!(node.phase(), NodePhase::AgentsRunning);
        assert!(*node.ready().borrow());
        assert!(base.join("tenantId").exists());

        let setup = wait_for_status(&node, StatusSource::Setup).await;
        assert_eq!(setup.mode, StatusMode::Ok);
        for source in [
            StatusSource::Requirements,
            StatusSource::Registered,
            StatusSource::Onboarded,
            StatusSource::Provisioned,
            StatusSource::Credentials,
            StatusSource::TokenManager,
        ] {
            assert_eq!(wait_for_status(&node, source).await.mode, StatusMode::Ok);
        }
        wait_for_status(&node, StatusSource::NodeAgent).await;

        let states = node.agents_states();
        assert!(states.current.values().all(|s| *s == AgentState::On));

        node.set_agents_states(&HashMap::from([(AgentType::Hd, AgentState::Off)]))
            .unwrap();
        assert_eq!(node.agents_states().current[&AgentType::Hd], AgentState::Off);

        node.stop().await.unwrap();
        assert_eq!(node.phase(), NodePhase::Stopped);
        assert!(!base.exists());
        assert_eq!(node.lifecycle.running_tasks(), 0);
        assert!(matches!(node.start().await, Err(NodeError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn onboarding_failure_aborts_start() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = LoopbackFleet::new();
        let mut s = settings(dir.path(), "22222222-2222-4333-8444-555555555555");
        s.credentials.onboard_password.clear();
        let node = EdgeNode::new(s, collaborators(Arc::new(LocalOnboarder::new()), &fleet));

        let err = node.start().await.unwrap_err();
        assert!(matches!(
            err,
            NodeError::Onboard { stage: StatusSource::Onboarded, .. }
        ));
        let onboarded = wait_for_status(&node, StatusSource::Onboarded).await;
        assert_eq!(onboarded.mode, StatusMode::Failed);
        assert!(node.board.get(StatusSource::Provisioned).is_none());
        assert!(matches!(
            node.set_agents_states(&HashMap::new()),
            Err(NodeError::AgentsNotRunning)
        ));
        assert_eq!(fleet.connects(AgentType::Node), 0);

        node.stop().await.unwrap();
    }

    #[tokio::test]
    async fn agents_stay_down_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = LoopbackFleet::new();
        let mut s = settings(dir.path(), "33333333-2222-4333-8444-555555555555");
        s.run_agents = false;
        let node = EdgeNode::new(s, collaborators(Arc::new(LocalOnboarder::new()), &fleet));

        node.start().await.unwrap();
        assert_eq!(node.phase(), NodePhase::CredentialsSet);
        assert!(*node.ready().borrow());
        assert_eq!(node.agents_states(), StateMap::default());
        assert!(node.update_status().is_none());
        node.stop().await.unwrap();
    }

    #[derive(Default)]
    struct CountingTeardown {
        teardowns: AtomicU32,
    }

    #[async_trait]
    impl Onboarder for CountingTeardown {
        async fn fetch_artifacts(&self, _: &Settings) -> OnboardResult<()> {
            Ok(())
        }
        async fn register_host(&self, _: &Settings) -> OnboardResult<()> {
            Ok(())
        }
        async fn onboard(&self, _: &Settings) -> OnboardResult<String> {
            Ok(String::new())
        }
        async fn provision(&self, s: &Settings) -> OnboardResult<()> {
            LocalOnboarder::new().provision(s).await
        }
        async fn set_credentials(&self, _: &Settings) -> OnboardResult<()> {
            Ok(())
        }
        async fn teardown(&self, _: &Settings) -> OnboardResult<()> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn teardown_runs_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = LoopbackFleet::new();
        let mut s = settings(dir.path(), "44444444-2222-4333-8444-555555555555");
        s.setup_teardown = true;
        let onboarder = Arc::new(CountingTeardown::default());
        let node = EdgeNode::new(s, collaborators(onboarder.clone(), &fleet));

        node.start().await.unwrap();
        assert_eq!(onboarder.teardowns.load(Ordering::SeqCst), 0);
        node.stop().await.unwrap();
        assert_eq!(onboarder.teardowns.load(Ordering::SeqCst), 1);
    }
}
