//! Agents manager: the four reporting loops of one node.
//!
//! Every agent runs in its own task:
//!
//! 1. report once right away (best effort)
//! 2. on every interval tick, report with constant-backoff retry; once the
//!    retries are exhausted, reconnect the agent's client
//! 3. on every renew tick, reconnect unconditionally
//! 4. exit when the node terminates
//!
//! An agent whose current state is `Off` keeps its task but skips reporting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use ensim_core::proto::{
    GetTelemetryConfigRequest, InstanceState, InstanceStatus, PlatformUpdateStatusRequest,
    PlatformUpdateStatusResponse, UpdateHostSystemInfoRequest, UpdateInstanceStatusRequest,
};
use ensim_core::{
    AgentState, AgentType, NodeLifecycle, Settings, StateMap, StatusSender, StatusSource,
    UpdateStatus,
};
use ensim_pua::Pua;

use crate::auth::{call_context, CallContext};
use crate::client::{FleetClient, FleetConnector};
use crate::error::{AgentsError, AgentsResult, ClientError};
use crate::hwinfo::host_system_info;
use crate::retry::{retry_constant, ConstantBackoff};
use crate::state::AgentStates;

const PUA_CHANNEL_SIZE: usize = 8;

type PuaChannels = (
    mpsc::Receiver<PlatformUpdateStatusResponse>,
    mpsc::Receiver<UpdateStatus>,
);

#[derive(Clone)]
pub struct Agents {
    inner: Arc<AgentsInner>,
}

struct AgentsInner {
    settings: Arc<Settings>,
    lifecycle: NodeLifecycle,
    status: StatusSender,
    states: AgentStates,
    addresses: HashMap<AgentType, String>,
    clients: RwLock<HashMap<AgentType, Arc<dyn FleetClient>>>,
    connector: Arc<dyn FleetConnector>,
    pua: Arc<Pua>,
    pua_resp_tx: mpsc::Sender<PlatformUpdateStatusResponse>,
    /// Receivers handed to the PUA tasks on start.
    pua_channels: Mutex<Option<PuaChannels>>,
    hw_info: UpdateHostSystemInfoRequest,
    reconciles: AtomicU64,
    started: AtomicBool,
}

impl Agents {
    /// Create the agents of one node with every agent `On`.
    pub fn new(
        lifecycle: NodeLifecycle,
        status: StatusSender,
        settings: Arc<Settings>,
        connector: Arc<dyn FleetConnector>,
    ) -> AgentsResult<Self> {
        let (pua_resp_tx, pua_resp_rx) = mpsc::channel(PUA_CHANNEL_SIZE);
        let (pua_state_tx, pua_state_rx) = mpsc::channel(PUA_CHANNEL_SIZE);
        let pua = Pua::new(pua_state_tx)?.with_update_duration(settings.timings.update_duration);

        let addresses = AgentType::ALL
            .iter()
            .map(|t| (*t, t.address(&settings.orch_fqdn)))
            .collect();

        Ok(Self {
            inner: Arc::new(AgentsInner {
                hw_info: host_system_info(&settings.uuid, &settings.serial),
                settings,
                lifecycle,
                status,
                states: AgentStates::all_on(),
                addresses,
                clients: RwLock::new(HashMap::new()),
                connector,
                pua: Arc::new(pua),
                pua_resp_tx,
                pua_channels: Mutex::new(Some((pua_resp_rx, pua_state_rx))),
                reconciles: AtomicU64::new(0),
                started: AtomicBool::new(false),
            }),
        })
    }

    /// Connect every agent, then launch the report loops and the update
    /// agent's schedule handling. Fails without spawning anything if any
    /// client cannot be connected.
    pub async fn start(&self) -> AgentsResult<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(AgentsError::AlreadyStarted);
        }
        let (resp_rx, state_rx) = self
            .inner
            .pua_channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(AgentsError::AlreadyStarted)?;

        self.inner.init_clients().await?;

        let lifecycle = &self.inner.lifecycle;
        for agent in AgentType::ALL {
            lifecycle.spawn(run_agent(self.inner.clone(), agent));
        }
        self.inner.pua.handle(lifecycle, resp_rx);
        lifecycle.spawn(forward_update_states(self.inner.clone(), state_rx));

        lifecycle.signal_ready();
        info!("agents started");
        Ok(())
    }

    /// Apply desired states; reconcile once if anything changed.
    ///
    /// `Unknown` entries are ignored.
    pub fn set_desired_states(&self, states: &HashMap<AgentType, AgentState>) {
        let desired = &self.inner.states.desired;
        let mut changed = false;
        for (agent, state) in states {
            if *state == AgentState::Unknown {
                debug!(%agent, "ignoring unknown desired state");
                continue;
            }
            if desired.set(*agent, *state) != *state {
                changed = true;
            }
        }
        if changed {
            self.inner.reconcile();
        }
    }

    pub fn states(&self) -> StateMap {
        self.inner.states.snapshot()
    }

    pub fn current_state(&self, agent: AgentType) -> AgentsResult<AgentState> {
        match self.inner.states.current.get(agent) {
            AgentState::Unknown => Err(AgentsError::NotFound(agent)),
            state => Ok(state),
        }
    }

    /// Number of reconcile passes run so far.
    pub fn reconcile_count(&self) -> u64 {
        self.inner.reconciles.load(Ordering::SeqCst)
    }

    pub fn update_status(&self) -> UpdateStatus {
        self.inner.pua.state()
    }
}

impl AgentsInner {
    fn reconcile(&self) {
        for agent in AgentType::ALL {
            let desired = self.states.desired.get(agent);
            let previous = self.states.current.set(agent, desired);
            if previous != desired {
                info!(%agent, from = %previous, to = %desired, "agent state reconciled");
            }
        }
        self.reconciles.fetch_add(1, Ordering::SeqCst);
    }

    fn is_off(&self, agent: AgentType) -> bool {
        self.states.current.get(agent) == AgentState::Off
    }

    async fn init_clients(&self) -> AgentsResult<()> {
        let backoff = ConstantBackoff::from_timings(&self.settings.timings);
        let cancel = self.lifecycle.token();
        for agent in AgentType::ALL {
            retry_constant(backoff, &cancel, move || self.instantiate_client(agent, false)).await?;
        }
        Ok(())
    }

    /// Create (or replace) the client of `agent`.
    async fn instantiate_client(&self, agent: AgentType, reconnect: bool) -> AgentsResult<()> {
        let address = self
            .addresses
            .get(&agent)
            .cloned()
            .unwrap_or_else(|| agent.address(&self.settings.orch_fqdn));
        let client = self
            .connector
            .connect(agent, &address, &self.settings)
            .await
            .map_err(|source| AgentsError::Client { agent, source })?;
        self.clients.write().await.insert(agent, client);
        if reconnect {
            info!(%agent, %address, "client reconnected");
        } else {
            debug!(%agent, %address, "client connected");
        }
        Ok(())
    }

    async fn client(&self, agent: AgentType) -> AgentsResult<Arc<dyn FleetClient>> {
        self.clients
            .read()
            .await
            .get(&agent)
            .cloned()
            .ok_or(AgentsError::MissingClient(agent))
    }

    async fn call_context(&self, agent: AgentType) -> AgentsResult<CallContext> {
        let path = self.settings.paths().token(agent.token_client());
        call_context(&path, self.settings.timings.interval(agent)).await
    }

    /// One report of `agent`. Emits the agent's status event.
    async fn report(&self, agent: AgentType) -> AgentsResult<()> {
        if self.is_off(agent) {
            debug!(%agent, "agent off, report skipped");
            return Ok(());
        }
        let ctx = self.call_context(agent).await?;
        let client = self.client(agent).await?;

        let result = match agent {
            AgentType::Node => self.report_instance_status(client.as_ref(), &ctx).await,
            AgentType::Hd => client
                .update_host_system_info(&ctx, self.hw_info.clone())
                .await
                .map(|_| String::new()),
            AgentType::Update => self.report_update_status(client.as_ref(), &ctx).await,
            AgentType::Telemetry => client
                .get_telemetry_config(
                    &ctx,
                    GetTelemetryConfigRequest {
                        guid: self.settings.uuid.clone(),
                    },
                )
                .await
                .map(|_| String::new()),
        };

        match result {
            Ok(details) => {
                debug!(%agent, "report sent");
                self.status.ok(agent.status_source(), details).await;
                Ok(())
            }
            Err(source) => {
                warn!(%agent, error = %source, "report failed");
                self.status
                    .failed(agent.status_source(), format!("failed to send: {source}"))
                    .await;
                Err(AgentsError::Client { agent, source })
            }
        }
    }

    /// "N of M components running", and whether all of them are.
    fn gather_status(&self) -> (String, bool) {
        let total = AgentType::ALL.len();
        let unhealthy: Vec<AgentType> = AgentType::ALL
            .into_iter()
            .filter(|t| self.states.current.get(*t) != AgentState::On)
            .collect();
        let running = total - unhealthy.len();
        if !unhealthy.is_empty() {
            debug!(?unhealthy, "unhealthy components");
        }
        (
            format!("{running} of {total} components running"),
            unhealthy.is_empty(),
        )
    }

    async fn report_instance_status(
        &self,
        client: &dyn FleetClient,
        ctx: &CallContext,
    ) -> Result<String, ClientError> {
        let (summary, healthy) = self.gather_status();
        let status = if healthy {
            InstanceStatus::Running
        } else {
            InstanceStatus::Error
        };
        let req = UpdateInstanceStatusRequest {
            host_guid: self.settings.uuid.clone(),
            instance_state: InstanceState::Running as i32,
            instance_status: status as i32,
            provider_status_detail: summary.clone(),
        };
        client.update_instance_status(ctx, req).await?;
        Ok(summary)
    }

    async fn report_update_status(
        &self,
        client: &dyn FleetClient,
        ctx: &CallContext,
    ) -> Result<String, ClientError> {
        let sent = self.pua.state();
        let resp = client
            .platform_update_status(ctx, PlatformUpdateStatusRequest::new(&self.settings.uuid, sent))
            .await?;

        if self.pua_resp_tx.send(resp).await.is_err() {
            debug!("update agent handler gone, response dropped");
        }
        if sent == UpdateStatus::Updated {
            self.pua.up_to_date();
        }
        Ok(sent.to_string())
    }

    /// Report a PUA state transition without waiting for the next tick.
    async fn push_update_state(&self, status: UpdateStatus) -> AgentsResult<()> {
        let ctx = self.call_context(AgentType::Update).await?;
        let client = self.client(AgentType::Update).await?;
        let req = PlatformUpdateStatusRequest::new(&self.settings.uuid, status);
        match client.platform_update_status(&ctx, req).await {
            Ok(_) => {
                self.status
                    .ok(StatusSource::UpdateAgent, status.to_string())
                    .await;
                Ok(())
            }
            Err(source) => {
                self.status
                    .failed(StatusSource::UpdateAgent, format!("failed to send: {source}"))
                    .await;
                Err(AgentsError::Client {
                    agent: AgentType::Update,
                    source,
                })
            }
        }
    }
}

async fn run_agent(inner: Arc<AgentsInner>, agent: AgentType) {
    let timings = &inner.settings.timings;
    let interval = timings.interval(agent);
    let backoff = ConstantBackoff::from_timings(timings);
    let cancel = inner.lifecycle.token();
    info!(%agent, ?interval, "agent routine started");

    if let Err(e) = inner.report(agent).await {
        debug!(%agent, error = %e, "initial report failed");
    }

    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut renew = interval_at(Instant::now() + timings.conn_renew, timings.conn_renew);
    renew.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let this: &AgentsInner = &inner;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if this.is_off(agent) {
                    continue;
                }
                if let Err(e) = retry_constant(backoff, &cancel, move || this.report(agent)).await {
                    warn!(%agent, error = %e, "retries exhausted, reconnecting");
                    if let Err(e) = this.instantiate_client(agent, true).await {
                        warn!(%agent, error = %e, "reconnect failed");
                    }
                }
            }
            _ = renew.tick() => {
                if let Err(e) = this.instantiate_client(agent, true).await {
                    warn!(%agent, error = %e, "connection renew failed");
                }
            }
        }
    }
    debug!(%agent, "agent routine stopped");
}

async fn forward_update_states(inner: Arc<AgentsInner>, mut state_rx: mpsc::Receiver<UpdateStatus>) {
    let cancel = inner.lifecycle.token();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            status = state_rx.recv() => {
                let Some(status) = status else { break };
                if inner.is_off(AgentType::Update) {
                    continue;
                }
                debug!(%status, "pushing update state");
                if let Err(e) = inner.push_update_state(status).await {
                    warn!(%status, error = %e, "update state push failed");
                }
            }
        }
    }
    debug!("update state forwarder stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ensim_core::proto::{
        RepeatedSchedule, SingleSchedule, UpdateSchedule, UpdateSource,
    };
    use ensim_core::{status_channel, NodeStatus, StatusMode, StatusReceiver, TOKEN_CLIENTS};

    use crate::loopback::LoopbackFleet;

    struct Harness {
        agents: Agents,
        fleet: LoopbackFleet,
        lifecycle: NodeLifecycle,
        status_rx: StatusReceiver,
        _dir: tempfile::TempDir,
    }

    fn fast_settings(dir: &std::path::Path) -> Settings {
        let mut settings = Settings::new("7f8e9d0c-1b2a-4c3d-8e4f-5a6b7c8d9e0f", dir);
        settings.timings.node_agent_interval = Duration::from_secs(1);
        settings.timings.hd_agent_interval = Duration::from_secs(1);
        settings.timings.update_agent_interval = Duration::from_secs(1);
        settings.timings.telemetry_agent_interval = Duration::from_secs(1);
        settings.timings.backoff_interval = Duration::from_millis(100);
        settings.timings.update_duration = Duration::from_secs(2);
        settings
    }

    fn write_tokens(settings: &Settings) {
        let paths = settings.paths();
        for client in TOKEN_CLIENTS {
            std::fs::create_dir_all(paths.token_dir(client)).unwrap();
            std::fs::write(paths.token(client), "header.payload.sig").unwrap();
        }
    }

    fn harness_with(fleet: LoopbackFleet) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let settings = fast_settings(dir.path());
        write_tokens(&settings);
        let lifecycle = NodeLifecycle::new(&settings.uuid);
        let (status, status_rx) = status_channel(256);
        let agents = Agents::new(
            lifecycle.clone(),
            status,
            Arc::new(settings),
            Arc::new(fleet.clone()),
        )
        .unwrap();
        Harness {
            agents,
            fleet,
            lifecycle,
            status_rx,
            _dir: dir,
        }
    }

    fn drain(rx: &mut StatusReceiver) -> Vec<NodeStatus> {
        let mut out = Vec::new();
        while let Ok(s) = rx.try_recv() {
            out.push(s);
        }
        out
    }

    #[tokio::test]
    async fn fresh_agents_report_on() {
        let h = harness_with(LoopbackFleet::new());
        for agent in AgentType::ALL {
            assert_eq!(h.agents.current_state(agent).unwrap(), AgentState::On);
        }
        let states = h.agents.states();
        assert_eq!(states.current, states.desired);
    }

    #[tokio::test]
    async fn unchanged_desired_states_do_not_reconcile() {
        let h = harness_with(LoopbackFleet::new());
        let all_on: HashMap<_, _> = AgentType::ALL.iter().map(|t| (*t, AgentState::On)).collect();
        h.agents.set_desired_states(&all_on);
        assert_eq!(h.agents.reconcile_count(), 0);

        h.agents
            .set_desired_states(&HashMap::from([(AgentType::Hd, AgentState::Off)]));
        assert_eq!(h.agents.reconcile_count(), 1);
        assert_eq!(h.agents.current_state(AgentType::Hd).unwrap(), AgentState::Off);

        h.agents
            .set_desired_states(&HashMap::from([(AgentType::Hd, AgentState::Off)]));
        assert_eq!(h.agents.reconcile_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_reports_every_agent_and_signals_ready() {
        let mut h = harness_with(LoopbackFleet::new());
        let ready = h.lifecycle.ready();
        h.agents.start().await.unwrap();
        assert!(*ready.borrow());

        tokio::time::sleep(Duration::from_millis(50)).await;
        for agent in AgentType::ALL {
            assert!(h.fleet.calls(agent) >= 1, "{agent} never reported");
            assert_eq!(h.fleet.connects(agent), 1);
        }
        let events = drain(&mut h.status_rx);
        assert!(events
            .iter()
            .any(|e| e.source == StatusSource::NodeAgent
                && e.mode == StatusMode::Ok
                && e.details == "4 of 4 components running"));

        assert!(matches!(h.agents.start().await, Err(AgentsError::AlreadyStarted)));
        h.lifecycle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn off_agent_stops_reporting_while_others_continue() {
        let mut h = harness_with(LoopbackFleet::new());
        h.agents.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        h.agents
            .set_desired_states(&HashMap::from([(AgentType::Telemetry, AgentState::Off)]));
        let telemetry_before = h.fleet.calls(AgentType::Telemetry);
        let hd_before = h.fleet.calls(AgentType::Hd);
        drain(&mut h.status_rx);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.fleet.calls(AgentType::Telemetry), telemetry_before);
        assert!(h.fleet.calls(AgentType::Hd) >= hd_before + 4);

        let events = drain(&mut h.status_rx);
        assert!(!events.iter().any(|e| e.source == StatusSource::TelemetryAgent));
        assert!(events.iter().any(|e| e.source == StatusSource::HdAgent));
        let summary = h.fleet.last_instance_status().unwrap();
        assert_eq!(summary.provider_status_detail, "3 of 4 components running");
        assert_eq!(summary.instance_status, InstanceStatus::Error as i32);

        h.lifecycle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failing_agent_reports_failed_and_reconnects() {
        let fleet = LoopbackFleet::new();
        fleet.set_failing(AgentType::Hd, true);
        let mut h = harness_with(fleet);
        h.agents.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        let events = drain(&mut h.status_rx);
        assert!(events
            .iter()
            .any(|e| e.source == StatusSource::HdAgent && e.mode == StatusMode::Failed));
        assert!(h.fleet.connects(AgentType::Hd) >= 2);
        assert_eq!(h.fleet.connects(AgentType::Node), 1);

        h.lifecycle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_control_plane_fails_start() {
        let fleet = LoopbackFleet::new();
        fleet.set_refuse_connect(true);
        let h = harness_with(fleet);

        let err = h.agents.start().await.unwrap_err();
        assert!(matches!(err, AgentsError::Client { .. }));
        assert_eq!(h.lifecycle.running_tasks(), 0);
        // One connect plus three retries.
        assert_eq!(h.fleet.connects(AgentType::Node), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn maintenance_schedule_reaches_control_plane() {
        let fleet = LoopbackFleet::new();
        let now = chrono::Utc::now().timestamp() as u64;
        fleet.set_update_response(PlatformUpdateStatusResponse {
            update_source: Some(UpdateSource {
                kernel_command: "quiet".into(),
                ..Default::default()
            }),
            update_schedule: Some(UpdateSchedule {
                single_schedule: Some(SingleSchedule {
                    start_seconds: now + 1,
                    end_seconds: now + 60,
                }),
                repeated_schedules: Vec::<RepeatedSchedule>::new(),
            }),
            installed_packages: String::new(),
        });
        let h = harness_with(fleet);
        h.agents.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        let reports = h.fleet.update_reports();
        assert!(reports.contains(&UpdateStatus::Started), "{reports:?}");
        assert!(reports.contains(&UpdateStatus::Updated), "{reports:?}");

        h.lifecycle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn missing_token_fails_report() {
        let h = harness_with(LoopbackFleet::new());
        let path = h.agents.inner.settings.paths().token("hd-agent");
        std::fs::remove_file(path).unwrap();
        h.agents.inner.init_clients().await.unwrap();

        let err = h.agents.inner.report(AgentType::Hd).await.unwrap_err();
        assert!(matches!(err, AgentsError::AuthToken { .. }));
        assert_eq!(h.fleet.calls(AgentType::Hd), 0);
    }
}
