//! In-process control plane.
//!
//! `LoopbackFleet` answers every agent call locally. It counts calls per
//! agent, can be told to fail calls or refuse connections, and hands out
//! whatever maintenance response it was given. The daemon uses it when no
//! control plane is reachable; tests use it to observe agents.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use ensim_core::proto::{
    GetTelemetryConfigRequest, GetTelemetryConfigResponse, PlatformUpdateStatusRequest,
    PlatformUpdateStatusResponse, TelemetryConfigEntry, UpdateHostSystemInfoRequest,
    UpdateHostSystemInfoResponse, UpdateInstanceStatusRequest, UpdateInstanceStatusResponse,
};
use ensim_core::{AgentType, Settings, UpdateStatus};

use crate::auth::CallContext;
use crate::client::{FleetClient, FleetConnector};
use crate::error::ClientError;

/// Most recent update reports kept across the whole fleet.
pub const UPDATE_REPORTS_KEPT: usize = 256;

#[derive(Default)]
struct LoopbackState {
    calls: [AtomicU64; AgentType::COUNT],
    connects: [AtomicU64; AgentType::COUNT],
    failing: [AtomicBool; AgentType::COUNT],
    refuse_connect: AtomicBool,
    update_response: Mutex<PlatformUpdateStatusResponse>,
    update_reports: Mutex<VecDeque<UpdateStatus>>,
    last_instance_status: Mutex<Option<UpdateInstanceStatusRequest>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Clone, Default)]
pub struct LoopbackFleet {
    state: Arc<LoopbackState>,
}

impl LoopbackFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls answered (successfully or not) for `agent`.
    pub fn calls(&self, agent: AgentType) -> u64 {
        self.state.calls[agent.index()].load(Ordering::SeqCst)
    }

    pub fn connects(&self, agent: AgentType) -> u64 {
        self.state.connects[agent.index()].load(Ordering::SeqCst)
    }

    /// Make every call of `agent` fail until reset.
    pub fn set_failing(&self, agent: AgentType, failing: bool) {
        self.state.failing[agent.index()].store(failing, Ordering::SeqCst);
    }

    pub fn set_refuse_connect(&self, refuse: bool) {
        self.state.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Response returned to every platform update status report.
    pub fn set_update_response(&self, resp: PlatformUpdateStatusResponse) {
        *lock(&self.state.update_response) = resp;
    }

    /// The last [`UPDATE_REPORTS_KEPT`] update states reported, oldest first.
    pub fn update_reports(&self) -> Vec<UpdateStatus> {
        lock(&self.state.update_reports).iter().copied().collect()
    }

    pub fn last_instance_status(&self) -> Option<UpdateInstanceStatusRequest> {
        lock(&self.state.last_instance_status).clone()
    }

    fn answer(&self, agent: AgentType) -> Result<(), ClientError> {
        self.state.calls[agent.index()].fetch_add(1, Ordering::SeqCst);
        if self.state.failing[agent.index()].load(Ordering::SeqCst) {
            return Err(ClientError::Rejected(format!("{agent} calls are failing")));
        }
        Ok(())
    }
}

#[async_trait]
impl FleetConnector for LoopbackFleet {
    async fn connect(
        &self,
        agent: AgentType,
        address: &str,
        _settings: &Settings,
    ) -> Result<Arc<dyn FleetClient>, ClientError> {
        self.state.connects[agent.index()].fetch_add(1, Ordering::SeqCst);
        if self.state.refuse_connect.load(Ordering::SeqCst) {
            return Err(ClientError::Connect {
                address: address.to_string(),
                reason: "connection refused".into(),
            });
        }
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl FleetClient for LoopbackFleet {
    async fn update_instance_status(
        &self,
        _ctx: &CallContext,
        req: UpdateInstanceStatusRequest,
    ) -> Result<UpdateInstanceStatusResponse, ClientError> {
        self.answer(AgentType::Node)?;
        *lock(&self.state.last_instance_status) = Some(req);
        Ok(UpdateInstanceStatusResponse {})
    }

    async fn update_host_system_info(
        &self,
        _ctx: &CallContext,
        _req: UpdateHostSystemInfoRequest,
    ) -> Result<UpdateHostSystemInfoResponse, ClientError> {
        self.answer(AgentType::Hd)?;
        Ok(UpdateHostSystemInfoResponse {})
    }

    async fn platform_update_status(
        &self,
        _ctx: &CallContext,
        req: PlatformUpdateStatusRequest,
    ) -> Result<PlatformUpdateStatusResponse, ClientError> {
        self.answer(AgentType::Update)?;
        if let Some(status) = &req.update_status {
            let mut reports = lock(&self.state.update_reports);
            if reports.len() == UPDATE_REPORTS_KEPT {
                reports.pop_front();
            }
            reports.push_back(status.status_type());
        }
        Ok(lock(&self.state.update_response).clone())
    }

    async fn get_telemetry_config(
        &self,
        _ctx: &CallContext,
        req: GetTelemetryConfigRequest,
    ) -> Result<GetTelemetryConfigResponse, ClientError> {
        self.answer(AgentType::Telemetry)?;
        Ok(GetTelemetryConfigResponse {
            host_guid: req.guid,
            entries: vec![TelemetryConfigEntry {
                input: "cpu".into(),
                kind: "metric".into(),
                level: "info".into(),
                interval_seconds: 10,
            }],
        })
    }
}
