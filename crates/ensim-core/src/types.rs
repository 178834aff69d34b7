//! Agent and node status data model.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use crate::proto::UpdateStatusType as UpdateStatus;

/// The reporting agents every simulated node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Node,
    Hd,
    Update,
    Telemetry,
}

impl AgentType {
    pub const COUNT: usize = 4;

    /// All agent types, in table order.
    pub const ALL: [AgentType; Self::COUNT] = [
        AgentType::Node,
        AgentType::Hd,
        AgentType::Update,
        AgentType::Telemetry,
    ];

    /// Position of this type in fixed-size per-agent tables.
    pub const fn index(self) -> usize {
        match self {
            AgentType::Node => 0,
            AgentType::Hd => 1,
            AgentType::Update => 2,
            AgentType::Telemetry => 3,
        }
    }

    /// Status source this agent reports under.
    pub const fn status_source(self) -> StatusSource {
        match self {
            AgentType::Node => StatusSource::NodeAgent,
            AgentType::Hd => StatusSource::HdAgent,
            AgentType::Update => StatusSource::UpdateAgent,
            AgentType::Telemetry => StatusSource::TelemetryAgent,
        }
    }

    /// Name of the token client whose access token authenticates this agent.
    pub const fn token_client(self) -> &'static str {
        match self {
            AgentType::Node => "node-agent",
            AgentType::Hd => "hd-agent",
            AgentType::Update => "platform-update-agent",
            AgentType::Telemetry => "platform-telemetry-agent",
        }
    }

    /// Host prefix of the control-plane service this agent talks to.
    pub const fn service_host(self) -> &'static str {
        match self {
            AgentType::Node | AgentType::Hd => "infra-node",
            AgentType::Update => "update-node",
            AgentType::Telemetry => "telemetry-node",
        }
    }

    /// `host:port` of this agent's control-plane endpoint.
    pub fn address(self, orch_fqdn: &str) -> String {
        format!("{}.{orch_fqdn}:443", self.service_host())
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentType::Node => "node",
            AgentType::Hd => "hd",
            AgentType::Update => "update",
            AgentType::Telemetry => "telemetry",
        };
        f.write_str(name)
    }
}

/// Running state of a single agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Unknown,
    On,
    Off,
}

impl AgentState {
    pub const fn as_u8(self) -> u8 {
        match self {
            AgentState::Unknown => 0,
            AgentState::On => 1,
            AgentState::Off => 2,
        }
    }

    pub const fn from_u8(v: u8) -> Self {
        match v {
            1 => AgentState::On,
            2 => AgentState::Off,
            _ => AgentState::Unknown,
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentState::Unknown => "unknown",
            AgentState::On => "on",
            AgentState::Off => "off",
        };
        f.write_str(name)
    }
}

/// Snapshot of both agent state tables of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMap {
    pub current: HashMap<AgentType, AgentState>,
    pub desired: HashMap<AgentType, AgentState>,
}

/// Lifecycle stage or agent a status event originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    Requirements,
    Registered,
    Onboarded,
    Provisioned,
    Credentials,
    TokenManager,
    Setup,
    Teardown,
    NodeAgent,
    HdAgent,
    UpdateAgent,
    TelemetryAgent,
}

impl fmt::Display for StatusSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusSource::Requirements => "requirements",
            StatusSource::Registered => "registered",
            StatusSource::Onboarded => "onboarded",
            StatusSource::Provisioned => "provisioned",
            StatusSource::Credentials => "credentials",
            StatusSource::TokenManager => "token_manager",
            StatusSource::Setup => "setup",
            StatusSource::Teardown => "teardown",
            StatusSource::NodeAgent => "node_agent",
            StatusSource::HdAgent => "hd_agent",
            StatusSource::UpdateAgent => "update_agent",
            StatusSource::TelemetryAgent => "telemetry_agent",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusMode {
    Ok,
    Failed,
}

/// Latest status reported by one source of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub source: StatusSource,
    pub mode: StatusMode,
    pub details: String,
}

impl NodeStatus {
    pub fn ok(source: StatusSource, details: impl Into<String>) -> Self {
        Self {
            source,
            mode: StatusMode::Ok,
            details: details.into(),
        }
    }

    pub fn failed(source: StatusSource, details: impl Into<String>) -> Self {
        Self {
            source,
            mode: StatusMode::Failed,
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_addresses_follow_service_hosts() {
        assert_eq!(AgentType::Node.address("kind.internal"), "infra-node.kind.internal:443");
        assert_eq!(AgentType::Hd.address("kind.internal"), "infra-node.kind.internal:443");
        assert_eq!(AgentType::Update.address("kind.internal"), "update-node.kind.internal:443");
        assert_eq!(
            AgentType::Telemetry.address("orch.example"),
            "telemetry-node.orch.example:443"
        );
    }

    #[test]
    fn table_indices_are_dense() {
        let mut seen: Vec<usize> = AgentType::ALL.iter().map(|t| t.index()).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn agent_state_byte_roundtrip() {
        for s in [AgentState::Unknown, AgentState::On, AgentState::Off] {
            assert_eq!(AgentState::from_u8(s.as_u8()), s);
        }
        assert_eq!(AgentState::from_u8(42), AgentState::Unknown);
    }

    #[test]
    fn enums_serialize_snake_case() {
        assert_eq!(serde_json::to_string(&AgentType::Telemetry).unwrap(), "\"telemetry\"");
        assert_eq!(
            serde_json::to_string(&StatusSource::TokenManager).unwrap(),
            "\"token_manager\""
        );
        let s: AgentState = serde_json::from_str("\"off\"").unwrap();
        assert_eq!(s, AgentState::Off);
    }
}
