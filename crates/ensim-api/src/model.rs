//! Request bodies and JSON views of the REST API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use ensim_core::{AgentState, AgentType, NodeStatus, StateMap};
use ensim_node::{EdgeNode, NodePhase};
use ensim_store::Event;

use crate::service::NodeOptions;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateNodeRequest {
    #[serde(default)]
    pub uuid: String,
    #[serde(flatten)]
    pub options: NodeOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateNodesRequest {
    pub number: usize,
    #[serde(default)]
    pub batch_size: usize,
    #[serde(flatten)]
    pub options: NodeOptions,
}

/// Desired state per agent, e.g. `{"agents": {"hd": "off"}}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAgentsRequest {
    pub agents: HashMap<AgentType, AgentState>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteNodesQuery {
    #[serde(default)]
    pub number: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchQuery {
    #[serde(default = "yes")]
    pub replay: bool,
    #[serde(default = "yes")]
    pub subscribe: bool,
}

fn yes() -> bool {
    true
}

/// Credentials echoed back without their passwords.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialsView {
    pub project: String,
    pub onboard_username: String,
    pub api_username: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub uuid: String,
    pub serial: String,
    pub mac_address: String,
    pub phase: NodePhase,
    pub enable_nio: bool,
    pub enable_teardown: bool,
    pub credentials: CredentialsView,
    pub agents: StateMap,
    /// Latest status per source, ordered by source.
    pub status: Vec<NodeStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_status: Option<String>,
}

impl From<&EdgeNode> for NodeView {
    fn from(node: &EdgeNode) -> Self {
        let settings = node.settings();
        let mut status: Vec<NodeStatus> = node.agents_status().into_values().collect();
        status.sort_by_key(|s| s.source);
        Self {
            uuid: settings.uuid.clone(),
            serial: settings.serial.clone(),
            mac_address: settings.mac_address.clone(),
            phase: node.phase(),
            enable_nio: settings.nio_onboard,
            enable_teardown: settings.setup_teardown,
            credentials: CredentialsView {
                project: settings.credentials.project.clone(),
                onboard_username: settings.credentials.onboard_username.clone(),
                api_username: settings.credentials.api_username.clone(),
            },
            agents: node.agents_states(),
            status,
            update_status: node.update_status().map(|s| s.as_str().to_string()),
        }
    }
}

/// One event of a node watch stream.
#[derive(Debug, Clone, Serialize)]
pub struct WatchEventView {
    #[serde(rename = "type")]
    pub kind: String,
    pub uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeView>,
}

impl From<&Event<EdgeNode>> for WatchEventView {
    fn from(event: &Event<EdgeNode>) -> Self {
        Self {
            kind: event.kind.to_string(),
            uuid: event.uuid.clone(),
            node: event.value.as_deref().map(NodeView::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_query_defaults_to_replay_and_subscribe() {
        let q: WatchQuery = serde_json::from_str("{}").unwrap();
        assert!(q.replay && q.subscribe);
        let q: WatchQuery = serde_json::from_str(r#"{"replay": false}"#).unwrap();
        assert!(!q.replay && q.subscribe);
    }

    #[test]
    fn create_request_flattens_options() {
        let req: CreateNodeRequest = serde_json::from_str(
            r#"{"enable_nio": true, "credentials": {"onboard_username": "u", "project": "p"}}"#,
        )
        .unwrap();
        assert!(req.uuid.is_empty());
        assert!(req.options.enable_nio);
        assert_eq!(req.options.credentials.onboard_username, "u");
    }

    #[test]
    fn update_request_uses_agent_names() {
        let req: UpdateAgentsRequest =
            serde_json::from_str(r#"{"agents": {"hd": "off", "telemetry": "on"}}"#).unwrap();
        assert_eq!(req.agents[&AgentType::Hd], AgentState::Off);
        assert_eq!(req.agents[&AgentType::Telemetry], AgentState::On);
    }
}
