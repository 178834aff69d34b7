//! Per-node settings snapshot.
//!
//! A `Settings` value is built once when a node is created and then shared
//! read-only (`Arc<Settings>`) by every subsystem of that node.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::paths::NodePaths;
use crate::types::AgentType;

/// Onboarding and API credentials supplied by the northbound caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub onboard_username: String,
    pub onboard_password: String,
    pub api_username: String,
    pub api_password: String,
    pub project: String,
}

/// Every interval, timeout and capacity used by a node's background tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    pub node_agent_interval: Duration,
    pub hd_agent_interval: Duration,
    pub update_agent_interval: Duration,
    pub telemetry_agent_interval: Duration,
    /// Unconditional reconnect period of every agent client.
    pub conn_renew: Duration,
    pub backoff_interval: Duration,
    /// Retries after the first attempt.
    pub backoff_retries: u32,
    /// Simulated length of a maintenance update.
    pub update_duration: Duration,
    /// Pause between provisioning and starting the agents.
    pub provision_settle: Duration,
    pub onboard_timeout: Duration,
    pub token_refresh_check: Duration,
    /// A token is refreshed once it expires within this margin.
    pub token_refresh_margin: Duration,
    pub status_queue_size: usize,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            node_agent_interval: Duration::from_secs(30),
            hd_agent_interval: Duration::from_secs(60),
            update_agent_interval: Duration::from_secs(300),
            telemetry_agent_interval: Duration::from_secs(60),
            conn_renew: Duration::from_secs(55 * 60),
            backoff_interval: Duration::from_secs(10),
            backoff_retries: 3,
            update_duration: Duration::from_secs(30),
            provision_settle: Duration::from_secs(5),
            onboard_timeout: Duration::from_secs(120),
            token_refresh_check: Duration::from_secs(300),
            token_refresh_margin: Duration::from_secs(10 * 60),
            status_queue_size: 10,
        }
    }
}

impl Timings {
    /// Report interval of an agent; also the timeout of its remote call.
    pub fn interval(&self, agent: AgentType) -> Duration {
        match agent {
            AgentType::Node => self.node_agent_interval,
            AgentType::Hd => self.hd_agent_interval,
            AgentType::Update => self.update_agent_interval,
            AgentType::Telemetry => self.telemetry_agent_interval,
        }
    }
}

/// Immutable configuration of one simulated edge node.
#[derive(Debug, Clone)]
pub struct Settings {
    pub uuid: String,
    pub serial: String,
    pub mac_address: String,
    pub orch_fqdn: String,
    pub org: String,
    pub ca_cert_path: Option<PathBuf>,
    pub ca_cert: String,
    pub credentials: Credentials,
    pub base_folder: PathBuf,
    pub run_agents: bool,
    pub nio_onboard: bool,
    pub setup_teardown: bool,
    pub auto_provision: bool,
    pub enable_downloads: bool,
    pub artifacts_url: String,
    pub tinker_actions_version: String,
    pub agents_manifest_version: String,
    pub timings: Timings,
}

impl Settings {
    /// Settings for `uuid` with everything else at its default.
    pub fn new(uuid: impl Into<String>, base_folder: impl Into<PathBuf>) -> Self {
        let uuid = uuid.into();
        Self {
            serial: serial_from_uuid(&uuid),
            mac_address: random_mac(),
            uuid,
            orch_fqdn: "kind.internal".to_string(),
            org: String::new(),
            ca_cert_path: None,
            ca_cert: String::new(),
            credentials: Credentials::default(),
            base_folder: base_folder.into(),
            run_agents: true,
            nio_onboard: false,
            setup_teardown: false,
            auto_provision: true,
            enable_downloads: false,
            artifacts_url: String::new(),
            tinker_actions_version: String::new(),
            agents_manifest_version: String::new(),
            timings: Timings::default(),
        }
    }

    pub fn paths(&self) -> NodePaths {
        NodePaths::new(&self.base_folder)
    }
}

/// Serial number of a node: its UUID without dashes, cut to 20 characters.
pub fn serial_from_uuid(uuid: &str) -> String {
    uuid.chars().filter(|c| *c != '-').take(20).collect()
}

/// Random locally administered unicast MAC address.
pub fn random_mac() -> String {
    let mut octets: [u8; 6] = rand::random();
    octets[0] = (octets[0] | 0x02) & 0xfe;
    octets
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
