//! ensim.toml configuration parser.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working simulator pointed at `kind.internal`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::settings::Timings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Address the northbound HTTP API listens on.
    pub bind: String,
    pub http_port: u16,
    /// Parent folder of every node's credential folder.
    pub base_folder: PathBuf,
    pub orch_fqdn: String,
    pub org: String,
    /// CA bundle of the orchestrator, copied into each node's settings.
    pub orch_ca_path: Option<PathBuf>,
    pub enable_downloads: bool,
    pub artifacts_url: String,
    pub tinker_actions_version: String,
    pub agents_manifest_version: String,
    pub delete_batch_size: usize,
    pub timings: TimingsConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            http_port: 5001,
            base_folder: PathBuf::from("/tmp/scale"),
            orch_fqdn: "kind.internal".to_string(),
            org: "intel".to_string(),
            orch_ca_path: None,
            enable_downloads: false,
            artifacts_url: "registry-rs.edgeorchestration.intel.com/".to_string(),
            tinker_actions_version: "1.0.0".to_string(),
            agents_manifest_version: "1.0.0".to_string(),
            delete_batch_size: 100,
            timings: TimingsConfig::default(),
        }
    }
}

/// `[timings]` table; durations are written as `"30s"`, `"500ms"` or `"55m"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingsConfig {
    pub node_agent_interval: String,
    pub hd_agent_interval: String,
    pub update_agent_interval: String,
    pub telemetry_agent_interval: String,
    pub conn_renew: String,
    pub backoff_interval: String,
    pub backoff_retries: u32,
    pub update_duration: String,
    pub provision_settle: String,
    pub onboard_timeout: String,
    pub token_refresh_check: String,
    pub token_refresh_margin: String,
    pub status_queue_size: usize,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self {
            node_agent_interval: "30s".to_string(),
            hd_agent_interval: "60s".to_string(),
            update_agent_interval: "300s".to_string(),
            telemetry_agent_interval: "60s".to_string(),
            conn_renew: "55m".to_string(),
            backoff_interval: "10s".to_string(),
            backoff_retries: 3,
            update_duration: "30s".to_string(),
            provision_settle: "5s".to_string(),
            onboard_timeout: "120s".to_string(),
            token_refresh_check: "300s".to_string(),
            token_refresh_margin: "10m".to_string(),
            status_queue_size: 10,
        }
    }
}

impl TimingsConfig {
    pub fn to_timings(&self) -> ConfigResult<Timings> {
        if self.status_queue_size == 0 {
            return Err(ConfigError::Invalid(
                "timings.status_queue_size must be at least 1".into(),
            ));
        }
        let timings = Timings {
            node_agent_interval: parse_duration(&self.node_agent_interval)?,
            hd_agent_interval: parse_duration(&self.hd_agent_interval)?,
            update_agent_interval: parse_duration(&self.update_agent_interval)?,
            telemetry_agent_interval: parse_duration(&self.telemetry_agent_interval)?,
            conn_renew: parse_duration(&self.conn_renew)?,
            backoff_interval: parse_duration(&self.backoff_interval)?,
            backoff_retries: self.backoff_retries,
            update_duration: parse_duration(&self.update_duration)?,
            provision_settle: parse_duration(&self.provision_settle)?,
            onboard_timeout: parse_duration(&self.onboard_timeout)?,
            token_refresh_check: parse_duration(&self.token_refresh_check)?,
            token_refresh_margin: parse_duration(&self.token_refresh_margin)?,
            status_queue_size: self.status_queue_size,
        };
        for (name, d) in [
            ("node_agent_interval", timings.node_agent_interval),
            ("hd_agent_interval", timings.hd_agent_interval),
            ("update_agent_interval", timings.update_agent_interval),
            ("telemetry_agent_interval", timings.telemetry_agent_interval),
            ("conn_renew", timings.conn_renew),
            ("token_refresh_check", timings.token_refresh_check),
        ] {
            // tokio intervals panic on a zero period.
            if d.is_zero() {
                return Err(ConfigError::Invalid(format!("timings.{name} must be non-zero")));
            }
        }
        Ok(timings)
    }
}

impl SimConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: SimConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.orch_fqdn.trim().is_empty() {
            return Err(ConfigError::Invalid("orch_fqdn must not be empty".into()));
        }
        if self.delete_batch_size == 0 {
            return Err(ConfigError::Invalid("delete_batch_size must be at least 1".into()));
        }
        self.timings.to_timings()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.http_port)
    }
}

/// Parse `"500ms"`, `"30s"`, `"55m"` or `"1h"` into a `Duration`.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let invalid = || ConfigError::Duration(s.to_string());
    let (digits, millis_per_unit) = if let Some(v) = s.strip_suffix("ms") {
        (v, 1)
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1_000)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, 60_000)
    } else if let Some(v) = s.strip_suffix('h') {
        (v, 3_600_000)
    } else {
        return Err(invalid());
    };
    let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
    value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(invalid)
}
