//! Onboarding collaborator seam.
//!
//! A node walks through the stages of an `Onboarder` in order. The real
//! orchestrator workflow sits behind this trait; `LocalOnboarder` plays it
//! out on the node's own folder so a fleet can be simulated without one.

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use ensim_core::Settings;

use crate::error::{OnboardError, OnboardResult};

#[async_trait]
pub trait Onboarder: Send + Sync {
    /// Resolve the artifacts a node would download before onboarding.
    async fn fetch_artifacts(&self, settings: &Settings) -> OnboardResult<()>;

    async fn register_host(&self, settings: &Settings) -> OnboardResult<()>;

    /// Onboard the node; returns the status detail of the stage.
    async fn onboard(&self, settings: &Settings) -> OnboardResult<String>;

    async fn provision(&self, settings: &Settings) -> OnboardResult<()>;

    async fn set_credentials(&self, settings: &Settings) -> OnboardResult<()>;

    /// Remove the node's host record once the node terminates.
    async fn teardown(&self, settings: &Settings) -> OnboardResult<()>;
}

// ── Artifacts ──────────────────────────────────────────────────

/// Agent packages listed in the edge node agents manifest.
const AGENT_PACKAGES: &[&str] = &[
    "cluster-agent",
    "hardware-discovery-agent",
    "node-agent",
    "platform-observability-agent",
    "platform-telemetry-agent",
    "platform-update-agent",
];

const TINKER_ACTIONS: &[&str] = &["erase_non_removable_disks", "cexec", "kernelupgrd", "writefile"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Manifest,
    Agent,
    Tinker,
    TinkerAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub name: String,
    pub url: String,
    pub kind: ArtifactKind,
}

/// Every artifact a node fetches before onboarding.
pub fn artifact_plan(settings: &Settings) -> Vec<Artifact> {
    let base = settings.artifacts_url.trim_end_matches('/');
    let mut plan = vec![Artifact {
        name: "ena-manifest".into(),
        url: format!("{base}/edge-orch/en/files/ena-manifest:{}", settings.agents_manifest_version),
        kind: ArtifactKind::Manifest,
    }];
    plan.extend(AGENT_PACKAGES.iter().map(|name| Artifact {
        name: (*name).into(),
        url: format!("{base}/edge-orch/en/deb/{name}:{}", settings.agents_manifest_version),
        kind: ArtifactKind::Agent,
    }));
    plan.extend(["ipxe.efi", "boot.ipxe"].iter().map(|file| Artifact {
        name: (*file).into(),
        url: format!("https://tinkerbell-nginx.{}/tink-stack/{file}", settings.orch_fqdn),
        kind: ArtifactKind::Tinker,
    }));
    plan.extend(TINKER_ACTIONS.iter().map(|action| Artifact {
        name: (*action).into(),
        url: format!(
            "{base}/edge-orch/infra/tinker-actions/{action}:{}",
            settings.tinker_actions_version
        ),
        kind: ArtifactKind::TinkerAction,
    }));
    plan
}

// ── Local onboarder ────────────────────────────────────────────

/// Onboards nodes without an orchestrator.
///
/// Stages only check the node's credentials and lay out the files the real
/// workflow would leave behind: the artifact plan and the client
/// credentials later used for token issuance.
#[derive(Debug, Clone, Default)]
pub struct LocalOnboarder;

impl LocalOnboarder {
    pub fn new() -> Self {
        Self
    }
}

async fn write_file(path: &Path, contents: &str) -> OnboardResult<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| OnboardError::Io {
            path: path.to_path_buf(),
            source,
        })
}

async fn read_file(path: &Path) -> OnboardResult<String> {
    tokio::fs::read_to_string(path)
        .await
        .map(|s| s.trim().to_string())
        .map_err(|source| OnboardError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[async_trait]
impl Onboarder for LocalOnboarder {
    async fn fetch_artifacts(&self, settings: &Settings) -> OnboardResult<()> {
        if !settings.enable_downloads {
            debug!("artifact downloads disabled");
            return Ok(());
        }
        if settings.artifacts_url.is_empty() {
            return Err(OnboardError::InvalidSetting("artifacts url is empty".into()));
        }
        let plan = artifact_plan(settings);
        let json = serde_json::to_string_pretty(&plan)
            .map_err(|e| OnboardError::Serialize(e.to_string()))?;
        write_file(&settings.base_folder.join("artifacts.json"), &json).await?;
        info!(artifacts = plan.len(), "artifacts resolved");
        Ok(())
    }

    async fn register_host(&self, settings: &Settings) -> OnboardResult<()> {
        let creds = &settings.credentials;
        if creds.api_username.is_empty() || creds.api_password.is_empty() {
            return Err(OnboardError::MissingCredentials("api"));
        }
        debug!(serial = %settings.serial, "host registered");
        Ok(())
    }

    async fn onboard(&self, settings: &Settings) -> OnboardResult<String> {
        let creds = &settings.credentials;
        if creds.onboard_username.is_empty() || creds.onboard_password.is_empty() {
            return Err(OnboardError::MissingCredentials("onboard"));
        }
        if settings.nio_onboard {
            Ok("NIO successful".into())
        } else {
            Ok("interactive onboarding successful".into())
        }
    }

    async fn provision(&self, settings: &Settings) -> OnboardResult<()> {
        let paths = settings.paths();
        let dir = paths.client_credentials_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| OnboardError::Io {
                path: dir.clone(),
                source,
            })?;

        let client_name = format!("edgenode-{}", settings.uuid);
        let secret: [u8; 16] = rand::random();
        let secret: String = secret.iter().map(|b| format!("{b:02x}")).collect();
        write_file(&paths.client_id(), &client_name).await?;
        write_file(&paths.client_name(), &client_name).await?;
        write_file(&paths.client_secret(), &secret).await?;
        debug!(auto = settings.auto_provision, "node provisioned");
        Ok(())
    }

    async fn set_credentials(&self, settings: &Settings) -> OnboardResult<()> {
        let paths = settings.paths();
        let client_id = read_file(&paths.client_id()).await?;
        let client_secret = read_file(&paths.client_secret()).await?;
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(OnboardError::Rejected("empty client credentials".into()));
        }
        debug!(%client_id, "client credentials accepted");
        Ok(())
    }

    async fn teardown(&self, settings: &Settings) -> OnboardResult<()> {
        info!(uuid = %settings.uuid, "host record removed");
        Ok(())
    }
}
