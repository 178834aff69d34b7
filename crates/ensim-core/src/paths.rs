//! On-disk layout of a node's base folder.

use std::path::{Path, PathBuf};

/// Token clients provisioned for every node, one folder each under `tokens/`.
pub const TOKEN_CLIENTS: [&str; 8] = [
    "node-agent",
    "hd-agent",
    "cluster-agent",
    "platform-update-agent",
    "platform-observability-agent",
    "platform-telemetry-agent",
    "prometheus",
    "license-agent",
];

const CLIENT_CREDENTIALS_DIR: &str = "client-credentials";
const TOKENS_DIR: &str = "tokens";
const ACCESS_TOKEN_FILE: &str = "access_token";

/// Resolves credential and token file paths below a node's base folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePaths {
    base: PathBuf,
}

impl NodePaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn client_credentials_dir(&self) -> PathBuf {
        self.base.join(CLIENT_CREDENTIALS_DIR)
    }

    pub fn client_id(&self) -> PathBuf {
        self.client_credentials_dir().join("client_id")
    }

    pub fn client_secret(&self) -> PathBuf {
        self.client_credentials_dir().join("client_secret")
    }

    pub fn client_name(&self) -> PathBuf {
        self.client_credentials_dir().join("client_name")
    }

    /// Access token of the node's own client credentials.
    pub fn client_token(&self) -> PathBuf {
        self.client_credentials_dir().join(ACCESS_TOKEN_FILE)
    }

    pub fn tenant_id(&self) -> PathBuf {
        self.base.join("tenantId")
    }

    pub fn token_dir(&self, client: &str) -> PathBuf {
        self.base.join(TOKENS_DIR).join(client)
    }

    /// Access token file of a token client, e.g. `tokens/node-agent/access_token`.
    pub fn token(&self, client: &str) -> PathBuf {
        self.token_dir(client).join(ACCESS_TOKEN_FILE)
    }
}
