//! Error types for the node lifecycle and its onboarding collaborator.

use std::path::PathBuf;
use std::time::Duration;

use ensim_agents::{AgentsError, TokenError};
use ensim_core::StatusSource;
use thiserror::Error;

/// Result type alias for node lifecycle operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Result type alias for onboarding operations.
pub type OnboardResult<T> = Result<T, OnboardError>;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node already started")]
    AlreadyStarted,

    #[error("node folder {path}: {source}")]
    Folder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} stage failed: {source}")]
    Onboard {
        stage: StatusSource,
        #[source]
        source: OnboardError,
    },

    #[error("onboarding timed out after {0:?}")]
    OnboardTimeout(Duration),

    #[error("token manager: {0}")]
    Token(#[from] TokenError),

    #[error("agents: {0}")]
    Agents(#[from] AgentsError),

    #[error("agents are not running")]
    AgentsNotRunning,

    #[error("node terminated during start")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum OnboardError {
    #[error("missing {0} credentials")]
    MissingCredentials(&'static str),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("rejected: {0}")]
    Rejected(String),
}
