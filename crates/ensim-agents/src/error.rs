//! Error types for agents, control-plane clients and tokens.

use std::path::PathBuf;

use ensim_core::AgentType;
use ensim_pua::PuaError;
use thiserror::Error;

/// Result type alias for agent operations.
pub type AgentsResult<T> = Result<T, AgentsError>;

/// Result type alias for token operations.
pub type TokenResult<T> = Result<T, TokenError>;

#[derive(Debug, Error)]
pub enum AgentsError {
    #[error("agents already started")]
    AlreadyStarted,

    #[error("state of agent {0} not found")]
    NotFound(AgentType),

    #[error("no client loaded for agent {0}")]
    MissingClient(AgentType),

    #[error("failed to read auth token {path}: {source}")]
    AuthToken {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("auth token {0} is empty")]
    EmptyToken(PathBuf),

    #[error("{agent} agent: {source}")]
    Client {
        agent: AgentType,
        #[source]
        source: ClientError,
    },

    #[error(transparent)]
    Pua(#[from] PuaError),
}

/// Failures of a single control-plane call or connection.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("{method} failed: {code:?} {message}")]
    Rpc {
        method: &'static str,
        code: tonic::Code,
        message: String,
    },

    #[error("invalid request metadata: {0}")]
    Metadata(String),

    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("no tenant ID found in token")]
    NoTenant,

    #[error("multiple tenant IDs found in token: {0:?}")]
    MultipleTenants(Vec<String>),

    #[error("token provider failed for {client}: {reason}")]
    Provider { client: String, reason: String },
}
