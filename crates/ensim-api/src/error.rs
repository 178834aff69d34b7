//! Error types for the northbound fleet service.

use std::fmt;
use std::path::PathBuf;

use ensim_core::ConfigError;
use ensim_node::NodeError;
use ensim_store::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Result type alias for fleet service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// One node that failed inside a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub uuid: String,
    pub error: String,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.uuid, self.error)
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("node {0} already exists")]
    AlreadyExists(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("node {uuid}: {source}")]
    Node {
        uuid: String,
        #[source]
        source: NodeError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} of {} nodes failed: [{}]", .failures.len(), .failures.len() + .succeeded.len(), join(.failures))]
    Batch {
        succeeded: Vec<String>,
        failures: Vec<BatchFailure>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

fn join(failures: &[BatchFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
