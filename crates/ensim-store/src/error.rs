//! Error types for the node store.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("empty node uuid")]
    EmptyUuid,

    #[error("node {0} already exists")]
    AlreadyExists(String),

    #[error("node {0} not found")]
    NotFound(String),
}
