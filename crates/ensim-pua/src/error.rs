//! Error types for the update agent simulation.

use thiserror::Error;

/// Result type alias for update agent operations.
pub type PuaResult<T> = Result<T, PuaError>;

#[derive(Debug, Error)]
pub enum PuaError {
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("kernel command contains disallowed characters: {0:?}")]
    InvalidKernelCommand(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}
