//! Bearer-token call context.

use std::path::Path;
use std::time::Duration;

use crate::error::{AgentsError, AgentsResult};

/// Credentials and deadline attached to one control-plane call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub bearer: String,
    pub timeout: Duration,
}

/// Read the access token at `token_path` into a call context.
pub async fn call_context(token_path: &Path, timeout: Duration) -> AgentsResult<CallContext> {
    let raw = tokio::fs::read_to_string(token_path)
        .await
        .map_err(|source| AgentsError::AuthToken {
            path: token_path.to_path_buf(),
            source,
        })?;
    let bearer = raw.trim();
    if bearer.is_empty() {
        return Err(AgentsError::EmptyToken(token_path.to_path_buf()));
    }
    Ok(CallContext {
        bearer: bearer.to_string(),
        timeout,
    })
}
