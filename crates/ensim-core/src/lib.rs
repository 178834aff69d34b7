//! ensim-core — shared building blocks for the edge node simulator.
//!
//! Everything a simulated edge node needs before it talks to anything:
//! the agent/status data model, per-node settings, the daemon's TOML
//! configuration, the on-disk credential layout and the control-plane
//! wire messages.
//!
//! # Architecture
//!
//! ```text
//! SimConfig (ensim.toml)
//!   └── Settings (one immutable snapshot per node)
//!         ├── Timings (intervals, backoff, timeouts)
//!         └── NodePaths (client-credentials/, tokens/<client>/)
//!
//! NodeLifecycle
//!   ├── CancellationToken (terminate once, wake every task)
//!   ├── TaskTracker      (stop() waits on it)
//!   └── tracing::Span    (per-node log context)
//!
//! StatusSender ──(bounded mpsc)──▶ node status collector
//! ```

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod paths;
pub mod proto;
pub mod settings;
pub mod status;
pub mod types;

pub use config::{parse_duration, SimConfig, TimingsConfig};
pub use error::{ConfigError, ConfigResult};
pub use lifecycle::NodeLifecycle;
pub use paths::{NodePaths, TOKEN_CLIENTS};
pub use settings::{Credentials, Settings, Timings};
pub use status::{status_channel, StatusReceiver, StatusSender};
pub use types::*;
