//! ensim-pua — simulated platform update agent.
//!
//! Converts maintenance schedules pushed by the control plane into timed
//! update-state transitions (`STARTED` → `UPDATED`), reported back by the
//! node's update agent.
//!
//! # Architecture
//!
//! ```text
//! Pua
//!   ├── handle() task ◀── PlatformUpdateStatusResponse (from update agent)
//!   │     ├── single schedule   → one-shot job  (tag "single-schedule")
//!   │     └── repeated schedules → cron jobs    (tag "repeated-schedule")
//!   ├── JobScheduler (single-flight, wait mode)
//!   └── state ──(mpsc)──▶ update agent async forwarder
//! ```
//!
//! Resubmitting a schedule the agent already knows never creates duplicate
//! jobs: the single schedule is compared by value, repeated schedules as a
//! set.

pub mod error;
pub mod jobs;
pub mod pua;

pub use error::{PuaError, PuaResult};
pub use jobs::{JobFn, JobHandle, JobScheduler, Trigger};
pub use pua::{cron_schedule_to_string, Pua, REPEATED_SCHEDULE_TAG, SINGLE_SCHEDULE_TAG};
