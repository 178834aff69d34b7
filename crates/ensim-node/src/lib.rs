//! ensim-node — lifecycle of one simulated edge node.
//!
//! # Architecture
//!
//! ```text
//! EdgeNode::start()
//!   ├── stats collector task ◀──(bounded mpsc)── every subsystem
//!   ├── requirements: base folder, artifacts
//!   ├── Onboarder: register → onboard → provision → credentials
//!   ├── TokenManager (refresh loop)
//!   ├── Agents (4 report loops, PUA, update forwarder)
//!   └── teardown waiter (optional)
//!
//! EdgeNode::stop()
//!   └── cancel → wait for every task → delete base folder
//! ```
//!
//! All tasks are spawned on the node's `NodeLifecycle`, so `stop` returns
//! only once every one of them has exited.

pub mod edge_node;
pub mod error;
pub mod onboard;
pub mod status;

pub use edge_node::{EdgeNode, NodeCollaborators, NodePhase};
pub use error::{NodeError, NodeResult, OnboardError, OnboardResult};
pub use onboard::{artifact_plan, Artifact, ArtifactKind, LocalOnboarder, Onboarder};
pub use status::StatusBoard;
