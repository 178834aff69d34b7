//! ensim-agents — the reporting agents of a simulated edge node.
//!
//! Each node runs four independent agents, each a periodic loop that
//! authenticates with a per-agent bearer token and calls one control-plane
//! service. Agents can be switched on and off at runtime through a
//! desired/current state pair.
//!
//! # Architecture
//!
//! ```text
//! Agents
//!   ├── AgentStates { current, desired }   (lock-free, keyed by AgentType)
//!   ├── FleetConnector ──▶ FleetClient per AgentType
//!   │     ├── GrpcConnector      (tonic, lazy channels, bearer metadata)
//!   │     └── LoopbackFleet      (in-process control plane)
//!   ├── report loop × 4  (tick → retry → reconnect; renew tick → reconnect)
//!   ├── Pua handle task + update state forwarder
//!   └── StatusSender → node status collector
//!
//! TokenManager
//!   ├── TokenProvider (LocalTokenProvider mints unsigned JWTs)
//!   └── refresh loop → tokens/<client>/access_token, tenantId
//! ```

pub mod agents;
pub mod auth;
pub mod client;
pub mod error;
pub mod hwinfo;
pub mod loopback;
pub mod retry;
pub mod state;
pub mod token;

pub use agents::Agents;
pub use auth::{call_context, CallContext};
pub use client::{FleetClient, FleetConnector, GrpcConnector};
pub use error::{AgentsError, AgentsResult, ClientError, TokenError, TokenResult};
pub use loopback::LoopbackFleet;
pub use retry::{retry_constant, ConstantBackoff};
pub use state::{AgentStateTable, AgentStates};
pub use token::{LocalTokenProvider, TokenManager, TokenProvider};
