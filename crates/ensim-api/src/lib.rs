//! ensim-api — northbound fleet service and REST API.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness and node count |
//! | GET | `/api/v1/nodes` | List nodes |
//! | POST | `/api/v1/nodes` | Create a node |
//! | DELETE | `/api/v1/nodes?number=N` | Delete N nodes (0 = all) |
//! | POST | `/api/v1/nodes/bulk` | Create nodes in batches |
//! | GET | `/api/v1/nodes/watch` | Node events (SSE) |
//! | GET | `/api/v1/nodes/{uuid}` | Get a node |
//! | DELETE | `/api/v1/nodes/{uuid}` | Delete a node |
//! | PUT | `/api/v1/nodes/{uuid}/agents` | Set desired agent states |

pub mod error;
pub mod handlers;
pub mod model;
pub mod service;

use axum::Router;
use axum::routing::{get, post, put};

pub use error::{BatchFailure, ServiceError, ServiceResult};
pub use service::{new_uuid, FleetService, NodeOptions};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub service: FleetService,
}

/// Build the complete API router.
pub fn build_router(service: FleetService) -> Router {
    let state = ApiState { service };

    let api_routes = Router::new()
        .route(
            "/nodes",
            get(handlers::list_nodes)
                .post(handlers::create_node)
                .delete(handlers::delete_nodes),
        )
        .route("/nodes/bulk", post(handlers::create_nodes))
        .route("/nodes/watch", get(handlers::watch_nodes))
        .route("/nodes/{uuid}", get(handlers::get_node).delete(handlers::delete_node))
        .route("/nodes/{uuid}/agents", put(handlers::update_agents))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz).with_state(state))
}
