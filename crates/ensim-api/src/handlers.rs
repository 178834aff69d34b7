//! REST API handlers.
//!
//! Each handler calls into `FleetService` and returns the JSON envelope
//! `{success, data?, error?}`.

use std::convert::Infallible;
use std::future::Future;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::Stream;
use tracing::debug;

use ensim_store::StoreError;

use crate::error::{ServiceError, ServiceResult};
use crate::model::{
    CreateNodeRequest, CreateNodesRequest, DeleteNodesQuery, NodeView, UpdateAgentsRequest,
    WatchEventView, WatchQuery,
};
use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn status_code(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::InvalidArgument(_) | ServiceError::Store(StoreError::EmptyUuid) => {
            StatusCode::BAD_REQUEST
        }
        ServiceError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        ServiceError::AlreadyExists(_)
        | ServiceError::Store(StoreError::AlreadyExists(_))
        | ServiceError::FailedPrecondition(_) => StatusCode::CONFLICT,
        ServiceError::Batch { succeeded, .. } if !succeeded.is_empty() => StatusCode::MULTI_STATUS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn service_error(err: ServiceError) -> Response {
    let status = status_code(&err);
    if let ServiceError::Batch { succeeded, failures } = &err {
        return (
            status,
            Json(ApiResponse {
                success: false,
                data: Some(serde_json::json!({
                    "succeeded": succeeded,
                    "failures": failures,
                })),
                error: Some(err.to_string()),
            }),
        )
            .into_response();
    }
    error_response(&err.to_string(), status)
}

/// Run a mutating operation on its own task so a dropped request cannot
/// leave a node half started or half stopped.
async fn detached<T, F>(fut: F) -> ServiceResult<T>
where
    T: Send + 'static,
    F: Future<Output = ServiceResult<T>> + Send + 'static,
{
    tokio::spawn(fut)
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> impl IntoResponse {
    let nodes = state.service.store().len().await;
    ApiResponse::ok(serde_json::json!({ "status": "ok", "nodes": nodes }))
}

// ── Nodes ──────────────────────────────────────────────────────

/// GET /api/v1/nodes
pub async fn list_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    let nodes: Vec<NodeView> = state
        .service
        .list_nodes()
        .await
        .iter()
        .map(|n| NodeView::from(n.as_ref()))
        .collect();
    ApiResponse::ok(nodes)
}

/// POST /api/v1/nodes
pub async fn create_node(
    State(state): State<ApiState>,
    Json(req): Json<CreateNodeRequest>,
) -> impl IntoResponse {
    let service = state.service.clone();
    let result = detached(async move { service.create_node(&req.uuid, &req.options).await }).await;
    match result {
        Ok(node) => (StatusCode::CREATED, ApiResponse::ok(NodeView::from(node.as_ref()))).into_response(),
        Err(e) => service_error(e),
    }
}

/// POST /api/v1/nodes/bulk
pub async fn create_nodes(
    State(state): State<ApiState>,
    Json(req): Json<CreateNodesRequest>,
) -> impl IntoResponse {
    let service = state.service.clone();
    let result = detached(async move {
        service
            .create_nodes(req.number, req.batch_size, &req.options)
            .await
    })
    .await;
    match result {
        Ok(uuids) => (
            StatusCode::CREATED,
            ApiResponse::ok(serde_json::json!({ "nodes": uuids })),
        )
            .into_response(),
        Err(e) => service_error(e),
    }
}

/// DELETE /api/v1/nodes?number=N
pub async fn delete_nodes(
    State(state): State<ApiState>,
    Query(query): Query<DeleteNodesQuery>,
) -> impl IntoResponse {
    let service = state.service.clone();
    match detached(async move { service.delete_nodes(query.number).await }).await {
        Ok(deleted) => ApiResponse::ok(serde_json::json!({ "deleted": deleted })).into_response(),
        Err(e) => service_error(e),
    }
}

/// GET /api/v1/nodes/{uuid}
pub async fn get_node(
    State(state): State<ApiState>,
    Path(uuid): Path<String>,
) -> impl IntoResponse {
    match state.service.get_node(&uuid).await {
        Ok(node) => ApiResponse::ok(NodeView::from(node.as_ref())).into_response(),
        Err(e) => service_error(e),
    }
}

/// DELETE /api/v1/nodes/{uuid}
pub async fn delete_node(
    State(state): State<ApiState>,
    Path(uuid): Path<String>,
) -> impl IntoResponse {
    let service = state.service.clone();
    match detached(async move { service.delete_node(&uuid).await }).await {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(e) => service_error(e),
    }
}

/// PUT /api/v1/nodes/{uuid}/agents
pub async fn update_agents(
    State(state): State<ApiState>,
    Path(uuid): Path<String>,
    Json(req): Json<UpdateAgentsRequest>,
) -> impl IntoResponse {
    if let Err(e) = state.service.update_node(&uuid, &req.agents).await {
        return service_error(e);
    }
    match state.service.get_node(&uuid).await {
        Ok(node) => ApiResponse::ok(node.agents_states()).into_response(),
        Err(e) => service_error(e),
    }
}

// ── Watch ──────────────────────────────────────────────────────

/// GET /api/v1/nodes/watch?replay=true&subscribe=true
///
/// Streams node events as Server-Sent Events named after the event type.
pub async fn watch_nodes(
    State(state): State<ApiState>,
    Query(query): Query<WatchQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let cancel = state.service.shutdown_token().child_token();
    let mut rx = state
        .service
        .watch_nodes(cancel, query.replay, query.subscribe)
        .await;

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let view = WatchEventView::from(&event);
            let data = serde_json::to_string(&view).unwrap_or_default();
            yield Ok(Event::default().event(view.kind).data(data));
        }
        debug!("node watch stream ended");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("ping"),
    )
}
