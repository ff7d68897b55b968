//! REST API handlers
//!
//! | Route            | Description                                  |
//! |------------------|----------------------------------------------|
//! | `GET /health`    | component health, see [`super::health`]      |
//! | `GET /members`   | latest reconciled members of the member path |
//! | `GET /endpoints` | monitored stream endpoints                   |
//! | `GET /stream`    | server-sent ADD/REMOVE actions               |
//! | `GET /metrics`   | Prometheus text exposition                   |

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::action::EndpointEntry;
use crate::metrics;
use crate::models::{ActionType, Instance, StreamAction};

use super::health::create_health_router;
use super::AppState;

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MembersResponse {
    pub path: String,
    pub count: usize,
    pub members: Vec<Instance>,
}

#[derive(Debug, Serialize)]
pub struct EndpointsResponse {
    pub count: usize,
    pub endpoints: Vec<EndpointEntry>,
}

// ============================================================================
// Router
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/members", get(list_members))
        .route("/endpoints", get(list_endpoints))
        .route("/stream", get(stream_actions))
        .route("/metrics", get(export_metrics))
        .with_state(state.clone());

    api.merge(create_health_router(state))
        .route_layer(middleware::from_fn(track_requests))
}

/// Record count and latency per matched route
async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let started = Instant::now();
    let response = next.run(request).await;

    metrics::record_api_request(
        &endpoint,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_members(State(state): State<AppState>) -> Response {
    match state.manager.members(&state.member_path).await {
        Some(members) => Json(ApiResponse::success(MembersResponse {
            path: state.member_path.clone(),
            count: members.len(),
            members,
        }))
        .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new(format!(
                "{} is not being watched",
                state.member_path
            ))),
        )
            .into_response(),
    }
}

async fn list_endpoints(State(state): State<AppState>) -> impl IntoResponse {
    let endpoints = state.registry.endpoints().await;
    Json(ApiResponse::success(EndpointsResponse {
        count: endpoints.len(),
        endpoints,
    }))
}

/// Current endpoints as ADD actions, followed by every later change
///
/// A subscriber that falls behind is disconnected and replays the current
/// set when it reconnects. Every stream ends when the server shuts down.
async fn stream_actions(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let changes = state.registry.subscribe();
    let current: Vec<StreamAction> = state
        .registry
        .endpoints()
        .await
        .into_iter()
        .map(|entry| StreamAction::new(ActionType::Add, entry.uri))
        .collect();

    tracing::debug!(endpoints = current.len(), "Action stream subscriber connected");

    let live = stream::unfold(changes, |mut changes| async move {
        match changes.recv().await {
            Ok(action) => Some((action, changes)),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Action stream subscriber lagged, disconnecting");
                None
            }
            Err(RecvError::Closed) => None,
        }
    });

    let events = stream::iter(current)
        .chain(live)
        .take_until(state.stopped())
        .map(|action| Event::default().event("action").json_data(&action));

    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn export_metrics() -> Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string())),
        )
            .into_response(),
    }
}
