//! Health checks
//!
//! - `/health` - overall status with per-component checks
//! - `/health/live` - the process is serving requests
//! - `/health/ready` - the member path is being reconciled over a live session

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::models::ConnectionState;

use super::AppState;

// ============================================================================
// Health Status Types
// ============================================================================

/// Overall health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Worst of two statuses
    fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl From<ConnectionState> for HealthStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected | ConnectionState::Reconnected => Self::Healthy,
            ConnectionState::Suspended => Self::Degraded,
            ConnectionState::Lost => Self::Unhealthy,
        }
    }
}

/// Component health check result
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Comprehensive health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_secs: u64,
    pub timestamp: String,
    pub member_path: String,
    pub members: usize,
    pub endpoints: usize,
    pub checks: Vec<ComponentHealth>,
}

/// Liveness probe response
#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: HealthStatus,
    pub timestamp: String,
}

// ============================================================================
// Checks
// ============================================================================

/// Evaluate every component
pub async fn check(state: &AppState) -> HealthResponse {
    let connection = state.manager.client().state();
    let coordination = ComponentHealth {
        name: "coordination".to_string(),
        status: connection.into(),
        message: Some(format!("{} session {}", state.manager.client().name(), connection)),
    };

    let running = state.manager.is_running(&state.member_path).await;
    let discovery = ComponentHealth {
        name: "discovery".to_string(),
        status: if running {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        },
        message: (!running).then(|| format!("{} is not being reconciled", state.member_path)),
    };

    let status = coordination.status.worst(discovery.status);
    let members = state
        .manager
        .members(&state.member_path)
        .await
        .map(|members| members.len())
        .unwrap_or(0);

    HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        timestamp: Utc::now().to_rfc3339(),
        member_path: state.member_path.clone(),
        members,
        endpoints: state.registry.len().await,
        checks: vec![coordination, discovery],
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn create_health_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = check(&state).await;
    (report.status.status_code(), Json(report))
}

async fn liveness_probe() -> impl IntoResponse {
    Json(LivenessResponse {
        status: HealthStatus::Healthy,
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn readiness_probe(State(state): State<AppState>) -> impl IntoResponse {
    let report = check(&state).await;
    if report.status == HealthStatus::Unhealthy {
        tracing::debug!(status = report.status.as_str(), "Readiness check failed");
    }
    (report.status.status_code(), Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_health() {
        assert_eq!(HealthStatus::from(ConnectionState::Connected), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from(ConnectionState::Suspended), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from(ConnectionState::Lost), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_worst_status() {
        assert_eq!(
            HealthStatus::Healthy.worst(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Degraded.worst(HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
        assert_eq!(HealthStatus::Unhealthy.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(HealthStatus::Degraded.status_code(), StatusCode::OK);
    }
}
