//! Health Check Endpoints
//!
//! Provides Kubernetes-compatible health check endpoints:
//! - /health/ping - Simple liveness check
//! - /health/ready - Storage connectivity and scheduler state
//! - /health/live - Process alive check

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use fathom_storage::SensorStore;
use serde::Serialize;

use crate::jobs::{SchedulerSummary, SensorScheduler};
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize)]
#[derive(utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[derive(utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// Storage is reachable but some sensor loops have aborted.
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
#[derive(utoipa::ToSchema)]
pub struct HealthDetails {
    pub storage: ComponentHealth,
    pub scheduler: SchedulerSummary,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
#[derive(utoipa::ToSchema)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/ping - Simple pong response
#[utoipa::path(
    get,
    path = "/health/ping",
    tag = "Health",
    responses(
        (status = 200, description = "Service is responding", body = String),
    ),
)]
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live - Process liveness check
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Process is alive", body = HealthResponse),
    ),
)]
pub async fn liveness() -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Process is alive".to_string()),
        details: None,
    };
    (StatusCode::OK, Json(response))
}

/// GET /health/ready - Readiness check (storage and sensor loops)
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse),
        (status = 503, description = "Service is not ready", body = HealthResponse),
    ),
)]
pub async fn readiness(
    State(store): State<Arc<dyn SensorStore>>,
    State(scheduler): State<Arc<SensorScheduler>>,
    State(start_time): State<Instant>,
) -> impl IntoResponse {
    let storage = match check_storage(store.as_ref()).await {
        Ok(latency) => ComponentHealth {
            status: HealthStatus::Healthy,
            latency_ms: Some(latency),
            error: None,
        },
        Err(e) => ComponentHealth {
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            error: Some(e),
        },
    };
    let summary = scheduler.summary();

    let overall_status = overall_status(&storage, &summary);
    let response = HealthResponse {
        status: overall_status,
        message: None,
        details: Some(HealthDetails {
            storage,
            scheduler: summary,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: start_time.elapsed().as_secs(),
        }),
    };

    let status_code = if overall_status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(response))
}

fn overall_status(storage: &ComponentHealth, scheduler: &SchedulerSummary) -> HealthStatus {
    if storage.status != HealthStatus::Healthy {
        HealthStatus::Unhealthy
    } else if scheduler.aborted > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

async fn check_storage(store: &dyn SensorStore) -> Result<u64, String> {
    let start = Instant::now();
    match store.health_check().await {
        Ok(()) => Ok(start.elapsed().as_millis() as u64),
        Err(e) => Err(format!("Storage check failed: {}", e)),
    }
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(status: HealthStatus) -> ComponentHealth {
        ComponentHealth {
            status,
            latency_ms: None,
            error: None,
        }
    }

    #[test]
    fn test_health_response_serialization() -> Result<(), serde_json::Error> {
        let response = HealthResponse {
            status: HealthStatus::Healthy,
            message: Some("All systems operational".to_string()),
            details: None,
        };
        let json = serde_json::to_string(&response)?;
        assert!(json.contains("\"healthy\""));
        assert!(!json.contains("details"));
        Ok(())
    }

    #[test]
    fn test_aborted_loops_degrade() {
        let summary = SchedulerSummary {
            sensors: 3,
            running: 2,
            aborted: 1,
            ..SchedulerSummary::default()
        };
        assert_eq!(
            overall_status(&component(HealthStatus::Healthy), &summary),
            HealthStatus::Degraded
        );
        assert_eq!(
            overall_status(&component(HealthStatus::Unhealthy), &summary),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            overall_status(&component(HealthStatus::Healthy), &SchedulerSummary::default()),
            HealthStatus::Healthy
        );
    }
}
