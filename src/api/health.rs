//! Health check endpoints
//!
//! Probes for monitoring and container orchestration. Readiness follows the
//! data source pools: once they are shut down the instance stops taking
//! traffic.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::server::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub environment: String,
    pub uptime_seconds: u64,
    pub pools: Vec<PoolHealth>,
}

/// Occupancy of one client pool
#[derive(Serialize)]
pub struct PoolHealth {
    pub pool: &'static str,
    pub cached: usize,
    pub capacity: usize,
    pub in_flight: usize,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub pools_open: bool,
    pub data_sources: usize,
}

#[derive(Serialize)]
pub struct LivenessResponse {
    pub alive: bool,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let pools = state
        .data_sources
        .pool_stats()
        .into_iter()
        .map(|stats| PoolHealth {
            pool: stats.pool,
            cached: stats.cached,
            capacity: stats.capacity,
            in_flight: stats.in_flight,
        })
        .collect();

    Json(HealthResponse {
        status: if state.data_sources.is_stopped() {
            "stopping"
        } else {
            "healthy"
        },
        version: state.settings.app_version.clone(),
        environment: state.settings.environment.to_string(),
        uptime_seconds: state.uptime_seconds(),
        pools,
    })
}

/// GET /ready
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let checks = ReadinessChecks {
        pools_open: !state.data_sources.is_stopped(),
        data_sources: state.metadata.len().await,
    };

    let ready = checks.pools_open;
    if !ready {
        tracing::warn!(checks = ?checks, "Service not ready");
    }
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(ReadinessResponse { ready, checks }))
}

/// GET /liveness
pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { alive: true })
}
