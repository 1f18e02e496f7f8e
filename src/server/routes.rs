//! Application routing
//!
//! This module defines all HTTP routes for the application.

use axum::{
    http::HeaderName,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{data_sources, health, metrics};
use crate::middleware::{log_request, REQUEST_ID_HEADER, TRACE_ID_HEADER};
use crate::server::state::AppState;

/// Prefix of the internal data source management routes
pub const DATA_SOURCE_MANAGEMENT_PREFIX: &str = "/internal/data-source-management";

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness))
        .route("/liveness", get(health::liveness))
        .route("/metrics", get(metrics::metrics));

    let data_source_routes = Router::new()
        .route("/validate", post(data_sources::validate))
        .route("/data-sources/:id/call", post(data_sources::call))
        .route("/data-sources/:id/invalidate", post(data_sources::invalidate))
        .route("/pools", get(data_sources::pools));

    Router::new()
        .nest(DATA_SOURCE_MANAGEMENT_PREFIX, data_source_routes)
        .merge(health_routes)
        // Layer order: last added = outermost = runs first
        .layer(create_cors_layer())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Create CORS layer with permissive settings for development
fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static(TRACE_ID_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}
