//! Data source management endpoints
//!
//! Internal routes for validating candidate configurations, calling a data
//! source through its legacy binding, and inspecting or invalidating the
//! client pools.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::middleware::TraceId;
use crate::server::state::AppState;
use crate::services::data_source::{
    CredentialOverride, DataSourceClientParams, LegacyCallOptions, PoolStats, RequestContext,
    TestConnectionRequest, ValidationResult, SECURITY_TENANT_HEADER,
};

/// Header carrying the calling user's name, for logs only
pub const USER_HEADER: &str = "x-forwarded-user";

/// Body of a legacy call
#[derive(Debug, Deserialize)]
pub struct CallRequest {
    pub endpoint: String,
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
    #[serde(default)]
    pub options: Option<LegacyCallOptions>,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub data_source_id: String,
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct PoolsResponse {
    pub stopped: bool,
    pub pools: Vec<PoolStats>,
}

/// POST /internal/data-source-management/validate
pub async fn validate(
    State(state): State<AppState>,
    Json(request): Json<TestConnectionRequest>,
) -> Result<Json<ValidationResult>, ApiError> {
    let result = state.data_sources.test_connection(&request).await?;
    Ok(Json(result))
}

/// POST /internal/data-source-management/data-sources/:id/call
///
/// A bearer token on the request becomes an on-behalf-of credential, and a
/// `securitytenant` header selects the tenant.
pub async fn call(
    State(state): State<AppState>,
    Path(id): Path<String>,
    trace_id: Option<Extension<TraceId>>,
    headers: HeaderMap,
    Json(request): Json<CallRequest>,
) -> Result<Json<Value>, ApiError> {
    let context = RequestContext {
        request_id: trace_id.map(|Extension(t)| t.0),
        user: header_value(&headers, USER_HEADER),
    };
    let mut params = DataSourceClientParams::new(id).with_context(context);
    if let Some(credential_override) = credential_override(&headers) {
        params = params.with_override(credential_override);
    }

    let binding = state.data_sources.get_data_source_legacy_client(&params).await?;
    let body = binding
        .call(&request.endpoint, request.params, request.options)
        .await?;
    Ok(Json(body))
}

/// POST /internal/data-source-management/data-sources/:id/invalidate
pub async fn invalidate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<InvalidateResponse> {
    let removed = state.data_sources.invalidate_data_source(&id);
    Json(InvalidateResponse {
        data_source_id: id,
        removed,
    })
}

/// GET /internal/data-source-management/pools
pub async fn pools(State(state): State<AppState>) -> Json<PoolsResponse> {
    Json(PoolsResponse {
        stopped: state.data_sources.is_stopped(),
        pools: state.data_sources.pool_stats(),
    })
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn credential_override(headers: &HeaderMap) -> Option<CredentialOverride> {
    let token = header_value(headers, header::AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Bearer ").map(|t| t.trim().to_string()))
        .filter(|t| !t.is_empty());
    let tenant = header_value(headers, SECURITY_TENANT_HEADER);

    let mut credential_override = match token {
        Some(token) => CredentialOverride::on_behalf_of(token),
        None => CredentialOverride::default(),
    };
    if let Some(tenant) = tenant {
        credential_override = credential_override.with_tenant(tenant);
    }
    (!credential_override.is_empty()).then_some(credential_override)
}
