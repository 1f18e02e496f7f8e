//! API error types

use crate::services::data_source::{DataSourceError, TransportFailure};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Bad gateway: {0}")]
    BadGateway(String),

    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),

    /// Non-2xx answer from a data source, relayed as is
    #[error("Data source responded with status {status}")]
    Upstream {
        status: u16,
        body: serde_json::Value,
    },

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<DataSourceError> for ApiError {
    fn from(err: DataSourceError) -> Self {
        let message = err.to_string();
        match err {
            DataSourceError::DataSourceNotFound(_) => ApiError::NotFound(message),
            DataSourceError::InvalidCredentialShape(_)
            | DataSourceError::UnsupportedAuthType(_)
            | DataSourceError::TransportConfigError(_)
            | DataSourceError::InvalidLegacyEndpoint(_) => ApiError::InvalidRequest(message),
            DataSourceError::DecryptionError(_) | DataSourceError::Unauthorized(_) => {
                ApiError::Unauthorized(message)
            }
            DataSourceError::PoolClosed => ApiError::ServiceUnavailable(message),
            DataSourceError::MetadataLookup(_) | DataSourceError::Signing(_) => {
                ApiError::BadGateway(message)
            }
            DataSourceError::Transport { kind, .. } => match kind {
                TransportFailure::Timeout => ApiError::GatewayTimeout(message),
                _ => ApiError::BadGateway(message),
            },
            DataSourceError::ResponseError { status, body } => ApiError::Upstream { status, body },
            DataSourceError::CreationAborted(_) => ApiError::Internal(anyhow::anyhow!(message)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::Upstream { status, body } => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                return (status, Json(body)).into_response();
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found_error", msg),
            ApiError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                msg,
            ),
            ApiError::InvalidRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                msg,
            ),
            ApiError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable_error",
                msg,
            ),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "api_error", msg),
            ApiError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout_error", msg),
            ApiError::Internal(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "api_error",
                err.to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            type_: "error".to_string(),
            error: ErrorDetail {
                type_: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    #[serde(rename = "type")]
    type_: String,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    type_: String,
    message: String,
}
