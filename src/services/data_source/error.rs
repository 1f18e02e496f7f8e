//! Error types for data source client resolution and use
//!
//! `DataSourceError` is `Clone` because a single failed client creation is
//! delivered to every caller waiting on the same pool key.

use serde::Serialize;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use thiserror::Error;

// ============================================================================
// Transport Failure Kind
// ============================================================================

/// Coarse classification of a transport-level failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportFailure {
    /// The request or connection attempt exceeded its deadline
    Timeout,
    /// TCP connection could not be established
    Connect,
    /// TLS handshake or certificate verification failed
    Tls,
    /// Anything else (body decoding, broken pipe, ...)
    Other,
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Connect => write!(f, "connect"),
            Self::Tls => write!(f, "tls"),
            Self::Other => write!(f, "other"),
        }
    }
}

// ============================================================================
// Data Source Error
// ============================================================================

/// Errors produced while resolving, building or using a data source client
#[derive(Error, Debug, Clone)]
pub enum DataSourceError {
    #[error("Data source not found: {0}")]
    DataSourceNotFound(String),

    #[error("Invalid credential shape: {0}")]
    InvalidCredentialShape(String),

    #[error("Unsupported auth type: {0}")]
    UnsupportedAuthType(String),

    #[error("Invalid transport configuration: {0}")]
    TransportConfigError(String),

    #[error("Failed to decrypt credential: {0}")]
    DecryptionError(String),

    #[error("Client pool is closed")]
    PoolClosed,

    #[error("Data source metadata lookup failed: {0}")]
    MetadataLookup(String),

    #[error("Transport error ({kind}): {message}")]
    Transport {
        kind: TransportFailure,
        message: String,
    },

    #[error("Data source responded with status {status}")]
    ResponseError {
        status: u16,
        body: serde_json::Value,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid legacy endpoint: {0}")]
    InvalidLegacyEndpoint(String),

    #[error("Request signing failed: {0}")]
    Signing(String),

    #[error("Client creation aborted: {0}")]
    CreationAborted(String),
}

impl DataSourceError {
    /// Whether the caller may reasonably retry the same request later
    ///
    /// The pool never retries on its own; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { kind, .. } => {
                matches!(kind, TransportFailure::Timeout | TransportFailure::Connect)
            }
            Self::ResponseError { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            Self::MetadataLookup(_) | Self::CreationAborted(_) => true,
            _ => false,
        }
    }

    /// Whether this error was caused by a configuration defect
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentialShape(_)
                | Self::UnsupportedAuthType(_)
                | Self::TransportConfigError(_)
        )
    }
}

impl From<reqwest::Error> for DataSourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            return Self::TransportConfigError(error_chain(&err));
        }
        Self::Transport {
            kind: classify_transport_error(&err),
            message: error_chain(&err),
        }
    }
}

// ============================================================================
// Classification Helpers
// ============================================================================

/// Markers found in rustls / hyper-rustls error messages
const TLS_MARKERS: &[&str] = &[
    "certificate",
    "tls",
    "ssl",
    "handshake",
    "corrupt message",
    "invalidcontenttype",
    "peer is incompatible",
    "unknownissuer",
    "notvalidforname",
];

/// Classify a reqwest error into a `TransportFailure`
///
/// Only the causes below the top-level error are inspected. reqwest's own
/// message carries the request URL, which says nothing about the failure.
pub fn classify_transport_error(err: &reqwest::Error) -> TransportFailure {
    if err.is_timeout() {
        return TransportFailure::Timeout;
    }
    if let Some(kind) = classify_sources(err.source()) {
        return kind;
    }
    if err.is_connect() {
        return TransportFailure::Connect;
    }
    TransportFailure::Other
}

/// Walk a cause chain looking for socket or TLS failures
///
/// rustls failures surface through tokio-rustls as `io::Error`s of kind
/// `InvalidData`; refused connections keep their `io::ErrorKind`.
fn classify_sources(mut source: Option<&(dyn StdError + 'static)>) -> Option<TransportFailure> {
    let mut tls = false;
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrNotAvailable => {
                    return Some(TransportFailure::Connect);
                }
                io::ErrorKind::TimedOut => return Some(TransportFailure::Timeout),
                io::ErrorKind::InvalidData => tls = true,
                _ => {}
            }
        }
        if mentions_tls(&cause.to_string()) {
            tls = true;
        }
        source = cause.source();
    }
    tls.then_some(TransportFailure::Tls)
}

/// Whether an error message chain points at a TLS failure
pub fn mentions_tls(chain: &str) -> bool {
    let lower = chain.to_lowercase();
    TLS_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Render an error and all of its sources as a single line
pub fn error_chain(err: &dyn StdError) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !rendered.contains(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        source = cause.source();
    }
    rendered
}

// ============================================================================
// Tests
// ============================================================================
