//! Connection validation ("test connection")
//!
//! Builds a throwaway client for a candidate configuration, sends one probe
//! to the cluster root and classifies the outcome. The shared pools are never
//! involved, and the probe client is closed however the probe ends.

use super::audit::{AuditEvent, AuditEventKind, AuditSink};
use super::client::{DataSourceClient, TransportRequest};
use super::credential::{AuthConfig, CredentialResolver, ResolvedCredential};
use super::crypto::PlaintextDecryptor;
use super::error::{DataSourceError, TransportFailure};
use super::factory::ClientFactory;
use super::metrics::DataSourceMetrics;
use super::pool::PoolClient;
use super::transport::TransportConfig;
use crate::utils::string::summarize_body;
use crate::utils::timeout::{deadline_with_grace, with_timeout, DEFAULT_GRACE};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

const DETAIL_MAX_CHARS: usize = 300;

/// Outcome class of a connection probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Reachable,
    AuthRejected,
    TlsError,
    Timeout,
    Unreachable,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reachable => "reachable",
            Self::AuthRejected => "auth_rejected",
            Self::TlsError => "tls_error",
            Self::Timeout => "timeout",
            Self::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    /// Human readable summary of the outcome
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub elapsed_ms: u64,
}

impl ValidationResult {
    fn new(status: ValidationStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
            http_status: None,
            cluster_name: None,
            version: None,
            elapsed_ms: 0,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.status == ValidationStatus::Reachable
    }
}

/// Closes the probe client when the probe scope ends
struct ProbeGuard(DataSourceClient);

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Probes candidate data source configurations
#[derive(Clone)]
pub struct ConnectionValidator {
    factory: Arc<ClientFactory>,
    /// Candidate credentials arrive unencrypted, before they are persisted
    candidate_resolver: CredentialResolver,
    metrics: Option<DataSourceMetrics>,
    audit: Arc<dyn AuditSink>,
}

impl ConnectionValidator {
    pub fn new(
        factory: Arc<ClientFactory>,
        metrics: Option<DataSourceMetrics>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            factory,
            candidate_resolver: CredentialResolver::new(Arc::new(PlaintextDecryptor)),
            metrics,
            audit,
        }
    }

    /// Validate a candidate endpoint with plaintext candidate credentials
    ///
    /// Configuration defects (bad endpoint, incomplete credentials,
    /// unsupported auth type) are returned as errors; everything the network
    /// says is reported through the `ValidationResult`.
    pub async fn validate(
        &self,
        endpoint: &str,
        auth: &AuthConfig,
        transport: &TransportConfig,
    ) -> Result<ValidationResult, DataSourceError> {
        let credential = self.candidate_resolver.resolve(auth, None).await?;
        self.validate_resolved(None, endpoint, credential, transport).await
    }

    /// Validate with credentials already resolved by the caller
    pub async fn validate_resolved(
        &self,
        data_source_id: Option<&str>,
        endpoint: &str,
        credential: ResolvedCredential,
        transport: &TransportConfig,
    ) -> Result<ValidationResult, DataSourceError> {
        let inputs = self.factory.prepare(
            data_source_id.unwrap_or("candidate"),
            endpoint,
            transport,
            credential,
        )?;
        let deadline = deadline_with_grace(inputs.transport.request_timeout, DEFAULT_GRACE);
        let probe = ProbeGuard(self.factory.create_probe(&inputs)?);

        let started = Instant::now();
        let outcome = with_timeout(deadline, probe.0.transport().send(TransportRequest::get("/"))).await;
        drop(probe);

        let mut result = match outcome {
            Ok(response) => classify_response(response.status, &response.body),
            Err(err) if err.is_timeout() => ValidationResult::new(
                ValidationStatus::Timeout,
                format!("no response within {:?}", inputs.transport.request_timeout),
            ),
            Err(err) => match err.into_inner() {
                Some(inner) => classify_error(&inner)?,
                None => ValidationResult::new(ValidationStatus::Timeout, "no response before the deadline"),
            },
        };
        result.elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            endpoint = %inputs.endpoint,
            status = %result.status,
            elapsed_ms = result.elapsed_ms,
            "Connection validation finished"
        );
        if let Some(metrics) = &self.metrics {
            metrics.validation(result.status.as_str());
        }
        let mut event = AuditEvent::new(AuditEventKind::ConnectionTested).detail(result.status.as_str());
        if let Some(id) = data_source_id {
            event = event.data_source(id);
        }
        self.audit.record(event);

        Ok(result)
    }
}

fn classify_response(status: u16, body: &serde_json::Value) -> ValidationResult {
    let mut result = match status {
        200..=299 => {
            let cluster_name = body
                .get("cluster_name")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let version = body
                .pointer("/version/number")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let detail = format!(
                "connected to cluster {} (version {})",
                cluster_name.as_deref().unwrap_or("unknown"),
                version.as_deref().unwrap_or("unknown")
            );
            let mut result = ValidationResult::new(ValidationStatus::Reachable, detail);
            result.cluster_name = cluster_name;
            result.version = version;
            result
        }
        401 | 403 => ValidationResult::new(
            ValidationStatus::AuthRejected,
            summarize_body(body, DETAIL_MAX_CHARS),
        ),
        _ => ValidationResult::new(
            ValidationStatus::Unreachable,
            format!(
                "unexpected status {}: {}",
                status,
                summarize_body(body, DETAIL_MAX_CHARS)
            ),
        ),
    };
    result.http_status = Some(status);
    result
}

fn classify_error(err: &DataSourceError) -> Result<ValidationResult, DataSourceError> {
    let status = match err {
        DataSourceError::Transport { kind, .. } => match kind {
            TransportFailure::Timeout => ValidationStatus::Timeout,
            TransportFailure::Tls => ValidationStatus::TlsError,
            TransportFailure::Connect | TransportFailure::Other => ValidationStatus::Unreachable,
        },
        DataSourceError::Signing(_) => ValidationStatus::AuthRejected,
        other => return Err(other.clone()),
    };
    Ok(ValidationResult::new(
        status,
        crate::utils::truncate_with_suffix(&err.to_string(), DETAIL_MAX_CHARS, "..."),
    ))
}
