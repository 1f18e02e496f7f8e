//! Audit trail for client lifecycle events
//!
//! Events carry the data source id and the short effective credential digest,
//! never plaintext credentials.

use super::credential::EffectiveCredential;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    ClientCreated,
    ClientCreationFailed,
    ClientEvicted,
    ClientInvalidated,
    PoolShutdown,
    ConnectionTested,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientCreated => "client_created",
            Self::ClientCreationFailed => "client_creation_failed",
            Self::ClientEvicted => "client_evicted",
            Self::ClientInvalidated => "client_invalidated",
            Self::PoolShutdown => "pool_shutdown",
            Self::ConnectionTested => "connection_tested",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_source_id: Option<String>,
    pub pool: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind) -> Self {
        Self {
            kind,
            data_source_id: None,
            pool: None,
            credential: None,
            detail: None,
            at: Utc::now(),
        }
    }

    pub fn data_source(mut self, id: impl Into<String>) -> Self {
        self.data_source_id = Some(id.into());
        self
    }

    pub fn pool(mut self, pool: &'static str) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn credential(mut self, credential: &EffectiveCredential) -> Self {
        self.credential = Some(credential.short().to_string());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Receives audit events; must not block
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit events as structured tracing records under the `audit` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            event = event.kind.as_str(),
            data_source_id = event.data_source_id.as_deref().unwrap_or("-"),
            pool = event.pool.unwrap_or("-"),
            credential = event.credential.as_deref().unwrap_or("-"),
            detail = event.detail.as_deref().unwrap_or(""),
            at = %event.at.to_rfc3339(),
            "Data source audit event"
        );
    }
}

pub fn default_sink() -> Arc<dyn AuditSink> {
    Arc::new(TracingAuditSink)
}

/// Keeps events in memory; used by tests to assert on the audit trail
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: std::sync::Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, kind: AuditEventKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder_and_recording() {
        let sink = RecordingAuditSink::default();
        sink.record(
            AuditEvent::new(AuditEventKind::ClientCreated)
                .data_source("ds-1")
                .pool("typed")
                .detail("fresh"),
        );
        sink.record(AuditEvent::new(AuditEventKind::PoolShutdown));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data_source_id.as_deref(), Some("ds-1"));
        assert_eq!(events[0].pool, Some("typed"));
        assert_eq!(sink.count(AuditEventKind::PoolShutdown), 1);

        let json = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(json["kind"], "client_created");
        assert!(json.get("credential").is_none());
    }
}
