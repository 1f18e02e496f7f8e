//! Prometheus metrics for the client pools and the connection validator

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

/// Pool lifecycle events counted per pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    Hit,
    Miss,
    Created,
    CreationFailed,
    Evicted,
    Invalidated,
}

impl PoolEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Created => "created",
            Self::CreationFailed => "creation_failed",
            Self::Evicted => "evicted",
            Self::Invalidated => "invalidated",
        }
    }
}

/// Metric families owned by one `DataSourceService`
#[derive(Clone)]
pub struct DataSourceMetrics {
    registry: Registry,
    pool_events: IntCounterVec,
    pool_size: IntGaugeVec,
    validations: IntCounterVec,
}

impl DataSourceMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let pool_events = IntCounterVec::new(
            Opts::new(
                "data_source_pool_events_total",
                "Client pool lifecycle events",
            ),
            &["pool", "event"],
        )?;
        let pool_size = IntGaugeVec::new(
            Opts::new("data_source_pool_size", "Resolved clients currently pooled"),
            &["pool"],
        )?;
        let validations = IntCounterVec::new(
            Opts::new(
                "data_source_validation_total",
                "Connection validation outcomes",
            ),
            &["status"],
        )?;

        registry.register(Box::new(pool_events.clone()))?;
        registry.register(Box::new(pool_size.clone()))?;
        registry.register(Box::new(validations.clone()))?;

        Ok(Self {
            registry,
            pool_events,
            pool_size,
            validations,
        })
    }

    pub fn pool_event(&self, pool: &str, event: PoolEvent) {
        self.pool_events
            .with_label_values(&[pool, event.as_str()])
            .inc();
    }

    pub fn set_pool_size(&self, pool: &str, size: usize) {
        self.pool_size
            .with_label_values(&[pool])
            .set(size as i64);
    }

    pub fn validation(&self, status: &str) {
        self.validations.with_label_values(&[status]).inc();
    }

    pub fn event_count(&self, pool: &str, event: PoolEvent) -> u64 {
        self.pool_events
            .with_label_values(&[pool, event.as_str()])
            .get()
    }

    /// Render all families in the Prometheus text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_series() {
        let metrics = DataSourceMetrics::new().unwrap();
        metrics.pool_event("typed", PoolEvent::Created);
        metrics.pool_event("typed", PoolEvent::Created);
        metrics.set_pool_size("typed", 2);
        metrics.validation("reachable");

        assert_eq!(metrics.event_count("typed", PoolEvent::Created), 2);

        let text = metrics.render().unwrap();
        assert!(text.contains("data_source_pool_events_total{event=\"created\",pool=\"typed\"} 2"));
        assert!(text.contains("data_source_pool_size{pool=\"typed\"} 2"));
        assert!(text.contains("data_source_validation_total{status=\"reachable\"} 1"));
    }
}
