//! Application state container
//!
//! This module defines the shared application state that is passed
//! to all request handlers via Axum's state extraction.

use crate::config::Settings;
use crate::services::data_source::{
    load_data_sources, AesGcmDecryptor, CredentialDecryptor, DataSourceService,
    InMemoryMetadataStore, PlaintextDecryptor, ServiceDependencies,
};
use anyhow::Context;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
///
/// Cheap to clone; every handler sees the same data source service.
#[derive(Clone)]
pub struct AppState {
    /// Application settings
    pub settings: Arc<Settings>,

    /// Configured data sources
    pub metadata: Arc<InMemoryMetadataStore>,

    /// Pooled data source clients and connection validation
    pub data_sources: Arc<DataSourceService>,

    /// Application start time (for uptime calculation)
    pub start_time: Instant,
}

impl AppState {
    /// Create a new application state
    ///
    /// Loads the configured data sources and starts the data source service.
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        let records = match &settings.data_source.data_sources_file {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading data sources");
                load_data_sources(path)?
            }
            None => {
                tracing::warn!("DATA_SOURCES_FILE not set, starting with no data sources");
                Vec::new()
            }
        };
        tracing::info!(count = records.len(), "Data sources loaded");
        let metadata = Arc::new(InMemoryMetadataStore::from_records(records));

        let decryptor: Arc<dyn CredentialDecryptor> = match &settings.data_source.encryption_key {
            Some(key) => Arc::new(
                AesGcmDecryptor::from_hex(key).context("Invalid DATA_SOURCE_ENCRYPTION_KEY")?,
            ),
            None => {
                tracing::debug!("No encryption key configured, stored credentials are plaintext");
                Arc::new(PlaintextDecryptor)
            }
        };

        let deps = ServiceDependencies::new(metadata.clone()).with_decryptor(decryptor);
        let service = DataSourceService::setup(settings.pool_config()?, deps)
            .context("Failed to start data source service")?;

        tracing::info!("Application state initialized successfully");

        Ok(Self::from_parts(settings, metadata, Arc::new(service)))
    }

    /// Assemble state from an already running service
    pub fn from_parts(
        settings: Settings,
        metadata: Arc<InMemoryMetadataStore>,
        data_sources: Arc<DataSourceService>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            metadata,
            data_sources,
            start_time: Instant::now(),
        }
    }

    /// Get the application uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
