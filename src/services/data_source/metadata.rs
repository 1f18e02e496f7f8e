//! Data source metadata lookup
//!
//! The service only needs to read a data source's endpoint and stored
//! configuration. Persistence lives elsewhere; `InMemoryMetadataStore` backs
//! local runs and tests and can be seeded from a file.

use super::credential::AuthConfig;
use super::error::DataSourceError;
use super::transport::TransportConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tokio::sync::RwLock;

/// Identifier of a configured data source
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct DataSourceId(String);

impl DataSourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataSourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Stored configuration of one data source
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DataSourceRecord {
    pub id: DataSourceId,
    #[serde(default)]
    pub title: Option<String>,
    pub endpoint: String,
    pub auth: AuthConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl DataSourceRecord {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>, auth: AuthConfig) -> Self {
        Self {
            id: DataSourceId::new(id),
            title: None,
            endpoint: endpoint.into(),
            auth,
            transport: TransportConfig::default(),
        }
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Read-only view of data source metadata
#[async_trait]
pub trait DataSourceMetadataStore: Send + Sync {
    /// `Ok(None)` when no data source has this id
    async fn get_data_source(&self, id: &DataSourceId) -> Result<Option<DataSourceRecord>, DataSourceError>;
}

/// Metadata held in memory
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: RwLock<HashMap<DataSourceId, DataSourceRecord>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = DataSourceRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }

    /// Insert or replace a record, returning the previous one
    pub async fn upsert(&self, record: DataSourceRecord) -> Option<DataSourceRecord> {
        self.records.write().await.insert(record.id.clone(), record)
    }

    pub async fn remove(&self, id: &DataSourceId) -> Option<DataSourceRecord> {
        self.records.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl DataSourceMetadataStore for InMemoryMetadataStore {
    async fn get_data_source(&self, id: &DataSourceId) -> Result<Option<DataSourceRecord>, DataSourceError> {
        Ok(self.records.read().await.get(id).cloned())
    }
}

#[derive(Debug, Deserialize)]
struct DataSourcesFile {
    #[serde(default)]
    data_sources: Vec<DataSourceRecord>,
}

/// Load data source records from a JSON, YAML or TOML file
pub fn load_data_sources(path: &Path) -> Result<Vec<DataSourceRecord>, DataSourceError> {
    let file: DataSourcesFile = config::Config::builder()
        .add_source(config::File::from(path))
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| {
            DataSourceError::MetadataLookup(format!(
                "failed to load data sources from {}: {}",
                path.display(),
                e
            ))
        })?;

    let mut seen = std::collections::HashSet::new();
    for record in &file.data_sources {
        if !seen.insert(record.id.clone()) {
            return Err(DataSourceError::MetadataLookup(format!(
                "duplicate data source id: {}",
                record.id
            )));
        }
    }
    Ok(file.data_sources)
}
