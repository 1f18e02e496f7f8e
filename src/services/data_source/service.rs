//! Data source service
//!
//! The façade used by request handlers: look up the data source, derive its
//! pool key, and hand back a pooled typed client or a bound legacy call
//! function. Typed and legacy clients live in separate pools because they are
//! never interchangeable, even for the same key.

use super::audit::{default_sink, AuditSink};
use super::client::DataSourceClient;
use super::credential::{AuthConfig, CredentialOverride, CredentialResolver};
use super::crypto::{CredentialDecryptor, PlaintextDecryptor};
use super::error::DataSourceError;
use super::factory::{ClientBuildInputs, ClientFactory};
use super::legacy::{LegacyCallBinding, LegacyClient};
use super::metadata::{DataSourceId, DataSourceMetadataStore, DataSourceRecord};
use super::metrics::DataSourceMetrics;
use super::pool::{ClientHandle, ClientPool, PoolConfig, PoolKey, PoolStats};
use super::transport::TransportConfig;
use super::validator::{ConnectionValidator, ValidationResult};
use serde::Deserialize;
use std::sync::Arc;
use ::validator::Validate;

pub const TYPED_POOL: &str = "typed";
pub const LEGACY_POOL: &str = "legacy";

/// Caller context carried for logging
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: Option<String>,
    pub user: Option<String>,
}

/// Per-request parameters for obtaining a client
#[derive(Debug, Clone, Default)]
pub struct DataSourceClientParams {
    pub data_source_id: DataSourceId,
    pub credential_override: Option<CredentialOverride>,
    pub context: Option<RequestContext>,
}

impl DataSourceClientParams {
    pub fn new(data_source_id: impl Into<String>) -> Self {
        Self {
            data_source_id: DataSourceId::new(data_source_id),
            credential_override: None,
            context: None,
        }
    }

    pub fn with_override(mut self, credential_override: CredentialOverride) -> Self {
        self.credential_override = Some(credential_override);
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// A "test connection" request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TestConnectionRequest {
    /// Existing data source whose stored credentials are reused when `auth` is absent
    #[serde(default)]
    pub data_source_id: Option<String>,
    #[validate(length(min = 1, max = 2048))]
    pub endpoint: String,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub transport: Option<TransportConfig>,
}

/// Collaborators the service depends on
#[derive(Clone)]
pub struct ServiceDependencies {
    pub metadata: Arc<dyn DataSourceMetadataStore>,
    pub decryptor: Arc<dyn CredentialDecryptor>,
    pub audit: Arc<dyn AuditSink>,
}

impl ServiceDependencies {
    pub fn new(metadata: Arc<dyn DataSourceMetadataStore>) -> Self {
        Self {
            metadata,
            decryptor: Arc::new(PlaintextDecryptor),
            audit: default_sink(),
        }
    }

    pub fn with_decryptor(mut self, decryptor: Arc<dyn CredentialDecryptor>) -> Self {
        self.decryptor = decryptor;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }
}

pub struct DataSourceService {
    metadata: Arc<dyn DataSourceMetadataStore>,
    resolver: CredentialResolver,
    factory: Arc<ClientFactory>,
    typed_pool: ClientPool<DataSourceClient>,
    legacy_pool: ClientPool<LegacyClient>,
    validator: ConnectionValidator,
    metrics: Option<DataSourceMetrics>,
}

impl DataSourceService {
    /// Create both pools and the validator
    pub fn setup(config: PoolConfig, deps: ServiceDependencies) -> Result<Self, DataSourceError> {
        config.validate()?;

        let metrics = match DataSourceMetrics::new() {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to register data source metrics, continuing without");
                None
            }
        };
        let factory = Arc::new(ClientFactory::new(config.clone()));

        let typed_pool = ClientPool::with_observers(
            TYPED_POOL,
            config.max_cached_clients,
            metrics.clone(),
            Arc::clone(&deps.audit),
        );
        let legacy_pool = ClientPool::with_observers(
            LEGACY_POOL,
            config.max_cached_clients,
            metrics.clone(),
            Arc::clone(&deps.audit),
        );
        let validator = ConnectionValidator::new(Arc::clone(&factory), metrics.clone(), deps.audit);

        tracing::info!(
            max_cached_clients = config.max_cached_clients,
            default_timeout_ms = config.default_timeout.as_millis() as u64,
            tls = %config.tls.verification,
            "Data source service started"
        );

        Ok(Self {
            metadata: deps.metadata,
            resolver: CredentialResolver::new(deps.decryptor),
            factory,
            typed_pool,
            legacy_pool,
            validator,
            metrics,
        })
    }

    /// Pooled typed client for the data source and effective credential
    pub async fn get_data_source_client(
        &self,
        params: &DataSourceClientParams,
    ) -> Result<ClientHandle<DataSourceClient>, DataSourceError> {
        if self.typed_pool.is_closed() {
            return Err(DataSourceError::PoolClosed);
        }
        let (key, inputs) = self.prepare(params).await?;
        let fingerprint = inputs.fingerprint();

        let factory = Arc::clone(&self.factory);
        self.typed_pool
            .get_or_create(key, &fingerprint, move || async move { factory.create_typed(&inputs) })
            .await
    }

    /// Legacy call function bound to the data source
    ///
    /// The data source and credential are resolved now, so an unknown id
    /// fails here rather than on the first call.
    pub async fn get_data_source_legacy_client(
        &self,
        params: &DataSourceClientParams,
    ) -> Result<LegacyCallBinding, DataSourceError> {
        if self.legacy_pool.is_closed() {
            return Err(DataSourceError::PoolClosed);
        }
        let (key, inputs) = self.prepare(params).await?;
        let fingerprint = inputs.fingerprint();
        Ok(LegacyCallBinding::new(
            key,
            fingerprint,
            Arc::new(inputs),
            self.legacy_pool.clone(),
            Arc::clone(&self.factory),
        ))
    }

    /// Drop every pooled client of a data source from both pools
    ///
    /// Call after the data source's endpoint or credentials change.
    pub fn invalidate_data_source(&self, data_source_id: &str) -> usize {
        let removed = self.typed_pool.invalidate_data_source(data_source_id)
            + self.legacy_pool.invalidate_data_source(data_source_id);
        tracing::info!(data_source_id, removed, "Invalidated pooled clients");
        removed
    }

    /// Probe a candidate configuration without touching the pools
    pub async fn test_connection(
        &self,
        request: &TestConnectionRequest,
    ) -> Result<ValidationResult, DataSourceError> {
        request
            .validate()
            .map_err(|e| DataSourceError::TransportConfigError(e.to_string()))?;
        let transport = request.transport.clone().unwrap_or_default();

        match (&request.auth, &request.data_source_id) {
            (Some(auth), _) => self.validator.validate(&request.endpoint, auth, &transport).await,
            (None, Some(id)) => {
                let record = self.lookup(&DataSourceId::new(id.as_str())).await?;
                let credential = self.resolver.resolve(&record.auth, None).await?;
                self.validator
                    .validate_resolved(Some(id), &request.endpoint, credential, &transport)
                    .await
            }
            (None, None) => {
                self.validator
                    .validate(&request.endpoint, &AuthConfig::NoAuth, &transport)
                    .await
            }
        }
    }

    pub fn validator(&self) -> &ConnectionValidator {
        &self.validator
    }

    pub fn pool_stats(&self) -> Vec<PoolStats> {
        vec![self.typed_pool.stats(), self.legacy_pool.stats()]
    }

    pub fn metrics(&self) -> Option<&DataSourceMetrics> {
        self.metrics.as_ref()
    }

    pub fn is_stopped(&self) -> bool {
        self.typed_pool.is_closed() && self.legacy_pool.is_closed()
    }

    /// Shut down both pools; every later request fails with `PoolClosed`
    pub fn stop(&self) {
        self.typed_pool.shutdown();
        self.legacy_pool.shutdown();
        tracing::info!("Data source service stopped");
    }

    async fn lookup(&self, id: &DataSourceId) -> Result<DataSourceRecord, DataSourceError> {
        self.metadata
            .get_data_source(id)
            .await?
            .ok_or_else(|| DataSourceError::DataSourceNotFound(id.to_string()))
    }

    async fn prepare(
        &self,
        params: &DataSourceClientParams,
    ) -> Result<(PoolKey, ClientBuildInputs), DataSourceError> {
        let id = &params.data_source_id;
        if id.as_str().trim().is_empty() {
            return Err(DataSourceError::DataSourceNotFound(
                "empty data source id".to_string(),
            ));
        }

        let record = self.lookup(id).await?;
        let credential = self
            .resolver
            .resolve(&record.auth, params.credential_override.as_ref())
            .await?;

        if let Some(context) = &params.context {
            tracing::debug!(
                data_source_id = %id,
                request_id = context.request_id.as_deref().unwrap_or("-"),
                user = context.user.as_deref().unwrap_or("-"),
                credential = %credential.effective,
                "Resolving data source client"
            );
        }

        let key = PoolKey::new(id.as_str(), credential.effective.clone());
        let inputs = self
            .factory
            .prepare(id.as_str(), &record.endpoint, &record.transport, credential)?;
        Ok((key, inputs))
    }
}

impl Drop for DataSourceService {
    fn drop(&mut self) {
        if !self.is_stopped() {
            self.stop();
        }
    }
}
