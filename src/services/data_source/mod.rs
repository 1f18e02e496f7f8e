//! Data Source Module
//!
//! Pooled, credential-aware clients for multiple search cluster data sources.
//!
//! # Features
//! - One cached client per (data source, effective credential), created once
//!   however many requests race for it
//! - LRU capacity bound that never evicts a client still being created
//! - Typed and legacy call-style clients in separate pools
//! - Username/password, SigV4, client certificate and on-behalf-of auth
//! - "Test connection" probes that never touch the pools
//!
//! # Example
//! ```ignore
//! use data_source_service::services::data_source::{
//!     DataSourceClientParams, DataSourceService, PoolConfig, ServiceDependencies,
//! };
//!
//! let service = DataSourceService::setup(PoolConfig::default(), ServiceDependencies::new(store))?;
//! let client = service
//!     .get_data_source_client(&DataSourceClientParams::new("logs"))
//!     .await?;
//! let health = client.cluster_health().await?;
//! ```

mod audit;
mod client;
mod credential;
mod crypto;
mod error;
mod factory;
mod legacy;
mod metadata;
mod metrics;
mod pool;
mod service;
mod signer;
mod transport;
mod validator;

pub use audit::{AuditEvent, AuditEventKind, AuditSink, RecordingAuditSink, TracingAuditSink};
pub use client::{ClusterTransport, DataSourceClient, TransportRequest, TransportResponse};
pub use credential::{
    AuthConfig, AwsCredentialSource, CredentialOverride, CredentialResolver, EffectiveCredential,
    EncryptedRef, ResolvedCredential, SecretString, SigV4Service,
};
pub use crypto::{generate_key, AesGcmDecryptor, CredentialDecryptor, DecryptionError, PlaintextDecryptor};
pub use error::{DataSourceError, TransportFailure};
pub use factory::{ClientBuildInputs, ClientFactory, SECURITY_TENANT_HEADER};
pub use legacy::{LegacyCallBinding, LegacyCallOptions, LegacyClient};
pub use metadata::{
    load_data_sources, DataSourceId, DataSourceMetadataStore, DataSourceRecord,
    InMemoryMetadataStore,
};
pub use metrics::{DataSourceMetrics, PoolEvent};
pub use pool::{ClientHandle, ClientPool, PoolClient, PoolConfig, PoolKey, PoolStats};
pub use service::{
    DataSourceClientParams, DataSourceService, RequestContext, ServiceDependencies,
    TestConnectionRequest, LEGACY_POOL, TYPED_POOL,
};
pub use transport::{ResolvedTransport, TlsConfig, TlsVerificationMode, TransportConfig};
pub use self::validator::{ConnectionValidator, ValidationResult, ValidationStatus};
