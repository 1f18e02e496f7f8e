//! Client factory
//!
//! Builds typed, legacy and probe clients from an endpoint, a resolved
//! credential and resolved transport settings. Construction never performs
//! network I/O; the first request does.

use super::client::{ClusterTransport, DataSourceClient};
use super::credential::{CredentialMaterial, ResolvedCredential};
use super::error::DataSourceError;
use super::legacy::LegacyClient;
use super::pool::PoolConfig;
use super::signer::SigV4Signer;
use super::transport::{ResolvedTransport, TlsVerificationMode, TransportConfig};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use url::Url;

/// Header carrying the security tenant of a request
pub const SECURITY_TENANT_HEADER: &str = "securitytenant";

const PEM_CERT_END: &str = "-----END CERTIFICATE-----";

/// Everything needed to build a client, gathered once per request
#[derive(Debug, Clone)]
pub struct ClientBuildInputs {
    pub data_source_id: String,
    pub endpoint: Url,
    pub transport: ResolvedTransport,
    pub credential: ResolvedCredential,
}

impl ClientBuildInputs {
    /// Digest of the non-credential configuration the client is built from
    pub fn fingerprint(&self) -> String {
        self.transport.fingerprint(self.endpoint.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientFactory {
    defaults: PoolConfig,
}

impl ClientFactory {
    pub fn new(defaults: PoolConfig) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &PoolConfig {
        &self.defaults
    }

    /// Apply service defaults to a data source's transport settings
    pub fn resolve_transport(&self, config: &TransportConfig) -> Result<ResolvedTransport, DataSourceError> {
        let resolved = ResolvedTransport::resolve(&self.defaults, config);
        resolved.validate()?;
        Ok(resolved)
    }

    /// Parse and check a data source endpoint
    pub fn parse_endpoint(endpoint: &str) -> Result<Url, DataSourceError> {
        let url = Url::parse(endpoint.trim()).map_err(|e| {
            DataSourceError::TransportConfigError(format!("invalid endpoint '{}': {}", endpoint, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DataSourceError::TransportConfigError(format!(
                "endpoint scheme must be http or https, got {}",
                url.scheme()
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(DataSourceError::TransportConfigError(
                "endpoint has no host".to_string(),
            ));
        }
        Ok(url)
    }

    pub fn prepare(
        &self,
        data_source_id: impl Into<String>,
        endpoint: &str,
        transport: &TransportConfig,
        credential: ResolvedCredential,
    ) -> Result<ClientBuildInputs, DataSourceError> {
        Ok(ClientBuildInputs {
            data_source_id: data_source_id.into(),
            endpoint: Self::parse_endpoint(endpoint)?,
            transport: self.resolve_transport(transport)?,
            credential,
        })
    }

    pub fn create_typed(&self, inputs: &ClientBuildInputs) -> Result<DataSourceClient, DataSourceError> {
        let transport = self.build_transport(inputs, true)?;
        tracing::debug!(
            data_source_id = %inputs.data_source_id,
            credential = %inputs.credential.effective,
            "Built typed data source client"
        );
        Ok(DataSourceClient::new(inputs.data_source_id.clone(), transport))
    }

    pub fn create_legacy(&self, inputs: &ClientBuildInputs) -> Result<LegacyClient, DataSourceError> {
        let transport = self.build_transport(inputs, true)?;
        tracing::debug!(
            data_source_id = %inputs.data_source_id,
            credential = %inputs.credential.effective,
            "Built legacy data source client"
        );
        Ok(LegacyClient::new(inputs.data_source_id.clone(), transport))
    }

    /// One-off client for connection validation; keeps no idle connections
    pub fn create_probe(&self, inputs: &ClientBuildInputs) -> Result<DataSourceClient, DataSourceError> {
        let transport = self.build_transport(inputs, false)?;
        Ok(DataSourceClient::new(inputs.data_source_id.clone(), transport))
    }

    fn build_transport(
        &self,
        inputs: &ClientBuildInputs,
        pooled: bool,
    ) -> Result<ClusterTransport, DataSourceError> {
        let transport = &inputs.transport;
        let credential = &inputs.credential;
        let on_behalf_of = credential.overrides.on_behalf_of_token.as_ref();

        let mut headers = HeaderMap::new();
        for (name, value) in &transport.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                DataSourceError::TransportConfigError(format!("invalid header name: {}", name))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                DataSourceError::TransportConfigError(format!("invalid value for header {}", name))
            })?;
            headers.insert(name, value);
        }
        if let Some(tenant) = &credential.overrides.security_tenant {
            let value = HeaderValue::from_str(tenant).map_err(|_| {
                DataSourceError::InvalidCredentialShape("security tenant is not a valid header value".to_string())
            })?;
            headers.insert(HeaderName::from_static(SECURITY_TENANT_HEADER), value);
        }

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(transport.request_timeout)
            .connect_timeout(transport.connect_timeout);
        if !pooled {
            builder = builder.pool_max_idle_per_host(0);
        }

        builder = match transport.tls.verification {
            TlsVerificationMode::Strict => builder,
            TlsVerificationMode::Relaxed => builder.danger_accept_invalid_certs(true),
            TlsVerificationMode::CustomCa => {
                let pem = transport.tls.ca_certificate_pem.as_deref().unwrap_or_default();
                let mut builder = builder.tls_built_in_root_certs(false);
                for certificate in parse_ca_bundle(pem)? {
                    builder = builder.add_root_certificate(certificate);
                }
                builder
            }
        };

        // An on-behalf-of token replaces whatever the data source stores.
        let mut signer = None;
        match (on_behalf_of, &credential.material) {
            (Some(token), _) => {
                headers.insert(AUTHORIZATION, sensitive(&format!("Bearer {}", token.expose()))?);
            }
            (None, CredentialMaterial::None) => {}
            (None, CredentialMaterial::Basic { username, password }) => {
                let encoded = STANDARD.encode(format!("{}:{}", username, password.expose()));
                headers.insert(AUTHORIZATION, sensitive(&format!("Basic {}", encoded))?);
            }
            (None, CredentialMaterial::SigV4 { region, service, source }) => {
                signer = Some(SigV4Signer::new(region.clone(), *service, source)?);
            }
            (None, CredentialMaterial::ClientCertificate { pem }) => {
                let identity = reqwest::Identity::from_pem(pem.expose().as_bytes()).map_err(|e| {
                    DataSourceError::InvalidCredentialShape(format!("invalid client certificate: {}", e))
                })?;
                builder = builder.identity(identity);
            }
        }

        let http = builder.default_headers(headers).build()?;
        Ok(ClusterTransport::new(
            http,
            inputs.endpoint.clone(),
            signer,
            transport.request_timeout,
        ))
    }
}

fn sensitive(value: &str) -> Result<HeaderValue, DataSourceError> {
    let mut header = HeaderValue::from_str(value).map_err(|_| {
        DataSourceError::InvalidCredentialShape("credential is not a valid header value".to_string())
    })?;
    header.set_sensitive(true);
    Ok(header)
}

/// Split a PEM bundle into individual CA certificates
fn parse_ca_bundle(pem: &str) -> Result<Vec<reqwest::Certificate>, DataSourceError> {
    let certificates = pem
        .split_inclusive(PEM_CERT_END)
        .filter(|block| block.contains(PEM_CERT_END))
        .map(|block| {
            reqwest::Certificate::from_pem(block.trim().as_bytes()).map_err(|e| {
                DataSourceError::TransportConfigError(format!("invalid CA certificate: {}", e))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if certificates.is_empty() {
        return Err(DataSourceError::TransportConfigError(
            "CA bundle contains no certificates".to_string(),
        ));
    }
    Ok(certificates)
}
