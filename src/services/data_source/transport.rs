//! Transport settings for data source connections
//!
//! Each data source may carry its own TLS posture, timeouts and extra
//! headers. Anything it leaves unset falls back to the service defaults held
//! in [`PoolConfig`].

use super::error::DataSourceError;
use super::pool::PoolConfig;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// TLS
// ============================================================================

/// How server certificates are verified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsVerificationMode {
    /// Verify against the built-in web PKI roots (default)
    #[default]
    Strict,
    /// Accept any certificate; development clusters with self-signed certs
    Relaxed,
    /// Verify only against a configured CA bundle
    #[serde(alias = "custom-ca")]
    CustomCa,
}

impl FromStr for TlsVerificationMode {
    type Err = DataSourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" | "full" => Ok(Self::Strict),
            "relaxed" | "none" => Ok(Self::Relaxed),
            "custom_ca" | "custom-ca" | "customca" => Ok(Self::CustomCa),
            other => Err(DataSourceError::TransportConfigError(format!(
                "Invalid TLS verification mode: {}. Expected: strict, relaxed, or custom_ca",
                other
            ))),
        }
    }
}

impl fmt::Display for TlsVerificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Relaxed => write!(f, "relaxed"),
            Self::CustomCa => write!(f, "custom_ca"),
        }
    }
}

/// TLS settings for one data source (or the service default)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub verification: TlsVerificationMode,
    /// PEM-encoded CA bundle, required for `custom_ca`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificate_pem: Option<String>,
}

impl TlsConfig {
    pub fn strict() -> Self {
        Self::default()
    }

    pub fn relaxed() -> Self {
        Self {
            verification: TlsVerificationMode::Relaxed,
            ca_certificate_pem: None,
        }
    }

    pub fn custom_ca(pem: impl Into<String>) -> Self {
        Self {
            verification: TlsVerificationMode::CustomCa,
            ca_certificate_pem: Some(pem.into()),
        }
    }
}

// ============================================================================
// Transport Config
// ============================================================================

/// Per data source transport overrides, as stored with the metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransportConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    /// Extra headers sent with every request
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl TransportConfig {
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = Some(ms);
        self
    }

    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = Some(ms);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Transport settings after applying service defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTransport {
    pub tls: TlsConfig,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub headers: BTreeMap<String, String>,
}

impl ResolvedTransport {
    /// Merge per data source overrides over the service defaults
    pub fn resolve(defaults: &PoolConfig, overrides: &TransportConfig) -> Self {
        Self {
            tls: overrides.tls.clone().unwrap_or_else(|| defaults.tls.clone()),
            request_timeout: overrides
                .request_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_timeout),
            connect_timeout: overrides
                .connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            headers: overrides.headers.clone(),
        }
    }

    /// Reject settings that can never produce a working client
    pub fn validate(&self) -> Result<(), DataSourceError> {
        if self.request_timeout.is_zero() {
            return Err(DataSourceError::TransportConfigError(
                "request timeout must be > 0".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(DataSourceError::TransportConfigError(
                "connect timeout must be > 0".to_string(),
            ));
        }
        if self.tls.verification == TlsVerificationMode::CustomCa
            && self
                .tls
                .ca_certificate_pem
                .as_deref()
                .map_or(true, |pem| pem.trim().is_empty())
        {
            return Err(DataSourceError::TransportConfigError(
                "custom_ca TLS verification requires a CA certificate".to_string(),
            ));
        }
        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                DataSourceError::TransportConfigError(format!("invalid header name: {}", name))
            })?;
            HeaderValue::from_str(value).map_err(|_| {
                DataSourceError::TransportConfigError(format!(
                    "invalid value for header {}",
                    name
                ))
            })?;
        }
        Ok(())
    }

    /// Stable digest of everything a built client depends on besides auth
    ///
    /// A pooled client whose fingerprint no longer matches the stored
    /// configuration is rebuilt.
    pub fn fingerprint(&self, endpoint: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(endpoint.trim_end_matches('/').as_bytes());
        hasher.update([0u8]);
        hasher.update(self.tls.verification.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.tls.ca_certificate_pem.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(self.request_timeout.as_millis().to_le_bytes());
        hasher.update(self.connect_timeout.as_millis().to_le_bytes());
        for (name, value) in &self.headers {
            hasher.update(name.to_lowercase().as_bytes());
            hasher.update([b':']);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_mode_from_str() {
        assert_eq!(
            "strict".parse::<TlsVerificationMode>().unwrap(),
            TlsVerificationMode::Strict
        );
        assert_eq!(
            "RELAXED".parse::<TlsVerificationMode>().unwrap(),
            TlsVerificationMode::Relaxed
        );
        assert_eq!(
            "custom-ca".parse::<TlsVerificationMode>().unwrap(),
            TlsVerificationMode::CustomCa
        );
        assert!("bogus".parse::<TlsVerificationMode>().is_err());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let defaults = PoolConfig::default();
        let overrides = TransportConfig::default()
            .with_request_timeout_ms(1500)
            .with_tls(TlsConfig::relaxed());

        let resolved = ResolvedTransport::resolve(&defaults, &overrides);
        assert_eq!(resolved.request_timeout, Duration::from_millis(1500));
        assert_eq!(resolved.connect_timeout, defaults.connect_timeout);
        assert_eq!(resolved.tls.verification, TlsVerificationMode::Relaxed);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let defaults = PoolConfig::default();

        let zero = TransportConfig::default().with_request_timeout_ms(0);
        assert!(matches!(
            ResolvedTransport::resolve(&defaults, &zero).validate(),
            Err(DataSourceError::TransportConfigError(_))
        ));

        let missing_ca = TransportConfig::default().with_tls(TlsConfig {
            verification: TlsVerificationMode::CustomCa,
            ca_certificate_pem: None,
        });
        assert!(ResolvedTransport::resolve(&defaults, &missing_ca)
            .validate()
            .is_err());

        let bad_header = TransportConfig::default().with_header("bad header", "v");
        assert!(ResolvedTransport::resolve(&defaults, &bad_header)
            .validate()
            .is_err());
    }

    #[test]
    fn test_fingerprint_tracks_endpoint_and_headers() {
        let defaults = PoolConfig::default();
        let base = ResolvedTransport::resolve(&defaults, &TransportConfig::default());
        let with_header = ResolvedTransport::resolve(
            &defaults,
            &TransportConfig::default().with_header("x-tenant", "a"),
        );

        assert_eq!(
            base.fingerprint("https://a.example:9200"),
            base.fingerprint("https://a.example:9200/")
        );
        assert_ne!(
            base.fingerprint("https://a.example:9200"),
            base.fingerprint("https://b.example:9200")
        );
        assert_ne!(
            base.fingerprint("https://a.example:9200"),
            with_header.fingerprint("https://a.example:9200")
        );
    }
}
