//! Application settings and configuration
//!
//! Settings are read from environment variables (and a `.env` file when
//! present) with defaults suitable for local development.

use crate::services::data_source::{PoolConfig, TlsConfig, TlsVerificationMode};
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    #[value(alias = "dev")]
    Development,
    #[value(alias = "stage")]
    Staging,
    #[value(alias = "prod")]
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => anyhow::bail!("Invalid environment: {}. Expected: development, staging, or production", s),
        }
    }
}

/// Console log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            _ => anyhow::bail!("Invalid log format: {}. Expected: json or pretty", s),
        }
    }
}

/// Data source pooling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataSourceSettings {
    pub max_cached_clients: usize,
    pub default_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub tls_verification: TlsVerificationMode,
    /// PEM bundle used when `tls_verification` is `custom_ca`
    pub ca_cert_path: Option<PathBuf>,
    /// JSON, YAML or TOML file with the configured data sources
    pub data_sources_file: Option<PathBuf>,
    /// Hex encoded AES-256 key for stored credentials; plaintext when unset
    #[serde(skip_serializing)]
    pub encryption_key: Option<String>,
}

impl Default for DataSourceSettings {
    fn default() -> Self {
        Self {
            max_cached_clients: 100,
            default_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            tls_verification: TlsVerificationMode::Strict,
            ca_cert_path: None,
            data_sources_file: None,
            encryption_key: None,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    // App settings
    pub app_name: String,
    pub app_version: String,
    pub environment: Environment,
    pub log_level: String,
    pub log_format: LogFormat,

    // Server settings
    pub host: String,
    pub port: u16,

    // Data sources
    pub data_source: DataSourceSettings,
}

impl Settings {
    /// Load settings from environment variables with defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = Self {
            app_name: env_or_default("APP_NAME", "data-source-service"),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: env_or_default("ENVIRONMENT", "development")
                .parse()
                .unwrap_or_default(),
            log_level: env_or_default("LOG_LEVEL", "info"),
            log_format: env_or_default("LOG_FORMAT", "json")
                .parse()
                .unwrap_or_default(),

            host: env_or_default("HOST", "0.0.0.0"),
            port: env_or_default("PORT", "8000")
                .parse()
                .context("Invalid PORT value")?,

            data_source: DataSourceSettings {
                max_cached_clients: env_or_default("DATA_SOURCE_MAX_CACHED_CLIENTS", "100")
                    .parse()
                    .context("Invalid DATA_SOURCE_MAX_CACHED_CLIENTS value")?,
                default_timeout_ms: env_or_default("DATA_SOURCE_DEFAULT_TIMEOUT_MS", "30000")
                    .parse()
                    .context("Invalid DATA_SOURCE_DEFAULT_TIMEOUT_MS value")?,
                connect_timeout_ms: env_or_default("DATA_SOURCE_CONNECT_TIMEOUT_MS", "10000")
                    .parse()
                    .context("Invalid DATA_SOURCE_CONNECT_TIMEOUT_MS value")?,
                tls_verification: env_or_default("DATA_SOURCE_TLS_VERIFICATION", "strict")
                    .parse()
                    .context("Invalid DATA_SOURCE_TLS_VERIFICATION value")?,
                ca_cert_path: env::var("DATA_SOURCE_CA_CERT_PATH").ok().map(PathBuf::from),
                data_sources_file: env::var("DATA_SOURCES_FILE").ok().map(PathBuf::from),
                encryption_key: env::var("DATA_SOURCE_ENCRYPTION_KEY").ok(),
            },
        };

        settings.validate()?;

        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        let ds = &self.data_source;
        if ds.max_cached_clients == 0 {
            anyhow::bail!("DATA_SOURCE_MAX_CACHED_CLIENTS must be > 0");
        }
        if ds.default_timeout_ms == 0 {
            anyhow::bail!("DATA_SOURCE_DEFAULT_TIMEOUT_MS must be > 0");
        }
        if ds.connect_timeout_ms == 0 {
            anyhow::bail!("DATA_SOURCE_CONNECT_TIMEOUT_MS must be > 0");
        }
        if ds.tls_verification == TlsVerificationMode::CustomCa && ds.ca_cert_path.is_none() {
            anyhow::bail!("DATA_SOURCE_CA_CERT_PATH is required with custom_ca TLS verification");
        }
        if let Some(key) = &ds.encryption_key {
            if key.len() != 64 || hex::decode(key).is_err() {
                anyhow::bail!("DATA_SOURCE_ENCRYPTION_KEY must be 64 hex characters");
            }
        }

        if self.environment == Environment::Production {
            if ds.tls_verification == TlsVerificationMode::Relaxed {
                tracing::warn!("Running in production with relaxed TLS verification for data sources!");
            }
            if ds.encryption_key.is_none() {
                tracing::warn!("Running in production with plaintext data source credentials!");
            }
        }

        Ok(())
    }

    /// Pool configuration for the data source service
    ///
    /// Reads the CA bundle from disk when custom CA verification is enabled.
    pub fn pool_config(&self) -> Result<PoolConfig> {
        let ds = &self.data_source;
        let tls = match ds.tls_verification {
            TlsVerificationMode::Strict => TlsConfig::strict(),
            TlsVerificationMode::Relaxed => TlsConfig::relaxed(),
            TlsVerificationMode::CustomCa => {
                let path = ds
                    .ca_cert_path
                    .as_ref()
                    .context("DATA_SOURCE_CA_CERT_PATH is not set")?;
                let pem = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read CA bundle {}", path.display()))?;
                TlsConfig::custom_ca(pem)
            }
        };

        Ok(PoolConfig::new(ds.max_cached_clients)
            .with_default_timeout(Duration::from_millis(ds.default_timeout_ms))
            .with_connect_timeout(Duration::from_millis(ds.connect_timeout_ms))
            .with_tls(tls))
    }

    /// Get the server address string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "data-source-service".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: Environment::Development,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            host: "0.0.0.0".to_string(),
            port: 8000,
            data_source: DataSourceSettings::default(),
        }
    }
}

/// Helper function to get environment variable with default
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.app_name, "data-source-service");
        assert_eq!(settings.port, 8000);
        assert_eq!(settings.data_source.max_cached_clients, 100);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("development".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("production".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn test_invalid_data_source_settings_rejected() {
        let mut settings = Settings::default();
        settings.data_source.max_cached_clients = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.data_source.default_timeout_ms = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.data_source.tls_verification = TlsVerificationMode::CustomCa;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.data_source.encryption_key = Some("not-hex".to_string());
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.data_source.encryption_key = Some("ab".repeat(32));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_pool_config() {
        let mut settings = Settings::default();
        settings.data_source.max_cached_clients = 7;
        settings.data_source.default_timeout_ms = 1500;
        settings.data_source.tls_verification = TlsVerificationMode::Relaxed;

        let config = settings.pool_config().unwrap();
        assert_eq!(config.max_cached_clients, 7);
        assert_eq!(config.default_timeout, Duration::from_millis(1500));
        assert_eq!(config.tls.verification, TlsVerificationMode::Relaxed);
    }

    #[test]
    fn test_pool_config_reads_ca_bundle() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n").unwrap();

        let mut settings = Settings::default();
        settings.data_source.tls_verification = TlsVerificationMode::CustomCa;
        settings.data_source.ca_cert_path = Some(file.path().to_path_buf());

        let config = settings.pool_config().unwrap();
        assert_eq!(config.tls.verification, TlsVerificationMode::CustomCa);
        assert!(config
            .tls
            .ca_certificate_pem
            .as_deref()
            .unwrap()
            .contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn test_server_addr() {
        let settings = Settings::default();
        assert_eq!(settings.server_addr(), "0.0.0.0:8000");
    }
}
