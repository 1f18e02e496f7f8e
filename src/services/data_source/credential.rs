//! Credential types and the credential resolver
//!
//! A data source's stored [`AuthConfig`] holds encrypted references. The
//! [`CredentialResolver`] decrypts them, checks their shape, and derives an
//! [`EffectiveCredential`]: a salted digest that is safe to keep in pool keys
//! and logs. The plaintext only lives in [`CredentialMaterial`], which is
//! handed to the client factory and zeroized on drop.

use super::crypto::CredentialDecryptor;
use super::error::DataSourceError;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

// ============================================================================
// Secret String
// ============================================================================

/// A string that is wiped from memory on drop and never printed
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(Zeroizing<String>);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString(***)")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(SecretString::new)
    }
}

// ============================================================================
// Stored Auth Configuration
// ============================================================================

/// Opaque reference to an encrypted secret, resolved by a `CredentialDecryptor`
#[derive(Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct EncryptedRef(String);

impl EncryptedRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EncryptedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedRef({} bytes)", self.0.len())
    }
}

/// AWS service a SigV4 data source signs for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SigV4Service {
    /// Amazon OpenSearch Service domains
    #[default]
    Es,
    /// Amazon OpenSearch Serverless collections
    Aoss,
    #[serde(other)]
    Unsupported,
}

impl SigV4Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Es => "es",
            Self::Aoss => "aoss",
            Self::Unsupported => "unsupported",
        }
    }
}

/// Where SigV4 signing credentials come from
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum AwsCredentialSource {
    /// Long-lived or temporary keys stored with the data source
    Static {
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        secret_access_key: Option<EncryptedRef>,
        #[serde(default)]
        session_token: Option<EncryptedRef>,
    },
    /// A named profile from the shared AWS config files
    Profile {
        #[serde(default)]
        name: Option<String>,
    },
    /// The default provider chain (env, web identity, instance role, ...)
    #[default]
    DefaultChain,
    #[serde(other)]
    Unsupported,
}

/// Stored authentication configuration of a data source
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    NoAuth,
    UsernamePassword {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<EncryptedRef>,
    },
    #[serde(rename = "sigv4")]
    SigV4 {
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        service: SigV4Service,
        #[serde(default)]
        credentials: AwsCredentialSource,
    },
    ClientCertificate {
        /// PEM bundle with the certificate chain and its private key
        #[serde(default)]
        certificate: Option<EncryptedRef>,
    },
    /// Any tag this service does not know
    #[serde(other)]
    Unsupported,
}

impl AuthConfig {
    pub fn username_password(username: impl Into<String>, password: EncryptedRef) -> Self {
        Self::UsernamePassword {
            username: Some(username.into()),
            password: Some(password),
        }
    }

    pub fn sigv4_static(
        region: impl Into<String>,
        service: SigV4Service,
        access_key_id: impl Into<String>,
        secret_access_key: EncryptedRef,
    ) -> Self {
        Self::SigV4 {
            region: Some(region.into()),
            service,
            credentials: AwsCredentialSource::Static {
                access_key_id: Some(access_key_id.into()),
                secret_access_key: Some(secret_access_key),
                session_token: None,
            },
        }
    }

    pub fn client_certificate(certificate: EncryptedRef) -> Self {
        Self::ClientCertificate {
            certificate: Some(certificate),
        }
    }

    /// Short name of the auth type, used in logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoAuth => "no_auth",
            Self::UsernamePassword { .. } => "username_password",
            Self::SigV4 { .. } => "sigv4",
            Self::ClientCertificate { .. } => "client_certificate",
            Self::Unsupported => "unsupported",
        }
    }
}

// ============================================================================
// Request-time Override
// ============================================================================

/// Per-request credential adjustments supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CredentialOverride {
    /// Bearer token used instead of the stored credential
    #[serde(default)]
    pub on_behalf_of_token: Option<SecretString>,
    /// Security tenant sent as the `securitytenant` header
    #[serde(default)]
    pub security_tenant: Option<String>,
}

impl CredentialOverride {
    pub fn on_behalf_of(token: impl Into<String>) -> Self {
        Self {
            on_behalf_of_token: Some(SecretString::new(token)),
            security_tenant: None,
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.security_tenant = Some(tenant.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.on_behalf_of_token.is_none() && self.security_tenant.is_none()
    }
}

// ============================================================================
// Decrypted Material
// ============================================================================

/// Decrypted AWS signing source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwsSigningSource {
    Static {
        access_key_id: String,
        secret_access_key: SecretString,
        session_token: Option<SecretString>,
    },
    Profile(String),
    DefaultChain,
    Unsupported,
}

/// Plaintext credential material, only ever held by the factory and clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialMaterial {
    None,
    Basic {
        username: String,
        password: SecretString,
    },
    SigV4 {
        region: String,
        service: SigV4Service,
        source: AwsSigningSource,
    },
    ClientCertificate {
        pem: SecretString,
    },
}

impl CredentialMaterial {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "no_auth",
            Self::Basic { .. } => "username_password",
            Self::SigV4 { .. } => "sigv4",
            Self::ClientCertificate { .. } => "client_certificate",
        }
    }
}

// ============================================================================
// Effective Credential
// ============================================================================

/// Comparable, non-secret digest of how a request authenticates
///
/// Two requests that authenticate identically produce equal values, so they
/// share a pooled client. The digest is salted per resolver, so it cannot be
/// used to guess a password offline.
#[derive(Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EffectiveCredential(String);

impl EffectiveCredential {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First characters of the digest, enough to tell entries apart in logs
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Debug for EffectiveCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EffectiveCredential({})", self.short())
    }
}

impl fmt::Display for EffectiveCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short())
    }
}

/// Result of resolving a stored auth config for one request
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    pub effective: EffectiveCredential,
    pub material: CredentialMaterial,
    pub overrides: CredentialOverride,
}

/// Length-prefixed field writer so that ("ab","c") and ("a","bc") differ
struct CanonicalDigest(Sha256);

impl CanonicalDigest {
    fn new(salt: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        Self(hasher)
    }

    fn field(&mut self, value: &str) -> &mut Self {
        self.0.update((value.len() as u64).to_le_bytes());
        self.0.update(value.as_bytes());
        self
    }

    fn optional(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(v) => {
                self.0.update([1u8]);
                self.field(v)
            }
            None => {
                self.0.update([0u8]);
                self
            }
        }
    }

    fn finish(self) -> EffectiveCredential {
        EffectiveCredential(hex::encode(self.0.finalize()))
    }
}

// ============================================================================
// Credential Resolver
// ============================================================================

/// Turns stored auth configs plus request overrides into resolved credentials
#[derive(Clone)]
pub struct CredentialResolver {
    decryptor: Arc<dyn CredentialDecryptor>,
    salt: [u8; 16],
}

impl CredentialResolver {
    /// Create a resolver with a fresh random salt
    pub fn new(decryptor: Arc<dyn CredentialDecryptor>) -> Self {
        Self {
            decryptor,
            salt: *uuid::Uuid::new_v4().as_bytes(),
        }
    }

    /// Decrypt, validate and digest an auth config
    pub async fn resolve(
        &self,
        auth: &AuthConfig,
        overrides: Option<&CredentialOverride>,
    ) -> Result<ResolvedCredential, DataSourceError> {
        let overrides = overrides.cloned().unwrap_or_default();
        if overrides
            .on_behalf_of_token
            .as_ref()
            .is_some_and(SecretString::is_empty)
        {
            return Err(DataSourceError::InvalidCredentialShape(
                "on_behalf_of_token is empty".to_string(),
            ));
        }

        let material = self.decrypt_material(auth).await?;
        let effective = self.effective_credential(&material, &overrides);

        tracing::trace!(
            auth_type = auth.kind(),
            credential = %effective,
            "Resolved effective credential"
        );

        Ok(ResolvedCredential {
            effective,
            material,
            overrides,
        })
    }

    /// Derive the effective credential from already decrypted material
    ///
    /// Pure: equal inputs always give equal outputs for this resolver.
    pub fn effective_credential(
        &self,
        material: &CredentialMaterial,
        overrides: &CredentialOverride,
    ) -> EffectiveCredential {
        let mut digest = CanonicalDigest::new(&self.salt);
        digest.field(material.kind());

        match material {
            CredentialMaterial::None => {}
            CredentialMaterial::Basic { username, password } => {
                digest.field(username).field(password.expose());
            }
            CredentialMaterial::SigV4 {
                region,
                service,
                source,
            } => {
                digest.field(region).field(service.as_str());
                match source {
                    AwsSigningSource::Static {
                        access_key_id,
                        secret_access_key,
                        session_token,
                    } => {
                        digest
                            .field("static")
                            .field(access_key_id)
                            .field(secret_access_key.expose())
                            .optional(session_token.as_ref().map(SecretString::expose));
                    }
                    AwsSigningSource::Profile(name) => {
                        digest.field("profile").field(name);
                    }
                    AwsSigningSource::DefaultChain => {
                        digest.field("default_chain");
                    }
                    AwsSigningSource::Unsupported => {
                        digest.field("unsupported");
                    }
                }
            }
            CredentialMaterial::ClientCertificate { pem } => {
                digest.field(pem.expose());
            }
        }

        digest
            .optional(overrides.on_behalf_of_token.as_ref().map(SecretString::expose))
            .optional(overrides.security_tenant.as_deref());

        digest.finish()
    }

    async fn decrypt_material(&self, auth: &AuthConfig) -> Result<CredentialMaterial, DataSourceError> {
        match auth {
            AuthConfig::NoAuth => Ok(CredentialMaterial::None),
            AuthConfig::UsernamePassword { username, password } => {
                let username = required(username.as_deref(), "username_password.username")?;
                let password = required_ref(password.as_ref(), "username_password.password")?;
                Ok(CredentialMaterial::Basic {
                    username: username.to_string(),
                    password: self.decrypt(password).await?,
                })
            }
            AuthConfig::SigV4 {
                region,
                service,
                credentials,
            } => {
                let region = required(region.as_deref(), "sigv4.region")?.to_string();
                let source = match credentials {
                    AwsCredentialSource::Static {
                        access_key_id,
                        secret_access_key,
                        session_token,
                    } => {
                        let access_key_id =
                            required(access_key_id.as_deref(), "sigv4.credentials.access_key_id")?;
                        let secret = required_ref(
                            secret_access_key.as_ref(),
                            "sigv4.credentials.secret_access_key",
                        )?;
                        let session_token = match session_token {
                            Some(token) => Some(self.decrypt(token).await?),
                            None => None,
                        };
                        AwsSigningSource::Static {
                            access_key_id: access_key_id.to_string(),
                            secret_access_key: self.decrypt(secret).await?,
                            session_token,
                        }
                    }
                    AwsCredentialSource::Profile { name } => AwsSigningSource::Profile(
                        required(name.as_deref(), "sigv4.credentials.name")?.to_string(),
                    ),
                    AwsCredentialSource::DefaultChain => AwsSigningSource::DefaultChain,
                    AwsCredentialSource::Unsupported => AwsSigningSource::Unsupported,
                };
                Ok(CredentialMaterial::SigV4 {
                    region,
                    service: *service,
                    source,
                })
            }
            AuthConfig::ClientCertificate { certificate } => {
                let certificate = required_ref(certificate.as_ref(), "client_certificate.certificate")?;
                Ok(CredentialMaterial::ClientCertificate {
                    pem: self.decrypt(certificate).await?,
                })
            }
            AuthConfig::Unsupported => Err(DataSourceError::InvalidCredentialShape(
                "unrecognized auth type".to_string(),
            )),
        }
    }

    async fn decrypt(&self, reference: &EncryptedRef) -> Result<SecretString, DataSourceError> {
        let secret = self.decryptor.decrypt(reference).await?;
        if secret.is_empty() {
            return Err(DataSourceError::InvalidCredentialShape(
                "decrypted credential is empty".to_string(),
            ));
        }
        Ok(secret)
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, DataSourceError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(DataSourceError::InvalidCredentialShape(format!(
            "missing required field {}",
            field
        ))),
    }
}

fn required_ref<'a>(
    value: Option<&'a EncryptedRef>,
    field: &str,
) -> Result<&'a EncryptedRef, DataSourceError> {
    match value {
        Some(v) if !v.as_str().trim().is_empty() => Ok(v),
        _ => Err(DataSourceError::InvalidCredentialShape(format!(
            "missing required field {}",
            field
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
