//! Credential decryption
//!
//! Stored credentials are AES-256-GCM sealed, hex encoded as
//! `nonce || ciphertext || tag`. The decryptor is a trait so that deployments
//! backed by a KMS can plug in their own.

use super::credential::{EncryptedRef, SecretString};
use super::error::DataSourceError;
use async_trait::async_trait;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;
use zeroize::Zeroizing;

/// Size of the AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

const NONCE_SIZE: usize = 12;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecryptionError {
    #[error("invalid hex encoding")]
    InvalidEncoding,

    #[error("ciphertext too short")]
    TooShort,

    #[error("wrong key or corrupted data")]
    Authentication,

    #[error("decrypted data is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("encryption failed")]
    Encryption,
}

impl From<DecryptionError> for DataSourceError {
    fn from(err: DecryptionError) -> Self {
        DataSourceError::DecryptionError(err.to_string())
    }
}

/// Turns an encrypted reference into plaintext
#[async_trait]
pub trait CredentialDecryptor: Send + Sync {
    async fn decrypt(&self, reference: &EncryptedRef) -> Result<SecretString, DecryptionError>;
}

/// Treats references as plaintext. Local development only.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextDecryptor;

#[async_trait]
impl CredentialDecryptor for PlaintextDecryptor {
    async fn decrypt(&self, reference: &EncryptedRef) -> Result<SecretString, DecryptionError> {
        Ok(SecretString::new(reference.as_str()))
    }
}

/// AES-256-GCM decryptor keyed by a master key
pub struct AesGcmDecryptor {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl AesGcmDecryptor {
    pub fn new(master_key: &[u8; KEY_SIZE]) -> Result<Self, DecryptionError> {
        let unbound = UnboundKey::new(&AES_256_GCM, master_key)
            .map_err(|_| DecryptionError::InvalidKey("rejected by AES-256-GCM".to_string()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Build from a 64 character hex key, as found in configuration
    pub fn from_hex(key_hex: &str) -> Result<Self, DecryptionError> {
        let bytes = Zeroizing::new(
            hex::decode(key_hex.trim())
                .map_err(|_| DecryptionError::InvalidKey("not valid hex".to_string()))?,
        );
        let key: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            DecryptionError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            ))
        })?;
        let key = Zeroizing::new(key);
        Self::new(&key)
    }

    /// Seal a plaintext into the stored reference format
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedRef, DecryptionError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| DecryptionError::Encryption)?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| DecryptionError::Encryption)?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&in_out);
        Ok(EncryptedRef::new(hex::encode(sealed)))
    }

    fn open(&self, reference: &str) -> Result<SecretString, DecryptionError> {
        let sealed = hex::decode(reference).map_err(|_| DecryptionError::InvalidEncoding)?;
        if sealed.len() < NONCE_SIZE + AES_256_GCM.tag_len() {
            return Err(DecryptionError::TooShort);
        }

        let (nonce_bytes, encrypted) = sealed.split_at(NONCE_SIZE);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| DecryptionError::TooShort)?;

        let mut in_out = Zeroizing::new(encrypted.to_vec());
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| DecryptionError::Authentication)?;

        let text = std::str::from_utf8(plaintext).map_err(|_| DecryptionError::InvalidUtf8)?;
        Ok(SecretString::new(text))
    }
}

#[async_trait]
impl CredentialDecryptor for AesGcmDecryptor {
    async fn decrypt(&self, reference: &EncryptedRef) -> Result<SecretString, DecryptionError> {
        self.open(reference.as_str())
    }
}

/// Generate a random master key
pub fn generate_key() -> Result<[u8; KEY_SIZE], DecryptionError> {
    let mut key = [0u8; KEY_SIZE];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| DecryptionError::InvalidKey("random generator failed".to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sealed_reference_decrypts() {
        let key = generate_key().unwrap();
        let decryptor = AesGcmDecryptor::new(&key).unwrap();

        let sealed = decryptor.encrypt("s3cr3t").unwrap();
        assert_ne!(sealed.as_str(), "s3cr3t");

        let secret = decryptor.decrypt(&sealed).await.unwrap();
        assert_eq!(secret.expose(), "s3cr3t");
    }

    #[tokio::test]
    async fn test_wrong_key_fails() {
        let sealer = AesGcmDecryptor::new(&generate_key().unwrap()).unwrap();
        let other = AesGcmDecryptor::new(&generate_key().unwrap()).unwrap();

        let sealed = sealer.encrypt("secret").unwrap();
        assert_eq!(
            other.decrypt(&sealed).await.unwrap_err(),
            DecryptionError::Authentication
        );
    }

    #[tokio::test]
    async fn test_malformed_references() {
        let decryptor = AesGcmDecryptor::new(&generate_key().unwrap()).unwrap();
        assert_eq!(
            decryptor.decrypt(&EncryptedRef::new("zz")).await.unwrap_err(),
            DecryptionError::InvalidEncoding
        );
        assert_eq!(
            decryptor.decrypt(&EncryptedRef::new("abcd")).await.unwrap_err(),
            DecryptionError::TooShort
        );
    }

    #[test]
    fn test_from_hex_checks_length() {
        let key = generate_key().unwrap();
        assert!(AesGcmDecryptor::from_hex(&hex::encode(key)).is_ok());
        assert!(matches!(
            AesGcmDecryptor::from_hex("abcd"),
            Err(DecryptionError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_error_maps_to_data_source_error() {
        let err: DataSourceError = DecryptionError::Authentication.into();
        assert!(matches!(err, DataSourceError::DecryptionError(_)));
    }
}
