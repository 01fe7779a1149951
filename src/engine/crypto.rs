use std::fmt;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::AppError;

const NONCE_LEN: usize = 12;

/// Error type for crypto operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Server secret is not configured; refusing to encrypt or decrypt")]
    MissingSecret,
    #[error("Encryption failed: {0}")]
    Encrypt(String),
    #[error("Decryption failed: {0}")]
    Decrypt(String),
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl From<CryptoError> for AppError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::MissingSecret => AppError::Config(e.to_string()),
            other => AppError::Crypto(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// Symmetric vault keyed from the server-wide secret.
///
/// The key is `SHA-256(server_secret)`. Each encryption draws a fresh 12-byte
/// nonce; the stored blob is `base64(nonce || ciphertext)`. Without a secret
/// both directions fail with [`AppError::Config`].
#[derive(Clone)]
pub struct Vault {
    key: Option<Zeroizing<[u8; 32]>>,
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault")
            .field("configured", &self.key.is_some())
            .finish()
    }
}

impl Vault {
    pub fn new(server_secret: Option<&str>) -> Self {
        let key = server_secret.filter(|s| !s.is_empty()).map(|secret| {
            let digest = Sha256::digest(secret.as_bytes());
            let mut key = Zeroizing::new([0u8; 32]);
            key.copy_from_slice(&digest);
            key
        });
        Self { key }
    }

    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        let key = self.key.as_ref().ok_or(CryptoError::MissingSecret)?;
        Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..])))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(B64.encode(blob))
    }

    pub fn decrypt(&self, blob: &str) -> Result<String, AppError> {
        let cipher = self.cipher()?;

        let raw = B64.decode(blob.trim()).map_err(CryptoError::from)?;
        if raw.len() <= NONCE_LEN {
            return Err(CryptoError::Decrypt(format!(
                "Blob too short: {} bytes",
                raw.len()
            ))
            .into());
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);

        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
                .map_err(|e| CryptoError::Decrypt(e.to_string()))?,
        );

        String::from_utf8(plaintext.to_vec())
            .map_err(|e| CryptoError::Decrypt(format!("Invalid UTF-8 in decrypted data: {}", e)).into())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
