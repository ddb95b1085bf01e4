//! At-rest encryption for stored OAuth tokens
//!
//! Tokens are sealed with AES-256-GCM. The stored form is base64 (standard
//! alphabet) of `nonce || ciphertext`. The key is supplied explicitly through
//! a [`KeyProvider`]; nothing here reads global state after construction.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use thiserror::Error;

/// Nonce size for AES-GCM (96 bits)
const NONCE_SIZE: usize = 12;

/// AES-256 key size
pub const KEY_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption key missing: set ENCRYPTION_KEY")]
    MissingKey,

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Invalid ciphertext format: {0}")]
    InvalidFormat(String),
}

/// Symmetric encryption capability for credential fields
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError>;
    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError>;
}

/// AES-256-GCM cipher with a random nonce per message
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(&(*key).into()),
        }
    }

    pub fn from_provider(provider: &KeyProvider) -> Self {
        Self::new(provider.key())
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(combined))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let combined = BASE64
            .decode(ciphertext.trim())
            .map_err(|e| CryptoError::InvalidFormat(format!("not base64: {}", e)))?;

        if combined.len() < NONCE_SIZE {
            return Err(CryptoError::InvalidFormat("ciphertext too short".into()));
        }

        let (nonce_bytes, sealed) = combined.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|e| CryptoError::Decryption(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Decryption(e.to_string()))
    }
}

/// Source of the 32-byte token encryption key
#[derive(Clone)]
pub struct KeyProvider {
    key: [u8; KEY_SIZE],
    ephemeral: bool,
}

impl std::fmt::Debug for KeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyProvider")
            .field("ephemeral", &self.ephemeral)
            .finish_non_exhaustive()
    }
}

impl KeyProvider {
    /// Decode a base64 (standard alphabet) 32-byte key
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("not base64: {}", e)))?;
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|b: Vec<u8>| {
            CryptoError::InvalidKey(format!("expected {} bytes, got {}", KEY_SIZE, b.len()))
        })?;
        Ok(Self {
            key,
            ephemeral: false,
        })
    }

    /// Random key for the lifetime of this process
    ///
    /// Tokens sealed with it cannot be read after a restart.
    pub fn ephemeral() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self {
            key,
            ephemeral: true,
        }
    }

    /// Load from `ENCRYPTION_KEY`
    ///
    /// In production a missing or malformed key is an error. Elsewhere a
    /// missing key yields an ephemeral one with a warning.
    pub fn from_env(production: bool) -> Result<Self, CryptoError> {
        match std::env::var("ENCRYPTION_KEY") {
            Ok(encoded) if !encoded.trim().is_empty() => Self::from_base64(&encoded),
            _ if production => Err(CryptoError::MissingKey),
            _ => {
                log::warn!("ENCRYPTION_KEY not set, using a temporary key; stored tokens will not survive a restart");
                Ok(Self::ephemeral())
            }
        }
    }

    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }
}
