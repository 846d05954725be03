//! Envelope cipher
//!
//! AES-256-GCM over UTF-8 strings. The output is
//! `base64(nonce || ciphertext || tag)`: self-contained apart from the key,
//! whose id the caller stores next to it.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand_chacha::rand_core::RngCore;
use thiserror::Error;

use super::entity::{Ciphertext, KeyMaterial, SecureString};
use crate::error::Error;

/// Size of AES-GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Low-level cipher failures
///
/// These never leave the core as-is: the fallback engine folds them into
/// [`Error::DecryptionFailed`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("ciphertext is not valid base64")]
    Encoding,

    #[error("ciphertext too short: {0} bytes")]
    Truncated(usize),

    #[error("integrity check failed (wrong key or corrupted data)")]
    Integrity,

    #[error("plaintext is not valid UTF-8")]
    Utf8,

    #[error("encryption failed")]
    Encrypt,
}

impl From<CipherError> for Error {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::Encrypt => Error::EncryptionFailed(err.to_string()),
            other => Error::DecryptionFailed {
                reason: other.to_string(),
                attempts: 1,
            },
        }
    }
}

/// Authenticated symmetric cipher bound to one key
pub struct EnvelopeCipher {
    cipher: Aes256Gcm,
}

impl EnvelopeCipher {
    pub fn new(key: &KeyMaterial) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())),
        }
    }

    /// Encrypt under a fresh random nonce
    pub fn encrypt(&self, plaintext: &str) -> Result<Ciphertext, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        let mut envelope = Vec::with_capacity(NONCE_SIZE + sealed.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&sealed);

        Ok(Ciphertext::new(STANDARD.encode(envelope)))
    }

    pub fn decrypt(&self, ciphertext: &Ciphertext) -> Result<SecureString, CipherError> {
        let envelope = STANDARD
            .decode(ciphertext.as_str().trim())
            .map_err(|_| CipherError::Encoding)?;

        if envelope.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CipherError::Truncated(envelope.len()));
        }

        let (nonce_bytes, sealed) = envelope.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| CipherError::Integrity)?;

        String::from_utf8(plaintext)
            .map(SecureString::new)
            .map_err(|_| CipherError::Utf8)
    }
}

/// Encrypt `plaintext` under `key`
pub fn encrypt(key: &KeyMaterial, plaintext: &str) -> Result<Ciphertext, CipherError> {
    EnvelopeCipher::new(key).encrypt(plaintext)
}

/// Decrypt `ciphertext` under `key`
pub fn decrypt(key: &KeyMaterial, ciphertext: &Ciphertext) -> Result<SecureString, CipherError> {
    EnvelopeCipher::new(key).decrypt(ciphertext)
}
