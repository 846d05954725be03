//! Security domain entities
//!
//! Key material, registry records, ciphertext and zeroizing plaintext holders.

use aes_gcm::aead::OsRng;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use rand_chacha::rand_core::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Number of fingerprint bytes shown to operators
const FINGERPRINT_BYTES: usize = 8;

/// Raw symmetric key material, securely zeroed on drop
///
/// The bytes are used directly as the AES-256-GCM key; there is no
/// derivation step, so only values of exactly [`KEY_SIZE`] bytes exist.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: [u8; KEY_SIZE],
}

impl KeyMaterial {
    /// Generate fresh random key material
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Create key material from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(Error::InvalidKeyMaterial(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Parse base64-encoded key material (the persisted form)
    pub fn from_base64(b64: &str) -> Result<Self> {
        let mut bytes = STANDARD
            .decode(b64.trim())
            .map_err(|e| Error::InvalidKeyMaterial(e.to_string()))?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    /// Parse hex-encoded key material
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let mut bytes =
            hex::decode(hex_str.trim()).map_err(|e| Error::InvalidKeyMaterial(e.to_string()))?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    /// Export as base64 (for the registry table and env files)
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes)
    }

    /// Short SHA-256 fingerprint, safe to display
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.bytes);
        hex::encode(&digest[..FINGERPRINT_BYTES])
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// One immutable entry of the key registry
#[derive(Debug, Clone)]
pub struct KeyRecord {
    /// Registry-assigned id, strictly increasing by insertion order
    pub key_id: i64,
    pub material: KeyMaterial,
    pub created_at: DateTime<Utc>,
}

impl KeyRecord {
    /// Public metadata for listings
    pub fn info(&self) -> KeyInfo {
        KeyInfo {
            key_id: self.key_id,
            fingerprint: self.material.fingerprint(),
            created_at: self.created_at,
        }
    }
}

/// Information about a registry key (without the material)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyInfo {
    pub key_id: i64,
    /// Truncated SHA-256 of the material
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

/// Opaque envelope-cipher output
///
/// Carries no key identifier; callers track the id alongside it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ciphertext(String);

impl Ciphertext {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ciphertext({} chars)", self.0.len())
    }
}

impl std::fmt::Display for Ciphertext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A string that is securely zeroed when dropped
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecureString {
    inner: String,
}

impl SecureString {
    pub fn new(s: String) -> Self {
        Self { inner: s }
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureString")
            .field("inner", &"[REDACTED]")
            .finish()
    }
}

impl AsRef<str> for SecureString {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation_is_random() {
        let key1 = KeyMaterial::generate();
        let key2 = KeyMaterial::generate();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_key_from_bytes_invalid_length() {
        let result = KeyMaterial::from_bytes(&[42u8; 16]);
        assert!(matches!(result, Err(Error::InvalidKeyMaterial(_))));
    }

    #[test]
    fn test_key_base64_and_hex_parse_to_same_key() {
        let key = KeyMaterial::generate();
        let from_b64 = KeyMaterial::from_base64(&key.to_base64()).unwrap();
        let from_hex = KeyMaterial::from_hex(&hex::encode(key.as_bytes())).unwrap();
        assert_eq!(from_b64, key);
        assert_eq!(from_hex, key);
    }

    #[test]
    fn test_key_from_base64_rejects_garbage() {
        assert!(KeyMaterial::from_base64("not base64!!").is_err());
        // Valid base64, wrong length
        assert!(KeyMaterial::from_base64("c2hvcnQ=").is_err());
    }

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let key = KeyMaterial::from_bytes(&[7u8; KEY_SIZE]).unwrap();
        assert_eq!(key.fingerprint(), key.clone().fingerprint());
        assert_eq!(key.fingerprint().len(), FINGERPRINT_BYTES * 2);
        assert_ne!(key.fingerprint(), KeyMaterial::generate().fingerprint());
    }

    #[test]
    fn test_debug_output_redacted() {
        let key = KeyMaterial::generate();
        assert!(format!("{:?}", key).contains("[REDACTED]"));

        let secret = SecureString::from("hunter2");
        let debug = format!("{:?}", secret);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));

        let ct = Ciphertext::new("abcdef");
        assert_eq!(format!("{:?}", ct), "Ciphertext(6 chars)");
    }
}
