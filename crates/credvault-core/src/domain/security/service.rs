//! Security domain services
//!
//! High-level key management: generation, listing, and the encrypt and
//! decrypt entry points used by the credential store.

use std::sync::Arc;

use serde::Serialize;

use super::cipher::EnvelopeCipher;
use super::entity::{Ciphertext, KeyInfo, KeyMaterial};
use super::fallback::{Decrypted, DecryptionEngine};
use super::repository::KeyRegistry;
use super::resolver::{KeyResolver, KeySource};
use crate::config::{ENV_ACTIVE_KEY_ID, ENV_FALLBACK_KEY};
use crate::error::Result;

/// A freshly generated registry key
///
/// Holds the material so the caller can also export it as fallback
/// material; it is zeroized when dropped.
#[derive(Debug)]
pub struct GeneratedKey {
    pub info: KeyInfo,
    pub material: KeyMaterial,
}

impl GeneratedKey {
    /// Environment entries that make this key the active and fallback key
    pub fn env_entries(&self) -> Vec<(String, String)> {
        vec![
            (ENV_ACTIVE_KEY_ID.to_string(), self.info.key_id.to_string()),
            (ENV_FALLBACK_KEY.to_string(), self.material.to_base64()),
        ]
    }
}

/// Where the active key currently comes from
#[derive(Debug, Clone, Serialize)]
pub struct ActiveKeyInfo {
    pub key_id: Option<i64>,
    pub source: String,
    pub fingerprint: String,
}

/// Ciphertext together with the registry id it was produced under
#[derive(Debug, Clone)]
pub struct Sealed {
    pub ciphertext: Ciphertext,
    pub key_id: Option<i64>,
}

/// Service for managing registry keys and sealing secrets
///
/// ```ignore
/// let resolver = KeyResolver::new(registry, config.keys.active_key_id, fallback);
/// let keys = KeyService::new(resolver);
///
/// let sealed = keys.encrypt_secret("hunter2", None).await?;
/// let opened = keys.decrypt_secret(&sealed.ciphertext, sealed.key_id).await?;
/// ```
#[derive(Debug, Clone)]
pub struct KeyService {
    resolver: KeyResolver,
    engine: DecryptionEngine,
}

impl KeyService {
    pub fn new(resolver: KeyResolver) -> Self {
        let engine = DecryptionEngine::from_resolver(&resolver);
        Self { resolver, engine }
    }

    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    pub fn registry(&self) -> &Arc<dyn KeyRegistry> {
        self.resolver.registry()
    }

    /// Generate a random key and append it to the registry
    pub async fn generate_key(&self) -> Result<GeneratedKey> {
        let material = KeyMaterial::generate();
        let key_id = self.registry().add(&material).await?;
        let record = self
            .registry()
            .get(key_id)
            .await?
            .ok_or(crate::error::Error::KeyNotFound(key_id))?;

        tracing::info!(key_id, "Generated new encryption key");
        Ok(GeneratedKey {
            info: record.info(),
            material,
        })
    }

    /// Registry metadata, newest first
    pub async fn list_keys(&self) -> Result<Vec<KeyInfo>> {
        Ok(self
            .registry()
            .list_newest_first()
            .await?
            .iter()
            .map(|record| record.info())
            .collect())
    }

    /// Describe the key new encryptions would use
    pub async fn active_key(&self) -> Result<ActiveKeyInfo> {
        let active = self.resolver.resolve(None).await?;
        Ok(ActiveKeyInfo {
            key_id: active.key_id,
            source: active.source.to_string(),
            fingerprint: active.material.fingerprint(),
        })
    }

    /// Encrypt under the active key, honoring an optional override id
    pub async fn encrypt_secret(
        &self,
        plaintext: &str,
        override_key_id: Option<i64>,
    ) -> Result<Sealed> {
        let active = self.resolver.resolve(override_key_id).await?;
        let ciphertext = EnvelopeCipher::new(&active.material).encrypt(plaintext)?;

        if active.source == KeySource::Fallback {
            tracing::warn!("Encrypted with fallback key material; no registry id recorded");
        }

        Ok(Sealed {
            ciphertext,
            key_id: active.key_id,
        })
    }

    /// Decrypt with the fallback engine
    pub async fn decrypt_secret(
        &self,
        ciphertext: &Ciphertext,
        hinted_key_id: Option<i64>,
    ) -> Result<Decrypted> {
        self.engine
            .decrypt_with_fallback(ciphertext, hinted_key_id)
            .await
    }
}
