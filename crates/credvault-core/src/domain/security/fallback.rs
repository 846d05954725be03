//! Decryption with key fallback
//!
//! Stored key ids drift: registries get reseeded, ids renumbered, config
//! changes. Decryption therefore tries the hinted key first and then every
//! registry key newest-first, trading a linear scan over a small registry
//! for resilience. A miss on the hint is never reported to the caller.
//!
//! Candidate order:
//! 1. the hinted key, if given and present in the registry
//! 2. registry keys by descending id, skipping a hint already tried
//! 3. fallback key material from configuration, if any

use std::sync::Arc;

use tracing::{debug, warn};

use super::cipher::EnvelopeCipher;
use super::entity::{Ciphertext, KeyMaterial, SecureString};
use super::repository::KeyRegistry;
use super::resolver::KeyResolver;
use crate::error::{Error, Result};

/// Successful decryption and how it was reached
#[derive(Debug)]
pub struct Decrypted {
    pub plaintext: SecureString,
    /// Registry id of the key that worked; `None` for fallback material
    pub key_id: Option<i64>,
    /// Number of keys tried, including the successful one
    pub attempts: usize,
}

impl Decrypted {
    /// True when the stored hint did not name the key that actually worked
    pub fn hint_was_stale(&self, hint: Option<i64>) -> bool {
        hint != self.key_id
    }
}

/// Decrypts ciphertext despite stale, missing or wrong key hints
#[derive(Clone)]
pub struct DecryptionEngine {
    registry: Arc<dyn KeyRegistry>,
    fallback_material: Option<KeyMaterial>,
}

impl DecryptionEngine {
    pub fn new(registry: Arc<dyn KeyRegistry>) -> Self {
        Self {
            registry,
            fallback_material: None,
        }
    }

    /// Engine sharing the resolver's registry and fallback material
    pub fn from_resolver(resolver: &KeyResolver) -> Self {
        Self {
            registry: resolver.registry().clone(),
            fallback_material: resolver.fallback_material().cloned(),
        }
    }

    pub fn with_fallback_material(mut self, material: KeyMaterial) -> Self {
        self.fallback_material = Some(material);
        self
    }

    pub async fn decrypt_with_fallback(
        &self,
        ciphertext: &Ciphertext,
        hinted_key_id: Option<i64>,
    ) -> Result<Decrypted> {
        let mut attempts = 0;
        let mut tried = None;

        if let Some(key_id) = hinted_key_id {
            match self.try_hinted(ciphertext, key_id, &mut attempts).await {
                Ok(plaintext) => {
                    return Ok(Decrypted {
                        plaintext,
                        key_id: Some(key_id),
                        attempts,
                    });
                }
                Err(Error::KeyNotFound(_)) => {
                    debug!(key_id, "Hinted key not in registry, searching all keys");
                }
                Err(e) => {
                    // Skip the hint in the scan only if its key actually ran
                    if attempts > 0 {
                        tried = Some(key_id);
                    }
                    debug!(key_id, error = %e, "Hinted key failed, searching all keys");
                }
            }
        }

        // One listing per call; records are immutable so it cannot go stale mid-loop
        let candidates = match self.registry.list_newest_first().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Could not list key registry");
                Vec::new()
            }
        };

        for record in candidates.iter().filter(|r| Some(r.key_id) != tried) {
            attempts += 1;
            if let Ok(plaintext) = EnvelopeCipher::new(&record.material).decrypt(ciphertext) {
                if hinted_key_id.is_some() {
                    warn!(
                        hinted_key_id,
                        key_id = record.key_id,
                        attempts,
                        "Decrypted with a key other than the recorded one"
                    );
                }
                return Ok(Decrypted {
                    plaintext,
                    key_id: Some(record.key_id),
                    attempts,
                });
            }
        }

        if let Some(material) = &self.fallback_material {
            attempts += 1;
            if let Ok(plaintext) = EnvelopeCipher::new(material).decrypt(ciphertext) {
                debug!(attempts, "Decrypted with fallback key material");
                return Ok(Decrypted {
                    plaintext,
                    key_id: None,
                    attempts,
                });
            }
        }

        warn!(attempts, hinted_key_id, "No known key could decrypt ciphertext");
        Err(Error::no_known_key(attempts))
    }

    /// Targeted attempt under the hinted key; `KeyNotFound` stays internal
    async fn try_hinted(
        &self,
        ciphertext: &Ciphertext,
        key_id: i64,
        attempts: &mut usize,
    ) -> Result<SecureString> {
        let record = self
            .registry
            .get(key_id)
            .await?
            .ok_or(Error::KeyNotFound(key_id))?;

        *attempts += 1;
        Ok(EnvelopeCipher::new(&record.material).decrypt(ciphertext)?)
    }
}

impl std::fmt::Debug for DecryptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionEngine")
            .field("fallback_material", &self.fallback_material.is_some())
            .finish()
    }
}
