//! Active key resolution
//!
//! Picks the key that new encryptions use. Sources are tried in order and
//! the first hit wins:
//!
//! 1. an explicit per-call override id
//! 2. the process-wide configured active id
//! 3. the newest registry record
//! 4. fallback key material from process configuration (no registry id)
//!
//! Sources 1 and 2 only match when the id exists in the registry. Registry
//! errors are logged and treated as a miss so that source 4 stays reachable
//! when the datastore is down.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::entity::KeyMaterial;
use super::repository::KeyRegistry;
use crate::error::{Error, Result};

/// Which link of the priority chain produced the active key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Override,
    Configured,
    Newest,
    Fallback,
}

impl KeySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Override => "override",
            Self::Configured => "configured",
            Self::Newest => "newest",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key chosen for an encryption
#[derive(Debug, Clone)]
pub struct ActiveKey {
    /// Registry id to stamp next to the ciphertext; `None` for fallback material
    pub key_id: Option<i64>,
    pub material: KeyMaterial,
    pub source: KeySource,
}

/// Resolves the active encryption key
///
/// The configured id and fallback material are fixed at construction; the
/// resolver never consults the environment itself.
#[derive(Clone)]
pub struct KeyResolver {
    registry: Arc<dyn KeyRegistry>,
    configured_key_id: Option<i64>,
    fallback_material: Option<KeyMaterial>,
}

impl KeyResolver {
    pub fn new(
        registry: Arc<dyn KeyRegistry>,
        configured_key_id: Option<i64>,
        fallback_material: Option<KeyMaterial>,
    ) -> Self {
        Self {
            registry,
            configured_key_id,
            fallback_material,
        }
    }

    /// Resolver using only the registry
    pub fn registry_only(registry: Arc<dyn KeyRegistry>) -> Self {
        Self::new(registry, None, None)
    }

    pub fn configured_key_id(&self) -> Option<i64> {
        self.configured_key_id
    }

    pub fn fallback_material(&self) -> Option<&KeyMaterial> {
        self.fallback_material.as_ref()
    }

    pub fn registry(&self) -> &Arc<dyn KeyRegistry> {
        &self.registry
    }

    /// Resolve the active key, honoring an optional per-call override
    pub async fn resolve(&self, override_key_id: Option<i64>) -> Result<ActiveKey> {
        if let Some(key_id) = override_key_id {
            if let Some(key) = self.lookup(key_id, KeySource::Override).await {
                return Ok(key);
            }
        }

        if let Some(key_id) = self.configured_key_id {
            if let Some(key) = self.lookup(key_id, KeySource::Configured).await {
                return Ok(key);
            }
        }

        match self.registry.newest().await {
            Ok(Some(record)) => {
                debug!(key_id = record.key_id, source = "newest", "Resolved active key");
                return Ok(ActiveKey {
                    key_id: Some(record.key_id),
                    material: record.material,
                    source: KeySource::Newest,
                });
            }
            Ok(None) => debug!("Key registry is empty"),
            Err(e) => warn!(error = %e, "Key registry unavailable, trying fallback key"),
        }

        match &self.fallback_material {
            Some(material) => {
                debug!(source = "fallback", "Resolved active key");
                Ok(ActiveKey {
                    key_id: None,
                    material: material.clone(),
                    source: KeySource::Fallback,
                })
            }
            None => Err(Error::ConfigurationError(
                "no key in the registry and no fallback key configured".to_string(),
            )),
        }
    }

    /// Id new encryptions are stamped with (`None` when only fallback material is usable)
    pub async fn active_key_id(&self) -> Result<Option<i64>> {
        Ok(self.resolve(None).await?.key_id)
    }

    async fn lookup(&self, key_id: i64, source: KeySource) -> Option<ActiveKey> {
        match self.registry.get(key_id).await {
            Ok(Some(record)) => {
                debug!(key_id, source = %source, "Resolved active key");
                Some(ActiveKey {
                    key_id: Some(record.key_id),
                    material: record.material,
                    source,
                })
            }
            Ok(None) => {
                warn!(key_id, source = %source, "Key id not in registry, skipping");
                None
            }
            Err(e) => {
                warn!(key_id, source = %source, error = %e, "Key lookup failed, skipping");
                None
            }
        }
    }
}

impl fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyResolver")
            .field("configured_key_id", &self.configured_key_id)
            .field("fallback_material", &self.fallback_material.is_some())
            .finish()
    }
}
