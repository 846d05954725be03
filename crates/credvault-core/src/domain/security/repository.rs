//! Key registry trait
//!
//! Append-only: there is no update or delete. Rotation inserts a new record
//! so that every ciphertext produced under an older key stays decryptable.

use async_trait::async_trait;

use super::entity::{KeyMaterial, KeyRecord};
use crate::error::Result;

/// Versioned store of symmetric keys
#[async_trait]
pub trait KeyRegistry: Send + Sync {
    /// Append key material; returns the new, never-reused id
    async fn add(&self, material: &KeyMaterial) -> Result<i64>;

    /// Fetch a record by id
    async fn get(&self, key_id: i64) -> Result<Option<KeyRecord>>;

    /// All records ordered by key id, highest first
    async fn list_newest_first(&self) -> Result<Vec<KeyRecord>>;

    /// Highest-id record, if any
    async fn newest(&self) -> Result<Option<KeyRecord>> {
        Ok(self.list_newest_first().await?.into_iter().next())
    }
}
