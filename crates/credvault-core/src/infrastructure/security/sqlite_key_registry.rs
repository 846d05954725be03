//! SQLite-backed key registry
//!
//! Rows in `encryption_keys` are only ever inserted. `AUTOINCREMENT` keeps
//! SQLite from handing out an id again even if a row were removed by hand.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::security::{KeyMaterial, KeyRecord, KeyRegistry};
use crate::error::{Error, Result};

/// SQLite implementation of [`KeyRegistry`]
///
/// Expects the schema from [`crate::storage::run_migrations`].
#[derive(Debug, Clone)]
pub struct SqliteKeyRegistry {
    pool: SqlitePool,
}

impl SqliteKeyRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<KeyRecord> {
        let encoded: String = row.try_get("key_material")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        Ok(KeyRecord {
            key_id: row.try_get("key_id")?,
            material: KeyMaterial::from_base64(&encoded)?,
            created_at,
        })
    }
}

#[async_trait]
impl KeyRegistry for SqliteKeyRegistry {
    async fn add(&self, material: &KeyMaterial) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO encryption_keys (key_material, created_at)
            VALUES (?, ?)
            "#,
        )
        .bind(material.to_base64())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let key_id = result.last_insert_rowid();
        tracing::info!(key_id, fingerprint = %material.fingerprint(), "Added key to registry");
        Ok(key_id)
    }

    async fn get(&self, key_id: i64) -> Result<Option<KeyRecord>> {
        let row = sqlx::query(
            "SELECT key_id, key_material, created_at FROM encryption_keys WHERE key_id = ?",
        )
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn list_newest_first(&self) -> Result<Vec<KeyRecord>> {
        let rows = sqlx::query(
            "SELECT key_id, key_material, created_at FROM encryption_keys ORDER BY key_id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn newest(&self) -> Result<Option<KeyRecord>> {
        let row = sqlx::query(
            "SELECT key_id, key_material, created_at FROM encryption_keys ORDER BY key_id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }
}

/// In-memory key registry for tests and dry runs
#[derive(Debug, Default)]
pub struct InMemoryKeyRegistry {
    state: Mutex<InMemoryState>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    next_id: i64,
    keys: BTreeMap<i64, KeyRecord>,
}

impl InMemoryKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::Other("in-memory key registry lock poisoned".to_string()))
    }
}

#[async_trait]
impl KeyRegistry for InMemoryKeyRegistry {
    async fn add(&self, material: &KeyMaterial) -> Result<i64> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let key_id = state.next_id;
        state.keys.insert(
            key_id,
            KeyRecord {
                key_id,
                material: material.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(key_id)
    }

    async fn get(&self, key_id: i64) -> Result<Option<KeyRecord>> {
        Ok(self.lock()?.keys.get(&key_id).cloned())
    }

    async fn list_newest_first(&self) -> Result<Vec<KeyRecord>> {
        Ok(self.lock()?.keys.values().rev().cloned().collect())
    }
}
