//! Audit repository implementations

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::domain::audit::{
    AuditRepository, EventLogEntry, ExchangeRecord, LogLevel, RequestResponseLog,
};
use crate::error::{Error, Result};

/// SQLite implementation of [`AuditRepository`]
#[derive(Debug, Clone)]
pub struct SqliteAuditRepository {
    pool: SqlitePool,
}

impl SqliteAuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_exchange(row: sqlx::sqlite::SqliteRow) -> Result<ExchangeRecord> {
        let level: String = row.try_get("level")?;
        Ok(ExchangeRecord {
            id: row.try_get("id")?,
            level: level.parse()?,
            message: row.try_get("message")?,
            module: row.try_get("module")?,
            request: row.try_get("request")?,
            response: row.try_get("response")?,
            api_name: row.try_get("api_name")?,
            login_seq_id: row.try_get("login_seq_id")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_event(row: sqlx::sqlite::SqliteRow) -> Result<EventLogEntry> {
        let level: String = row.try_get("level")?;
        Ok(EventLogEntry {
            id: row.try_get("id")?,
            level: level.parse()?,
            message: row.try_get("message")?,
            module: row.try_get("module")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    async fn insert_event(&self, level: LogLevel, message: &str, module: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO event_log (level, message, module, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(level.as_str())
        .bind(message)
        .bind(module)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_exchange(&self, entry: &RequestResponseLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO request_response_log
                (level, message, module, request, response, api_name, login_seq_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.level.as_str())
        .bind(&entry.message)
        .bind(&entry.module)
        .bind(&entry.request)
        .bind(&entry.response)
        .bind(&entry.api_name)
        .bind(&entry.login_seq_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn sequence_exists(&self, login_seq_id: &str) -> Result<bool> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM request_response_log WHERE login_seq_id = ? LIMIT 1")
                .bind(login_seq_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.is_some())
    }

    async fn exchanges_for_sequence(&self, login_seq_id: &str) -> Result<Vec<ExchangeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, level, message, module, request, response, api_name, login_seq_id, created_at
            FROM request_response_log
            WHERE login_seq_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(login_seq_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_exchange).collect()
    }

    async fn recent_events(&self, limit: u32) -> Result<Vec<EventLogEntry>> {
        let rows = sqlx::query(
            "SELECT id, level, message, module, created_at FROM event_log ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }
}

/// In-memory audit repository for tests
#[derive(Debug, Default)]
pub struct InMemoryAuditRepository {
    events: Mutex<Vec<EventLogEntry>>,
    exchanges: Mutex<Vec<ExchangeRecord>>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored exchange, oldest first
    pub fn exchanges(&self) -> Result<Vec<ExchangeRecord>> {
        Ok(self.exchanges.lock().map_err(poisoned)?.clone())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::Other("in-memory audit log lock poisoned".to_string())
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn insert_event(&self, level: LogLevel, message: &str, module: &str) -> Result<()> {
        let mut events = self.events.lock().map_err(poisoned)?;
        let id = events.len() as i64 + 1;
        events.push(EventLogEntry {
            id,
            level,
            message: message.to_string(),
            module: module.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn insert_exchange(&self, entry: &RequestResponseLog) -> Result<()> {
        let mut exchanges = self.exchanges.lock().map_err(poisoned)?;
        let id = exchanges.len() as i64 + 1;
        exchanges.push(ExchangeRecord {
            id,
            level: entry.level,
            message: entry.message.clone(),
            module: entry.module.clone(),
            request: entry.request.clone(),
            response: entry.response.clone(),
            api_name: entry.api_name.clone(),
            login_seq_id: entry.login_seq_id.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn sequence_exists(&self, login_seq_id: &str) -> Result<bool> {
        Ok(self
            .exchanges
            .lock()
            .map_err(poisoned)?
            .iter()
            .any(|e| e.login_seq_id.as_deref() == Some(login_seq_id)))
    }

    async fn exchanges_for_sequence(&self, login_seq_id: &str) -> Result<Vec<ExchangeRecord>> {
        Ok(self
            .exchanges
            .lock()
            .map_err(poisoned)?
            .iter()
            .filter(|e| e.login_seq_id.as_deref() == Some(login_seq_id))
            .cloned()
            .collect())
    }

    async fn recent_events(&self, limit: u32) -> Result<Vec<EventLogEntry>> {
        Ok(self
            .events
            .lock()
            .map_err(poisoned)?
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
