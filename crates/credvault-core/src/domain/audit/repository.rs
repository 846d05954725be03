//! Repository trait for audit persistence

use async_trait::async_trait;

use super::entity::{EventLogEntry, ExchangeRecord, LogLevel, RequestResponseLog};
use crate::error::Result;

/// Append-only store for audit rows
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Append a general event
    async fn insert_event(&self, level: LogLevel, message: &str, module: &str) -> Result<()>;

    /// Append a request/response exchange
    async fn insert_exchange(&self, entry: &RequestResponseLog) -> Result<()>;

    /// Whether any exchange already carries this login sequence id
    async fn sequence_exists(&self, login_seq_id: &str) -> Result<bool>;

    /// Exchanges of one login sequence, oldest first
    async fn exchanges_for_sequence(&self, login_seq_id: &str) -> Result<Vec<ExchangeRecord>>;

    /// Most recent events, newest first
    async fn recent_events(&self, limit: u32) -> Result<Vec<EventLogEntry>>;
}
