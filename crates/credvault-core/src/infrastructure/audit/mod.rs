//! Audit infrastructure
//!
//! SQLite and in-memory stores for the event and exchange logs.

pub mod repository;

pub use repository::{InMemoryAuditRepository, SqliteAuditRepository};
