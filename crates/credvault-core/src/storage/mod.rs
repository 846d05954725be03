//! Storage layer - SQLite
//!
//! - `database`: Connection pool management and initialization
//! - `migrations`: Schema versioning and automatic migration
//!
//! ```ignore
//! use credvault_core::storage::{Database, DatabaseConfig};
//!
//! let db = Database::new(DatabaseConfig::with_path(config.database_path()?)).await?;
//! let registry = SqliteKeyRegistry::new(db.pool().clone());
//! ```

pub mod database;
pub mod migrations;

pub use database::{DATABASE_FILE, Database, DatabaseConfig};
pub use migrations::{CURRENT_VERSION, MigrationStatus, migration_status, run_migrations};
