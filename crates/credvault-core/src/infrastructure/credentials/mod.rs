//! Credential infrastructure
//!
//! SQLite and in-memory credential stores.

pub mod repository;

pub use repository::{InMemoryCredentialRepository, SqliteCredentialRepository};
