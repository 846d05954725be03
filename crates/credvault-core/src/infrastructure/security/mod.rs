//! Security infrastructure implementations
//!
//! Persistent and in-memory key registries.

pub mod sqlite_key_registry;

pub use sqlite_key_registry::*;
