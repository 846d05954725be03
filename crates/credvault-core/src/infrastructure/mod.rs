//! Infrastructure layer
//!
//! Contains implementations for external systems: SQLite stores, the broker
//! HTTP API and the env file.

pub mod audit;
pub mod broker;
pub mod credentials;
pub mod env_file;
pub mod security;

pub use env_file::EnvFile;
