//! Credvault Core Library
//!
//! This crate provides the core functionality for Credvault, including:
//! - Key registry (append-only, versioned AES-256 keys)
//! - Envelope cipher and active key resolution
//! - Decryption with key fallback across stale key ids
//! - Credential store (SQLite) with sealed broker passwords
//! - Broker login/logout with request/response audit logging
//! - Configuration and env file handling

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod storage;
pub mod vault;

pub use error::{Error, Result};
pub use vault::Vault;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::audit::AuditService;
    pub use crate::domain::credentials::{ApiKeyType, CredentialService, CredentialUpdate};
    pub use crate::domain::login::{FixedOtp, OtpSource, SessionService};
    pub use crate::domain::security::{KeyResolver, KeyService, SecureString};
    pub use crate::error::{Error, Result};
    pub use crate::storage::Database;
    pub use crate::vault::Vault;
}
