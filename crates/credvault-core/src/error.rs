//! Error types for Credvault

use thiserror::Error;

/// Result type alias using Credvault's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Message carried by every exhausted fallback decryption
pub const NO_KNOWN_KEY: &str = "no known key could decrypt";

/// Credvault error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Credential errors (E001-E099)
    #[error("User '{0}' not found. Run `credvault users list` to see all users.")]
    UserNotFound(String),

    #[error("User '{0}' already exists. Use `credvault users update {0}` to modify it.")]
    UserExists(String),

    // Key errors (E100-E199)
    #[error("Encryption key {0} not found in the key registry.")]
    KeyNotFound(i64),

    #[error("No usable encryption key: {0}")]
    ConfigurationError(String),

    #[error("Decryption failed: {reason} (tried {attempts} key(s))")]
    DecryptionFailed { reason: String, attempts: usize },

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    // Network errors (E200-E299)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("Broker rejected '{api}': {reason}")]
    BrokerRejected { api: String, reason: String },

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // User errors (E700-E799)
    #[error("User cancelled operation")]
    UserCancelled,

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Exhausted fallback decryption after `attempts` candidate keys
    pub fn no_known_key(attempts: usize) -> Self {
        Self::DecryptionFailed {
            reason: NO_KNOWN_KEY.to_string(),
            attempts,
        }
    }

    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::UserNotFound(_) => "E001",
            Self::UserExists(_) => "E002",
            Self::KeyNotFound(_) => "E100",
            Self::ConfigurationError(_) => "E101",
            Self::DecryptionFailed { .. } => "E102",
            Self::EncryptionFailed(_) => "E103",
            Self::InvalidKeyMaterial(_) => "E104",
            Self::NetworkError(_) => "E200",
            Self::BrokerRejected { .. } => "E201",
            Self::DatabaseError(_) => "E400",
            Self::ConfigError(_) => "E600",
            Self::UserCancelled => "E700",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::UserNotFound(_) => Some("credvault users list".to_string()),
            Self::UserExists(user) => Some(format!("credvault users update {}", user)),
            Self::KeyNotFound(_) => Some("credvault keys list".to_string()),
            Self::ConfigurationError(_) => Some("credvault keys generate".to_string()),
            Self::DecryptionFailed { .. } => {
                Some("credvault users update <user> --password".to_string())
            }
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::ConfigError(_) => Some("credvault config list".to_string()),
            _ => None,
        }
    }

    /// Whether the caller can recover by re-entering data rather than aborting
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DecryptionFailed { .. } | Self::UserNotFound(_) | Self::InvalidInput(_)
        )
    }
}
