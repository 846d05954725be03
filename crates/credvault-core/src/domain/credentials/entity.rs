//! Credential entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::security::{Ciphertext, SecureString};
use crate::error::Error;

/// Broker API key class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiKeyType {
    #[default]
    A,
    B,
}

impl ApiKeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }
}

impl std::fmt::Display for ApiKeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiKeyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Self::A),
            "B" | "b" => Ok(Self::B),
            other => Err(Error::InvalidInput(format!(
                "API key type must be A or B, got '{}'",
                other
            ))),
        }
    }
}

/// Session state returned by the broker
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionFields {
    pub client_code: Option<String>,
    pub response_user_id: Option<String>,
    pub response_user_name: Option<String>,
    pub access_token: Option<String>,
    pub public_token: Option<String>,
    pub refresh_token: Option<String>,
    pub enc_token: Option<String>,
    pub request_token: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_logout_at: Option<DateTime<Utc>>,
}

impl SessionFields {
    /// Whether an access token is stored
    pub fn is_active(&self) -> bool {
        self.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

impl std::fmt::Debug for SessionFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFields")
            .field("client_code", &self.client_code)
            .field("response_user_id", &self.response_user_id)
            .field("response_user_name", &self.response_user_name)
            .field("active", &self.is_active())
            .field("last_login_at", &self.last_login_at)
            .field("last_logout_at", &self.last_logout_at)
            .finish()
    }
}

/// One user's stored authentication material
#[derive(Clone)]
pub struct CredentialRecord {
    pub user_id: String,
    pub password_ciphertext: Option<Ciphertext>,
    /// Key the password was encrypted under; a hint only, it may be stale
    pub password_key_id: Option<i64>,
    pub api_key: Option<String>,
    pub api_key_type: ApiKeyType,
    pub session: SessionFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// Display-safe view
    pub fn summary(&self) -> CredentialSummary {
        CredentialSummary {
            user_id: self.user_id.clone(),
            has_password: self.password_ciphertext.is_some(),
            password_key_id: self.password_key_id,
            has_api_key: self.api_key.is_some(),
            api_key_type: self.api_key_type,
            client_code: self.session.client_code.clone(),
            response_user_name: self.session.response_user_name.clone(),
            session_active: self.session.is_active(),
            last_login_at: self.session.last_login_at,
            last_logout_at: self.session.last_logout_at,
            updated_at: self.updated_at,
        }
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("user_id", &self.user_id)
            .field("password_ciphertext", &self.password_ciphertext)
            .field("password_key_id", &self.password_key_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_key_type", &self.api_key_type)
            .field("session", &self.session)
            .finish()
    }
}

/// Credential metadata without secrets
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSummary {
    pub user_id: String,
    pub has_password: bool,
    pub password_key_id: Option<i64>,
    pub has_api_key: bool,
    pub api_key_type: ApiKeyType,
    pub client_code: Option<String>,
    pub response_user_name: Option<String>,
    pub session_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_logout_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Row to insert, with the password already sealed
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub user_id: String,
    pub password_ciphertext: Option<Ciphertext>,
    pub password_key_id: Option<i64>,
    pub api_key: Option<String>,
    pub api_key_type: ApiKeyType,
}

/// Requested changes to a user's static fields; `None` keeps the stored value
#[derive(Debug, Clone, Default)]
pub struct CredentialUpdate {
    pub password: Option<SecureString>,
    pub api_key: Option<String>,
    pub api_key_type: Option<ApiKeyType>,
}

impl CredentialUpdate {
    pub fn is_empty(&self) -> bool {
        self.password.is_none() && self.api_key.is_none() && self.api_key_type.is_none()
    }
}

/// Session values to persist; `None` keeps the stored value
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub client_code: Option<String>,
    pub response_user_id: Option<String>,
    pub response_user_name: Option<String>,
    pub access_token: Option<String>,
    pub public_token: Option<String>,
    pub refresh_token: Option<String>,
    pub enc_token: Option<String>,
    pub request_token: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl SessionUpdate {
    /// Apply onto stored fields with keep-if-absent semantics
    pub fn apply_to(&self, session: &mut SessionFields) {
        fn keep(slot: &mut Option<String>, value: &Option<String>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }
        keep(&mut session.client_code, &self.client_code);
        keep(&mut session.response_user_id, &self.response_user_id);
        keep(&mut session.response_user_name, &self.response_user_name);
        keep(&mut session.access_token, &self.access_token);
        keep(&mut session.public_token, &self.public_token);
        keep(&mut session.refresh_token, &self.refresh_token);
        keep(&mut session.enc_token, &self.enc_token);
        keep(&mut session.request_token, &self.request_token);
        if self.last_login_at.is_some() {
            session.last_login_at = self.last_login_at;
        }
    }
}

impl std::fmt::Debug for SessionUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionUpdate")
            .field("client_code", &self.client_code)
            .field("response_user_id", &self.response_user_id)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("last_login_at", &self.last_login_at)
            .finish_non_exhaustive()
    }
}

/// A record together with its decrypted password
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub record: CredentialRecord,
    /// `None` when no stored key could decrypt the password
    pub password: Option<SecureString>,
}
