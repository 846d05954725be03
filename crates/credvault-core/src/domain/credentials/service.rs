//! Credential service
//!
//! Passwords are sealed under the resolved active key on write and opened
//! through the fallback engine on read, so a stale `password_key_id` never
//! makes a password unreadable while any registry key still fits.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::entity::{
    ApiKeyType, CredentialRecord, CredentialUpdate, NewCredential, SessionUpdate, UserCredentials,
};
use super::repository::CredentialRepository;
use crate::domain::audit::{AuditService, LogLevel};
use crate::domain::security::{Decrypted, KeyService, SecureString};
use crate::error::{Error, Result};

const MODULE: &str = "credentials";

/// Result of re-encrypting one user's password
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RewrapOutcome {
    Rewrapped {
        from_key_id: Option<i64>,
        to_key_id: Option<i64>,
    },
    /// Already sealed under the active key
    Current,
    /// No password stored
    NoPassword,
}

/// Summary of a bulk rewrap
#[derive(Debug, Clone, Default, Serialize)]
pub struct RewrapReport {
    pub rewrapped: Vec<String>,
    pub current: Vec<String>,
    pub no_password: Vec<String>,
    /// Records no known key could decrypt; left untouched
    pub unrecoverable: Vec<String>,
}

/// Service for managing stored user credentials
#[derive(Clone)]
pub struct CredentialService {
    repository: Arc<dyn CredentialRepository>,
    keys: KeyService,
    audit: AuditService,
}

impl std::fmt::Debug for CredentialService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialService")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl CredentialService {
    pub fn new(
        repository: Arc<dyn CredentialRepository>,
        keys: KeyService,
        audit: AuditService,
    ) -> Self {
        Self {
            repository,
            keys,
            audit,
        }
    }

    pub fn keys(&self) -> &KeyService {
        &self.keys
    }

    /// Store a new user, sealing the password under the active key
    pub async fn add_user(
        &self,
        user_id: &str,
        password: &SecureString,
        api_key: Option<&str>,
        api_key_type: ApiKeyType,
    ) -> Result<CredentialRecord> {
        let user_id = validate_user_id(user_id)?;
        if self.repository.get(user_id).await?.is_some() {
            return Err(Error::UserExists(user_id.to_string()));
        }

        let sealed = self.keys.encrypt_secret(password.as_str(), None).await?;
        self.repository
            .insert(&NewCredential {
                user_id: user_id.to_string(),
                password_ciphertext: Some(sealed.ciphertext),
                password_key_id: sealed.key_id,
                api_key: api_key.map(str::to_string),
                api_key_type,
            })
            .await?;

        info!(user_id, key_id = ?sealed.key_id, "Added user credentials");
        self.audit
            .log_event(LogLevel::Info, &format!("User {} added", user_id), MODULE)
            .await;

        self.get_record(user_id).await
    }

    /// Apply an update; absent fields keep their stored values
    pub async fn update_user(
        &self,
        user_id: &str,
        update: CredentialUpdate,
    ) -> Result<CredentialRecord> {
        let user_id = validate_user_id(user_id)?;
        if update.is_empty() {
            return Err(Error::InvalidInput("nothing to update".to_string()));
        }
        self.get_record(user_id).await?;

        let sealed = match &update.password {
            Some(password) => Some(self.keys.encrypt_secret(password.as_str(), None).await?),
            None => None,
        };

        if update.api_key.is_some() || update.api_key_type.is_some() {
            let found = self
                .repository
                .update_profile(user_id, update.api_key.as_deref(), update.api_key_type)
                .await?;
            if !found {
                return Err(Error::UserNotFound(user_id.to_string()));
            }
        }

        if let Some(sealed) = sealed {
            let found = self
                .repository
                .set_password(user_id, &sealed.ciphertext, sealed.key_id)
                .await?;
            if !found {
                return Err(Error::UserNotFound(user_id.to_string()));
            }
            info!(user_id, key_id = ?sealed.key_id, "Re-encrypted password");
        }

        self.audit
            .log_event(LogLevel::Info, &format!("User {} updated", user_id), MODULE)
            .await;
        self.get_record(user_id).await
    }

    pub async fn delete_user(&self, user_id: &str) -> Result<()> {
        let user_id = validate_user_id(user_id)?;
        if !self.repository.delete(user_id).await? {
            return Err(Error::UserNotFound(user_id.to_string()));
        }
        info!(user_id, "Deleted user credentials");
        self.audit
            .log_event(LogLevel::Info, &format!("User {} deleted", user_id), MODULE)
            .await;
        Ok(())
    }

    pub async fn list_users(&self) -> Result<Vec<CredentialRecord>> {
        self.repository.list().await
    }

    /// Most recently updated record, if any
    pub async fn latest_credential(&self) -> Result<Option<CredentialRecord>> {
        self.repository.latest().await
    }

    /// Fetch a record or fail with `UserNotFound`
    pub async fn get_record(&self, user_id: &str) -> Result<CredentialRecord> {
        let user_id = validate_user_id(user_id)?;
        self.repository
            .get(user_id)
            .await?
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))
    }

    /// Record plus decrypted password
    ///
    /// An unrecoverable password yields `password: None` instead of an error.
    pub async fn get_user(&self, user_id: &str) -> Result<UserCredentials> {
        let record = self.get_record(user_id).await?;
        let password = match self.decrypt_record(&record).await {
            Ok(decrypted) => Some(decrypted.plaintext),
            Err(Error::DecryptionFailed { attempts, .. }) => {
                warn!(user_id, attempts, "Stored password could not be decrypted");
                None
            }
            Err(e) => return Err(e),
        };
        Ok(UserCredentials { record, password })
    }

    /// Strict variant of [`Self::get_user`] that fails on an unreadable password
    pub async fn decrypt_password(&self, user_id: &str) -> Result<SecureString> {
        let record = self.get_record(user_id).await?;
        Ok(self.decrypt_record(&record).await?.plaintext)
    }

    /// Decrypt the password of an already fetched record
    pub async fn decrypt_record(&self, record: &CredentialRecord) -> Result<Decrypted> {
        let ciphertext = record.password_ciphertext.as_ref().ok_or_else(|| {
            Error::InvalidInput(format!("user '{}' has no stored password", record.user_id))
        })?;
        self.keys
            .decrypt_secret(ciphertext, record.password_key_id)
            .await
    }

    /// Persist session values returned by the broker
    pub async fn record_session(&self, user_id: &str, update: &SessionUpdate) -> Result<()> {
        let user_id = validate_user_id(user_id)?;
        if !self.repository.update_session(user_id, update).await? {
            return Err(Error::UserNotFound(user_id.to_string()));
        }
        Ok(())
    }

    /// Drop session tokens after logout
    pub async fn clear_session(&self, user_id: &str) -> Result<()> {
        let user_id = validate_user_id(user_id)?;
        if !self.repository.clear_session(user_id, Utc::now()).await? {
            return Err(Error::UserNotFound(user_id.to_string()));
        }
        Ok(())
    }

    /// Re-encrypt one user's password under the active key
    pub async fn rewrap_user(&self, user_id: &str) -> Result<RewrapOutcome> {
        let record = self.get_record(user_id).await?;
        self.rewrap_record(&record).await
    }

    /// Re-encrypt every password; unreadable records are reported, never removed
    pub async fn rewrap_all(&self) -> Result<RewrapReport> {
        let mut report = RewrapReport::default();
        for record in self.repository.list().await? {
            match self.rewrap_record(&record).await {
                Ok(RewrapOutcome::Rewrapped { .. }) => report.rewrapped.push(record.user_id),
                Ok(RewrapOutcome::Current) => report.current.push(record.user_id),
                Ok(RewrapOutcome::NoPassword) => report.no_password.push(record.user_id),
                Err(Error::DecryptionFailed { .. }) => report.unrecoverable.push(record.user_id),
                Err(e) => return Err(e),
            }
        }

        info!(
            rewrapped = report.rewrapped.len(),
            unrecoverable = report.unrecoverable.len(),
            "Rewrap completed"
        );
        Ok(report)
    }

    async fn rewrap_record(&self, record: &CredentialRecord) -> Result<RewrapOutcome> {
        if record.password_ciphertext.is_none() {
            return Ok(RewrapOutcome::NoPassword);
        }

        let decrypted = self.decrypt_record(record).await?;
        let active_key_id = self.keys.resolver().active_key_id().await?;
        if decrypted.attempts == 1
            && decrypted.key_id == record.password_key_id
            && decrypted.key_id == active_key_id
        {
            return Ok(RewrapOutcome::Current);
        }

        let sealed = self
            .keys
            .encrypt_secret(decrypted.plaintext.as_str(), None)
            .await?;
        self.repository
            .set_password(&record.user_id, &sealed.ciphertext, sealed.key_id)
            .await?;

        info!(
            user_id = %record.user_id,
            from_key_id = ?record.password_key_id,
            to_key_id = ?sealed.key_id,
            "Rewrapped password"
        );
        self.audit
            .log_event(
                LogLevel::Info,
                &format!("Password for {} re-encrypted", record.user_id),
                MODULE,
            )
            .await;

        Ok(RewrapOutcome::Rewrapped {
            from_key_id: record.password_key_id,
            to_key_id: sealed.key_id,
        })
    }
}

fn validate_user_id(user_id: &str) -> Result<&str> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("user id cannot be blank".to_string()));
    }
    Ok(trimmed)
}
