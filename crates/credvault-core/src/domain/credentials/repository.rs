//! Repository trait for credential persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::entity::{ApiKeyType, CredentialRecord, NewCredential, SessionUpdate};
use crate::domain::security::Ciphertext;
use crate::error::Result;

/// Store of one credential record per user id
///
/// Mutations return `false` when the user id does not exist.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Insert a new record; `UserExists` if the id is taken
    async fn insert(&self, credential: &NewCredential) -> Result<()>;

    async fn get(&self, user_id: &str) -> Result<Option<CredentialRecord>>;

    /// Most recently updated record
    async fn latest(&self) -> Result<Option<CredentialRecord>>;

    /// All records ordered by user id
    async fn list(&self) -> Result<Vec<CredentialRecord>>;

    /// Replace the password ciphertext and its key id together
    async fn set_password(
        &self,
        user_id: &str,
        ciphertext: &Ciphertext,
        key_id: Option<i64>,
    ) -> Result<bool>;

    /// Update static fields, keeping stored values where `None`
    async fn update_profile(
        &self,
        user_id: &str,
        api_key: Option<&str>,
        api_key_type: Option<ApiKeyType>,
    ) -> Result<bool>;

    /// Update session fields, keeping stored values where `None`
    async fn update_session(&self, user_id: &str, update: &SessionUpdate) -> Result<bool>;

    /// Clear session tokens and stamp the logout time
    async fn clear_session(&self, user_id: &str, logged_out_at: DateTime<Utc>) -> Result<bool>;

    async fn delete(&self, user_id: &str) -> Result<bool>;
}
