//! Credential repository implementations

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::credentials::{
    ApiKeyType, CredentialRecord, CredentialRepository, NewCredential, SessionFields,
    SessionUpdate,
};
use crate::domain::security::Ciphertext;
use crate::error::{Error, Result};

const SELECT_COLUMNS: &str = r#"
    SELECT user_id, password_ciphertext, password_key_id, api_key, api_key_type,
           client_code, response_user_id, response_user_name, access_token,
           public_token, refresh_token, enc_token, request_token,
           last_login_at, last_logout_at, created_at, updated_at
    FROM credentials
"#;

/// SQLite implementation of [`CredentialRepository`]
#[derive(Debug, Clone)]
pub struct SqliteCredentialRepository {
    pool: SqlitePool,
}

impl SqliteCredentialRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<CredentialRecord> {
        let ciphertext: Option<String> = row.try_get("password_ciphertext")?;
        let api_key_type: String = row.try_get("api_key_type")?;

        Ok(CredentialRecord {
            user_id: row.try_get("user_id")?,
            password_ciphertext: ciphertext.map(Ciphertext::new),
            password_key_id: row.try_get("password_key_id")?,
            api_key: row.try_get("api_key")?,
            api_key_type: api_key_type.parse()?,
            session: SessionFields {
                client_code: row.try_get("client_code")?,
                response_user_id: row.try_get("response_user_id")?,
                response_user_name: row.try_get("response_user_name")?,
                access_token: row.try_get("access_token")?,
                public_token: row.try_get("public_token")?,
                refresh_token: row.try_get("refresh_token")?,
                enc_token: row.try_get("enc_token")?,
                request_token: row.try_get("request_token")?,
                last_login_at: row.try_get("last_login_at")?,
                last_logout_at: row.try_get("last_logout_at")?,
            },
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl CredentialRepository for SqliteCredentialRepository {
    async fn insert(&self, credential: &NewCredential) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO credentials
                (user_id, password_ciphertext, password_key_id, api_key, api_key_type, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&credential.user_id)
        .bind(credential.password_ciphertext.as_ref().map(Ciphertext::as_str))
        .bind(credential.password_key_id)
        .bind(&credential.api_key)
        .bind(credential.api_key_type.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::UserExists(credential.user_id.clone())
            }
            other => Error::DatabaseError(other),
        })?;

        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Option<CredentialRecord>> {
        let row = sqlx::query(&format!("{} WHERE user_id = ?", SELECT_COLUMNS))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn latest(&self) -> Result<Option<CredentialRecord>> {
        let row = sqlx::query(&format!(
            "{} ORDER BY updated_at DESC, rowid DESC LIMIT 1",
            SELECT_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn list(&self) -> Result<Vec<CredentialRecord>> {
        let rows = sqlx::query(&format!("{} ORDER BY user_id", SELECT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn set_password(
        &self,
        user_id: &str,
        ciphertext: &Ciphertext,
        key_id: Option<i64>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET password_ciphertext = ?, password_key_id = ?, updated_at = ?
            WHERE user_id = ?
            "#,
        )
        .bind(ciphertext.as_str())
        .bind(key_id)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_profile(
        &self,
        user_id: &str,
        api_key: Option<&str>,
        api_key_type: Option<ApiKeyType>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET api_key = COALESCE(?, api_key),
                api_key_type = COALESCE(?, api_key_type),
                updated_at = ?
            WHERE user_id = ?
            "#,
        )
        .bind(api_key)
        .bind(api_key_type.map(|t| t.as_str()))
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_session(&self, user_id: &str, update: &SessionUpdate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET client_code = COALESCE(?, client_code),
                response_user_id = COALESCE(?, response_user_id),
                response_user_name = COALESCE(?, response_user_name),
                access_token = COALESCE(?, access_token),
                public_token = COALESCE(?, public_token),
                refresh_token = COALESCE(?, refresh_token),
                enc_token = COALESCE(?, enc_token),
                request_token = COALESCE(?, request_token),
                last_login_at = COALESCE(?, last_login_at),
                updated_at = ?
            WHERE user_id = ?
            "#,
        )
        .bind(&update.client_code)
        .bind(&update.response_user_id)
        .bind(&update.response_user_name)
        .bind(&update.access_token)
        .bind(&update.public_token)
        .bind(&update.refresh_token)
        .bind(&update.enc_token)
        .bind(&update.request_token)
        .bind(update.last_login_at)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_session(&self, user_id: &str, logged_out_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET client_code = NULL,
                response_user_id = NULL,
                response_user_name = NULL,
                access_token = NULL,
                public_token = NULL,
                refresh_token = NULL,
                enc_token = NULL,
                request_token = NULL,
                last_logout_at = ?,
                updated_at = ?
            WHERE user_id = ?
            "#,
        )
        .bind(logged_out_at)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM credentials WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// In-memory credential repository for tests
#[derive(Debug, Default)]
pub struct InMemoryCredentialRepository {
    state: Mutex<InMemoryState>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    /// Logical clock so `latest` is deterministic within one timestamp
    clock: u64,
    records: BTreeMap<String, (u64, CredentialRecord)>,
}

impl InMemoryState {
    fn touch(&mut self, user_id: &str) -> Option<&mut CredentialRecord> {
        self.clock += 1;
        let clock = self.clock;
        self.records.get_mut(user_id).map(|(stamp, record)| {
            *stamp = clock;
            record.updated_at = Utc::now();
            record
        })
    }
}

impl InMemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::Other("in-memory credential store lock poisoned".to_string()))
    }
}

#[async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn insert(&self, credential: &NewCredential) -> Result<()> {
        let mut state = self.lock()?;
        if state.records.contains_key(&credential.user_id) {
            return Err(Error::UserExists(credential.user_id.clone()));
        }
        state.clock += 1;
        let now = Utc::now();
        let record = CredentialRecord {
            user_id: credential.user_id.clone(),
            password_ciphertext: credential.password_ciphertext.clone(),
            password_key_id: credential.password_key_id,
            api_key: credential.api_key.clone(),
            api_key_type: credential.api_key_type,
            session: SessionFields::default(),
            created_at: now,
            updated_at: now,
        };
        let clock = state.clock;
        state
            .records
            .insert(credential.user_id.clone(), (clock, record));
        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Option<CredentialRecord>> {
        Ok(self
            .lock()?
            .records
            .get(user_id)
            .map(|(_, record)| record.clone()))
    }

    async fn latest(&self) -> Result<Option<CredentialRecord>> {
        Ok(self
            .lock()?
            .records
            .values()
            .max_by_key(|(stamp, _)| *stamp)
            .map(|(_, record)| record.clone()))
    }

    async fn list(&self) -> Result<Vec<CredentialRecord>> {
        Ok(self
            .lock()?
            .records
            .values()
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn set_password(
        &self,
        user_id: &str,
        ciphertext: &Ciphertext,
        key_id: Option<i64>,
    ) -> Result<bool> {
        let mut state = self.lock()?;
        Ok(state
            .touch(user_id)
            .map(|record| {
                record.password_ciphertext = Some(ciphertext.clone());
                record.password_key_id = key_id;
            })
            .is_some())
    }

    async fn update_profile(
        &self,
        user_id: &str,
        api_key: Option<&str>,
        api_key_type: Option<ApiKeyType>,
    ) -> Result<bool> {
        let mut state = self.lock()?;
        Ok(state
            .touch(user_id)
            .map(|record| {
                if let Some(api_key) = api_key {
                    record.api_key = Some(api_key.to_string());
                }
                if let Some(api_key_type) = api_key_type {
                    record.api_key_type = api_key_type;
                }
            })
            .is_some())
    }

    async fn update_session(&self, user_id: &str, update: &SessionUpdate) -> Result<bool> {
        let mut state = self.lock()?;
        Ok(state
            .touch(user_id)
            .map(|record| update.apply_to(&mut record.session))
            .is_some())
    }

    async fn clear_session(&self, user_id: &str, logged_out_at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.lock()?;
        Ok(state
            .touch(user_id)
            .map(|record| {
                record.session = SessionFields {
                    last_login_at: record.session.last_login_at,
                    last_logout_at: Some(logged_out_at),
                    ..Default::default()
                };
            })
            .is_some())
    }

    async fn delete(&self, user_id: &str) -> Result<bool> {
        Ok(self.lock()?.records.remove(user_id).is_some())
    }
}
