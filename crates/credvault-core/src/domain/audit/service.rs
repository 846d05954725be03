//! Audit service
//!
//! Audit writes never fail the operation being audited: errors are reported
//! through `tracing` and swallowed.

use std::sync::Arc;

use rand::Rng;
use tracing::{error, warn};

use super::entity::{EventLogEntry, ExchangeRecord, LogLevel, RequestResponseLog};
use super::repository::AuditRepository;
use crate::error::{Error, Result};

/// Length of a login sequence id
pub const LOGIN_SEQ_ID_LEN: usize = 20;

const SEQ_ID_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()-_=+";

/// Give up on finding an unused sequence id after this many draws
const MAX_SEQ_ID_DRAWS: usize = 16;

/// Service for writing and reading the audit log
#[derive(Clone)]
pub struct AuditService {
    repository: Arc<dyn AuditRepository>,
}

impl AuditService {
    pub fn new(repository: Arc<dyn AuditRepository>) -> Self {
        Self { repository }
    }

    /// Record a general event
    pub async fn log_event(&self, level: LogLevel, message: &str, module: &str) {
        if let Err(e) = self.repository.insert_event(level, message, module).await {
            warn!(error = %e, module, "Failed to write audit event");
        }
    }

    /// Record an API exchange
    ///
    /// If the insert fails, a second `ERROR` row describing the failure is
    /// attempted under the same api name and sequence id.
    pub async fn log_exchange(&self, entry: RequestResponseLog) {
        let Err(e) = self.repository.insert_exchange(&entry).await else {
            return;
        };
        warn!(error = %e, api = ?entry.api_name, "Failed to write exchange log, retrying as error row");

        let mut fallback = RequestResponseLog::new(
            LogLevel::Error,
            format!("Logging failed: {}", e),
            entry.module.clone(),
        );
        fallback.api_name = entry.api_name.clone();
        fallback.login_seq_id = entry.login_seq_id.clone();

        if let Err(e) = self.repository.insert_exchange(&fallback).await {
            error!(error = %e, "Failed to write exchange log error row");
        }
    }

    /// Allocate a login sequence id not yet present in the exchange log
    pub async fn new_login_seq_id(&self) -> Result<String> {
        for _ in 0..MAX_SEQ_ID_DRAWS {
            let candidate = random_seq_id();
            if !self.repository.sequence_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(Error::Other(
            "could not allocate an unused login sequence id".to_string(),
        ))
    }

    pub async fn exchanges_for_sequence(&self, login_seq_id: &str) -> Result<Vec<ExchangeRecord>> {
        self.repository.exchanges_for_sequence(login_seq_id).await
    }

    pub async fn recent_events(&self, limit: u32) -> Result<Vec<EventLogEntry>> {
        self.repository.recent_events(limit).await
    }
}

impl std::fmt::Debug for AuditService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditService").finish_non_exhaustive()
    }
}

fn random_seq_id() -> String {
    let mut rng = rand::thread_rng();
    (0..LOGIN_SEQ_ID_LEN)
        .map(|_| SEQ_ID_ALPHABET[rng.gen_range(0..SEQ_ID_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::audit::InMemoryAuditRepository;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn test_seq_id_shape() {
        for _ in 0..50 {
            let id = random_seq_id();
            assert_eq!(id.len(), LOGIN_SEQ_ID_LEN);
            assert!(id.bytes().all(|b| SEQ_ID_ALPHABET.contains(&b)));
        }
    }

    #[tokio::test]
    async fn test_log_exchange_and_read_back() {
        let repo = Arc::new(InMemoryAuditRepository::new());
        let audit = AuditService::new(repo.clone());

        let seq = audit.new_login_seq_id().await.unwrap();
        audit
            .log_exchange(
                RequestResponseLog::new(LogLevel::Info, "Login call completed", "session")
                    .api("login")
                    .sequence(seq.clone()),
            )
            .await;

        let rows = audit.exchanges_for_sequence(&seq).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, "Login call completed");
        assert!(repo.sequence_exists(&seq).await.unwrap());
    }

    /// Rejects every exchange whose level is not ERROR
    struct FlakyRepository {
        written: Mutex<Vec<RequestResponseLog>>,
    }

    #[async_trait]
    impl AuditRepository for FlakyRepository {
        async fn insert_event(&self, _: LogLevel, _: &str, _: &str) -> Result<()> {
            Err(Error::Other("disk full".to_string()))
        }

        async fn insert_exchange(&self, entry: &RequestResponseLog) -> Result<()> {
            if entry.level != LogLevel::Error {
                return Err(Error::Other("response too large".to_string()));
            }
            self.written.lock().unwrap().push(entry.clone());
            Ok(())
        }

        async fn sequence_exists(&self, _: &str) -> Result<bool> {
            Ok(false)
        }

        async fn exchanges_for_sequence(&self, _: &str) -> Result<Vec<ExchangeRecord>> {
            Ok(Vec::new())
        }

        async fn recent_events(&self, _: u32) -> Result<Vec<EventLogEntry>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_failed_exchange_retried_as_error_row() {
        let repo = Arc::new(FlakyRepository {
            written: Mutex::new(Vec::new()),
        });
        let audit = AuditService::new(repo.clone());

        audit
            .log_exchange(
                RequestResponseLog::new(LogLevel::Info, "Generate session call completed", "session")
                    .api("generate_session")
                    .sequence("seq-1"),
            )
            .await;

        let written = repo.written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].level, LogLevel::Error);
        assert!(written[0].message.starts_with("Logging failed: "));
        assert!(written[0].message.contains("response too large"));
        assert_eq!(written[0].api_name.as_deref(), Some("generate_session"));
        assert_eq!(written[0].login_seq_id.as_deref(), Some("seq-1"));
    }

    #[tokio::test]
    async fn test_log_event_swallows_errors() {
        let audit = AuditService::new(Arc::new(FlakyRepository {
            written: Mutex::new(Vec::new()),
        }));
        // Must not panic or propagate
        audit.log_event(LogLevel::Info, "User added", "credentials").await;
    }
}
