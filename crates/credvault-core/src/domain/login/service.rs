//! Login and logout orchestration
//!
//! Every broker call of one flow is written to the exchange log under a
//! shared login sequence id. The plaintext password never reaches the log
//! or the env file; the env file gets the stored ciphertext.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::issuer::{OtpSource, SessionIssuer, ensure_success, field, session_checksum};
use crate::domain::audit::{AuditService, LogLevel, RequestResponseLog};
use crate::domain::credentials::{CredentialRecord, CredentialService, SessionUpdate};
use crate::error::{Error, Result};
use crate::infrastructure::env_file::EnvFile;

const MODULE: &str = "session";

pub const ENV_USER_ID: &str = "CREDVAULT_USER_ID";
pub const ENV_PASSWORD: &str = "CREDVAULT_PASSWORD";
pub const ENV_PASSWORD_KEY_ID: &str = "CREDVAULT_PASSWORD_KEY_ID";
pub const ENV_API_KEY: &str = "CREDVAULT_API_KEY";
pub const ENV_API_KEY_TYPE: &str = "CREDVAULT_API_KEY_TYPE";
pub const ENV_REQUEST_TOKEN: &str = "CREDVAULT_REQUEST_TOKEN";
pub const ENV_ACCESS_TOKEN: &str = "CREDVAULT_ACCESS_TOKEN";
pub const ENV_CLIENT_CODE: &str = "CREDVAULT_CLIENT_CODE";
pub const ENV_RESPONSE_USER_ID: &str = "CREDVAULT_RESPONSE_USER_ID";
pub const ENV_RESPONSE_USER_NAME: &str = "CREDVAULT_RESPONSE_USER_NAME";
pub const ENV_PUBLIC_TOKEN: &str = "CREDVAULT_PUBLIC_TOKEN";
pub const ENV_REFRESH_TOKEN: &str = "CREDVAULT_REFRESH_TOKEN";
pub const ENV_ENC_TOKEN: &str = "CREDVAULT_ENC_TOKEN";
pub const ENV_LAST_LOGIN: &str = "CREDVAULT_LAST_LOGIN";
pub const ENV_LAST_LOGOUT: &str = "CREDVAULT_LAST_LOGOUT";

/// Env keys blanked on logout
pub const SESSION_ENV_KEYS: &[&str] = &[
    ENV_REQUEST_TOKEN,
    ENV_ACCESS_TOKEN,
    ENV_CLIENT_CODE,
    ENV_RESPONSE_USER_ID,
    ENV_RESPONSE_USER_NAME,
    ENV_PUBLIC_TOKEN,
    ENV_REFRESH_TOKEN,
    ENV_ENC_TOKEN,
    ENV_LAST_LOGIN,
    ENV_LAST_LOGOUT,
];

#[derive(Clone, Serialize)]
pub struct LoginOutcome {
    pub login_seq_id: String,
    pub request_token: String,
    pub access_token: Option<String>,
}

impl std::fmt::Debug for LoginOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginOutcome")
            .field("login_seq_id", &self.login_seq_id)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogoutOutcome {
    pub login_seq_id: String,
    /// False when no session was stored and the broker was not called
    pub broker_notified: bool,
}

/// Drives broker login and logout for stored users
#[derive(Clone)]
pub struct SessionService {
    credentials: CredentialService,
    issuer: Arc<dyn SessionIssuer>,
    audit: AuditService,
    env_file: Option<EnvFile>,
    api_secret: String,
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("env_file", &self.env_file)
            .field("api_secret", &(!self.api_secret.is_empty()))
            .finish_non_exhaustive()
    }
}

impl SessionService {
    pub fn new(
        credentials: CredentialService,
        issuer: Arc<dyn SessionIssuer>,
        audit: AuditService,
    ) -> Self {
        Self {
            credentials,
            issuer,
            audit,
            env_file: None,
            api_secret: String::new(),
        }
    }

    /// Mirror session values into this env file after login and logout
    pub fn with_env_file(mut self, env_file: EnvFile) -> Self {
        self.env_file = Some(env_file);
        self
    }

    /// Secret mixed into the session checksum
    pub fn with_api_secret(mut self, secret: impl Into<String>) -> Self {
        self.api_secret = secret.into();
        self
    }

    pub async fn login(&self, user_id: &str, otp: &dyn OtpSource) -> Result<LoginOutcome> {
        let record = self.credentials.get_record(user_id).await?;
        let user_id = record.user_id.as_str();
        let login_seq_id = self.audit.new_login_seq_id().await?;
        let decrypted = self.credentials.decrypt_record(&record).await?;
        info!(user_id, login_seq_id = %login_seq_id, "Starting broker login");

        // The password is never part of the logged request
        let login_request = json!({ "user_id": user_id }).to_string();
        let login_json = self
            .checked_call(
                "login",
                ("Login call completed", "Login call failed"),
                &login_seq_id,
                &login_request,
                self.issuer.login(user_id, &decrypted.plaintext).await,
            )
            .await?;

        let request_token = otp.request_token(user_id)?.trim().to_string();
        if request_token.is_empty() {
            return Err(Error::InvalidInput("request token cannot be blank".to_string()));
        }

        let api_key = record.api_key.as_deref().ok_or_else(|| {
            Error::InvalidInput(format!("user '{}' has no API key", record.user_id))
        })?;
        let checksum = session_checksum(api_key, &request_token, &self.api_secret);

        let session_request =
            json!({ "api_key": api_key, "request_token": request_token }).to_string();
        let session_json = self
            .checked_call(
                "generate_session",
                ("Generate session call completed", "Generate session failed"),
                &login_seq_id,
                &session_request,
                self.issuer
                    .generate_session(api_key, &request_token, &checksum)
                    .await,
            )
            .await?;

        let data = session_json.get("data");
        let update = SessionUpdate {
            client_code: field(login_json.get("data"), "cid"),
            response_user_id: field(data, "user_id"),
            response_user_name: field(data, "user_name"),
            access_token: field(data, "access_token"),
            public_token: field(data, "public_token"),
            refresh_token: field(data, "refresh_token"),
            enc_token: field(data, "enctoken"),
            request_token: Some(request_token.clone()),
            last_login_at: Some(Utc::now()),
        };
        self.credentials.record_session(user_id, &update).await?;

        let mut pairs = static_env_pairs(&record, decrypted.key_id);
        pairs.extend(session_env_pairs(&update, data));
        self.write_env(&pairs);

        self.log(
            LogLevel::Info,
            "Login flow completed successfully",
            "login",
            &login_seq_id,
        )
        .request(&login_request)
        .response(session_json.to_string())
        .write(&self.audit)
        .await;
        info!(user_id, login_seq_id = %login_seq_id, "Broker login completed");

        Ok(LoginOutcome {
            login_seq_id,
            request_token,
            access_token: update.access_token,
        })
    }

    pub async fn logout(&self, user_id: &str) -> Result<LogoutOutcome> {
        let record = self.credentials.get_record(user_id).await?;
        let user_id = record.user_id.as_str();
        let login_seq_id = self.audit.new_login_seq_id().await?;
        let request = json!({ "user_id": user_id }).to_string();

        match self.end_session(&record).await {
            Ok(response) => {
                self.log(LogLevel::Info, "Logout call completed", "logout", &login_seq_id)
                    .request(&request)
                    .response(
                        response
                            .as_ref()
                            .map_or_else(|| "{}".to_string(), Value::to_string),
                    )
                    .write(&self.audit)
                    .await;
                info!(user_id, login_seq_id = %login_seq_id, "Logged out");
                Ok(LogoutOutcome {
                    login_seq_id,
                    broker_notified: response.is_some(),
                })
            }
            Err(e) => {
                self.log(LogLevel::Error, "Logout failed", "logout", &login_seq_id)
                    .request(&request)
                    .response(e.to_string())
                    .write(&self.audit)
                    .await;
                Err(e)
            }
        }
    }

    /// Revoke at the broker when a token is stored, then clear local state
    async fn end_session(&self, record: &CredentialRecord) -> Result<Option<Value>> {
        let access_token = record
            .session
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty());

        let response = match (record.api_key.as_deref(), access_token) {
            (Some(api_key), Some(access_token)) => {
                let response = self.issuer.logout(api_key, access_token).await?;
                ensure_success("logout", &response)?;
                Some(response)
            }
            _ => {
                debug!(user_id = %record.user_id, "No stored session, skipping broker logout");
                None
            }
        };

        self.credentials.clear_session(&record.user_id).await?;
        if let Some(env_file) = &self.env_file {
            if let Err(e) = env_file.blank(SESSION_ENV_KEYS) {
                warn!(error = %e, "Failed to clear session values from env file");
            }
        }
        Ok(response)
    }

    /// Log one broker call; transport errors and non-success replies are ERROR rows
    async fn checked_call(
        &self,
        api: &str,
        (completed, failed): (&str, &str),
        login_seq_id: &str,
        request: &str,
        result: Result<Value>,
    ) -> Result<Value> {
        let (outcome, logged_response) = match result {
            Ok(response) => {
                let body = response.to_string();
                (ensure_success(api, &response).map(|()| response), body)
            }
            Err(e) => {
                let body = e.to_string();
                (Err(e), body)
            }
        };

        let (level, message) = match &outcome {
            Ok(_) => (LogLevel::Info, completed),
            Err(_) => (LogLevel::Error, failed),
        };
        self.log(level, message, api, login_seq_id)
            .request(request)
            .response(logged_response)
            .write(&self.audit)
            .await;
        outcome
    }

    fn write_env(&self, pairs: &[(String, String)]) {
        if let Some(env_file) = &self.env_file {
            if let Err(e) = env_file.update(pairs) {
                warn!(path = %env_file.path().display(), error = %e, "Failed to update env file");
            }
        }
    }

    fn log(
        &self,
        level: LogLevel,
        message: &str,
        api: &str,
        login_seq_id: &str,
    ) -> ExchangeDraft {
        ExchangeDraft(
            RequestResponseLog::new(level, message, MODULE)
                .api(api)
                .sequence(login_seq_id),
        )
    }
}

/// Exchange log entry under construction
struct ExchangeDraft(RequestResponseLog);

impl ExchangeDraft {
    fn request(self, request: &str) -> Self {
        Self(self.0.request(request))
    }

    fn response(self, response: impl Into<String>) -> Self {
        Self(self.0.response(response))
    }

    async fn write(self, audit: &AuditService) {
        audit.log_exchange(self.0).await;
    }
}

fn static_env_pairs(record: &CredentialRecord, key_id: Option<i64>) -> Vec<(String, String)> {
    vec![
        (ENV_USER_ID.to_string(), record.user_id.clone()),
        (
            ENV_PASSWORD.to_string(),
            record
                .password_ciphertext
                .as_ref()
                .map(|c| c.as_str().to_string())
                .unwrap_or_default(),
        ),
        (
            ENV_PASSWORD_KEY_ID.to_string(),
            key_id.map(|id| id.to_string()).unwrap_or_default(),
        ),
        (
            ENV_API_KEY.to_string(),
            record.api_key.clone().unwrap_or_default(),
        ),
        (
            ENV_API_KEY_TYPE.to_string(),
            record.api_key_type.as_str().to_string(),
        ),
    ]
}

fn session_env_pairs(update: &SessionUpdate, data: Option<&Value>) -> Vec<(String, String)> {
    let last_login = field(data, "login_time")
        .or_else(|| update.last_login_at.map(|t| t.to_rfc3339()))
        .unwrap_or_default();
    [
        (ENV_REQUEST_TOKEN, update.request_token.clone()),
        (ENV_ACCESS_TOKEN, update.access_token.clone()),
        (ENV_CLIENT_CODE, update.client_code.clone()),
        (ENV_RESPONSE_USER_ID, update.response_user_id.clone()),
        (ENV_RESPONSE_USER_NAME, update.response_user_name.clone()),
        (ENV_PUBLIC_TOKEN, update.public_token.clone()),
        (ENV_REFRESH_TOKEN, update.refresh_token.clone()),
        (ENV_ENC_TOKEN, update.enc_token.clone()),
        (ENV_LAST_LOGIN, Some(last_login)),
        (ENV_LAST_LOGOUT, field(data, "logout_time")),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value.unwrap_or_default()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::domain::credentials::ApiKeyType;
    use crate::domain::login::FixedOtp;
    use crate::domain::security::{KeyMaterial, KeyRegistry, KeyResolver, KeyService, SecureString};
    use crate::infrastructure::audit::InMemoryAuditRepository;
    use crate::infrastructure::credentials::InMemoryCredentialRepository;
    use crate::infrastructure::security::InMemoryKeyRegistry;

    /// Scripted broker that records what it was sent
    #[derive(Default)]
    struct ScriptedIssuer {
        fail_login: bool,
        session_response: Option<Value>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedIssuer {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionIssuer for ScriptedIssuer {
        async fn login(&self, user_id: &str, password: &SecureString) -> Result<Value> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("login:{}:{}", user_id, password.as_str()));
            if self.fail_login {
                return Err(Error::BrokerRejected {
                    api: "login".to_string(),
                    reason: "HTTP 401: denied".to_string(),
                });
            }
            Ok(json!({"status": "success", "data": {"cid": "CID9"}}))
        }

        async fn generate_session(
            &self,
            api_key: &str,
            request_token: &str,
            checksum: &str,
        ) -> Result<Value> {
            self.calls.lock().unwrap().push(format!(
                "session:{}:{}:{}",
                api_key, request_token, checksum
            ));
            Ok(self.session_response.clone().unwrap_or_else(|| {
                json!({
                    "status": "success",
                    "data": {
                        "user_id": "U1",
                        "user_name": "Jane Doe",
                        "access_token": "acc",
                        "public_token": "pub",
                        "refresh_token": "ref",
                        "enctoken": "enc"
                    }
                })
            }))
        }

        async fn logout(&self, api_key: &str, access_token: &str) -> Result<Value> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("logout:{}:{}", api_key, access_token));
            Ok(json!({"status": "success", "data": true}))
        }
    }

    struct Fixture {
        audit_repo: Arc<InMemoryAuditRepository>,
        credentials: CredentialService,
        issuer: Arc<ScriptedIssuer>,
        service: SessionService,
    }

    async fn fixture(issuer: ScriptedIssuer) -> Fixture {
        let registry = Arc::new(InMemoryKeyRegistry::new());
        registry.add(&KeyMaterial::generate()).await.unwrap();
        let audit_repo = Arc::new(InMemoryAuditRepository::new());
        let audit = AuditService::new(audit_repo.clone());
        let credentials = CredentialService::new(
            Arc::new(InMemoryCredentialRepository::new()),
            KeyService::new(KeyResolver::registry_only(registry)),
            audit.clone(),
        );
        credentials
            .add_user(
                "AB1234",
                &SecureString::from("hunter2"),
                Some("api-key"),
                ApiKeyType::A,
            )
            .await
            .unwrap();

        let issuer = Arc::new(issuer);
        let service = SessionService::new(credentials.clone(), issuer.clone(), audit)
            .with_api_secret("s3cret");
        Fixture {
            audit_repo,
            credentials,
            issuer,
            service,
        }
    }

    #[tokio::test]
    async fn test_login_persists_session_and_logs_sequence() {
        let fx = fixture(ScriptedIssuer::default()).await;

        let outcome = fx
            .service
            .login("AB1234", &FixedOtp::new(" 123 "))
            .await
            .unwrap();
        assert_eq!(outcome.request_token, "123");
        assert_eq!(outcome.access_token.as_deref(), Some("acc"));

        let calls = fx.issuer.calls();
        assert_eq!(calls[0], "login:AB1234:hunter2");
        assert_eq!(
            calls[1],
            format!(
                "session:api-key:123:{}",
                session_checksum("api-key", "123", "s3cret")
            )
        );

        let record = fx.credentials.get_record("AB1234").await.unwrap();
        assert_eq!(record.session.client_code.as_deref(), Some("CID9"));
        assert_eq!(record.session.response_user_name.as_deref(), Some("Jane Doe"));
        assert_eq!(record.session.enc_token.as_deref(), Some("enc"));
        assert!(record.session.last_login_at.is_some());

        let messages: Vec<String> = fx
            .audit_repo
            .exchanges()
            .unwrap()
            .into_iter()
            .filter(|e| e.login_seq_id.as_deref() == Some(outcome.login_seq_id.as_str()))
            .map(|e| e.message)
            .collect();
        assert_eq!(
            messages,
            vec![
                "Login call completed",
                "Generate session call completed",
                "Login flow completed successfully",
            ]
        );
    }

    #[tokio::test]
    async fn test_logged_requests_never_contain_password() {
        let fx = fixture(ScriptedIssuer::default()).await;
        fx.service
            .login("AB1234", &FixedOtp::new("123"))
            .await
            .unwrap();

        for exchange in fx.audit_repo.exchanges().unwrap() {
            assert!(!exchange.request.unwrap_or_default().contains("hunter2"));
        }
    }

    #[tokio::test]
    async fn test_login_failure_is_logged_and_returned() {
        let fx = fixture(ScriptedIssuer {
            fail_login: true,
            ..Default::default()
        })
        .await;

        let err = fx
            .service
            .login("AB1234", &FixedOtp::new("123"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BrokerRejected { .. }));

        let exchanges = fx.audit_repo.exchanges().unwrap();
        assert_eq!(exchanges.len(), 1);
        assert_eq!(exchanges[0].level, LogLevel::Error);
        assert_eq!(exchanges[0].message, "Login call failed");
        assert_eq!(fx.issuer.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_session_error_member_rejects_login() {
        let fx = fixture(ScriptedIssuer {
            session_response: Some(json!({"status": "success", "error": "Invalid checksum"})),
            ..Default::default()
        })
        .await;

        let err = fx
            .service
            .login("AB1234", &FixedOtp::new("123"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BrokerRejected { ref api, .. } if api == "generate_session"));

        let record = fx.credentials.get_record("AB1234").await.unwrap();
        assert!(!record.session.is_active());
    }

    #[tokio::test]
    async fn test_rejected_session_reply_logged_as_error() {
        let fx = fixture(ScriptedIssuer {
            session_response: Some(json!({"status": "error", "message": "Token expired"})),
            ..Default::default()
        })
        .await;

        let err = fx
            .service
            .login("AB1234", &FixedOtp::new("123"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Token expired"));

        let exchanges = fx.audit_repo.exchanges().unwrap();
        let levels: Vec<(LogLevel, String)> = exchanges
            .iter()
            .map(|e| (e.level, e.message.clone()))
            .collect();
        assert_eq!(
            levels,
            vec![
                (LogLevel::Info, "Login call completed".to_string()),
                (LogLevel::Error, "Generate session failed".to_string()),
            ]
        );
        assert!(exchanges[1]
            .response
            .as_deref()
            .unwrap_or_default()
            .contains("Token expired"));
    }

    #[tokio::test]
    async fn test_login_unknown_user() {
        let fx = fixture(ScriptedIssuer::default()).await;
        let err = fx
            .service
            .login("nobody", &FixedOtp::new("123"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UserNotFound(_)));
        assert!(fx.issuer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_blank_otp_rejected() {
        let fx = fixture(ScriptedIssuer::default()).await;
        let err = fx
            .service
            .login("AB1234", &FixedOtp::new("  "))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_logout_revokes_and_clears() {
        let fx = fixture(ScriptedIssuer::default()).await;
        fx.service
            .login("AB1234", &FixedOtp::new("123"))
            .await
            .unwrap();

        let outcome = fx.service.logout("AB1234").await.unwrap();
        assert!(outcome.broker_notified);
        assert_eq!(fx.issuer.calls().last().unwrap(), "logout:api-key:acc");

        let record = fx.credentials.get_record("AB1234").await.unwrap();
        assert!(!record.session.is_active());
        assert!(record.session.last_logout_at.is_some());

        // A second logout has nothing to revoke
        let again = fx.service.logout("AB1234").await.unwrap();
        assert!(!again.broker_notified);
    }

    #[test]
    fn test_session_env_pairs_cover_session_keys() {
        let update = SessionUpdate {
            access_token: Some("acc".to_string()),
            ..Default::default()
        };
        let pairs = session_env_pairs(&update, None);
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, SESSION_ENV_KEYS);
    }
}
