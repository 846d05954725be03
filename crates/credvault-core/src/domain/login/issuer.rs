//! Broker session seams
//!
//! The broker speaks opaque JSON. [`SessionIssuer`] passes responses through
//! unchanged and [`ensure_success`] decides whether one counts as a success.

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::security::SecureString;
use crate::error::{Error, Result};

/// External authority that issues and revokes broker sessions
#[async_trait]
pub trait SessionIssuer: Send + Sync {
    /// Password login; triggers the OTP delivery
    async fn login(&self, user_id: &str, password: &SecureString) -> Result<Value>;

    /// Exchange the request token for session tokens
    async fn generate_session(
        &self,
        api_key: &str,
        request_token: &str,
        checksum: &str,
    ) -> Result<Value>;

    async fn logout(&self, api_key: &str, access_token: &str) -> Result<Value>;
}

/// Supplies the one-time request token sent to the user after login
pub trait OtpSource: Send + Sync {
    fn request_token(&self, user_id: &str) -> Result<String>;
}

/// OTP known up front (command-line flag, tests)
#[derive(Debug, Clone)]
pub struct FixedOtp(String);

impl FixedOtp {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl OtpSource for FixedOtp {
    fn request_token(&self, _user_id: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Hex SHA-256 of `api_key || request_token || secret`
pub fn session_checksum(api_key: &str, request_token: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hasher.update(request_token.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fail unless `status` is `"success"` and no `error` member is present
pub fn ensure_success(api: &str, response: &Value) -> Result<()> {
    if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
        return Err(Error::BrokerRejected {
            api: api.to_string(),
            reason: describe(error),
        });
    }

    match response.get("status").and_then(Value::as_str) {
        Some("success") => Ok(()),
        status => {
            let reason = response
                .get("message")
                .map(describe)
                .unwrap_or_else(|| format!("unexpected status {:?}", status.unwrap_or("none")));
            Err(Error::BrokerRejected {
                api: api.to_string(),
                reason,
            })
        }
    }
}

/// String view of a response field; numbers are rendered, anything else is absent
pub(crate) fn field(data: Option<&Value>, name: &str) -> Option<String> {
    match data?.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_checksum_matches_known_digest() {
        // sha256("key" + "123" + "")
        assert_eq!(
            session_checksum("key", "123", ""),
            hex::encode(Sha256::digest(b"key123"))
        );
        assert_ne!(
            session_checksum("key", "123", "secret"),
            session_checksum("key", "123", "")
        );
        assert_eq!(session_checksum("a", "b", "c").len(), 64);
    }

    #[test]
    fn test_ensure_success() {
        assert!(ensure_success("login", &json!({"status": "success", "data": {}})).is_ok());
        assert!(ensure_success("login", &json!({"status": "success", "error": null})).is_ok());

        let err = ensure_success(
            "generate_session",
            &json!({"status": "success", "error": "Invalid checksum"}),
        )
        .unwrap_err();
        match err {
            Error::BrokerRejected { api, reason } => {
                assert_eq!(api, "generate_session");
                assert_eq!(reason, "Invalid checksum");
            }
            other => panic!("expected BrokerRejected, got {:?}", other),
        }

        let err = ensure_success("login", &json!({"status": "error", "message": "Bad password"}))
            .unwrap_err();
        assert!(err.to_string().contains("Bad password"));
        assert!(ensure_success("login", &json!({})).is_err());
    }

    #[test]
    fn test_field_accepts_strings_and_numbers() {
        let data = json!({"cid": "CID1", "user_id": 42, "empty": "", "nested": {}});
        assert_eq!(field(Some(&data), "cid").as_deref(), Some("CID1"));
        assert_eq!(field(Some(&data), "user_id").as_deref(), Some("42"));
        assert_eq!(field(Some(&data), "empty"), None);
        assert_eq!(field(Some(&data), "nested"), None);
        assert_eq!(field(None, "cid"), None);
    }

    #[test]
    fn test_fixed_otp() {
        assert_eq!(FixedOtp::new("123").request_token("u").unwrap(), "123");
    }
}
