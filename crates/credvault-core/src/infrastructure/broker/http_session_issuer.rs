//! HTTP session issuer
//!
//! Talks to the broker's Type A REST API: form-encoded posts for login and
//! session generation, an authorized GET for logout. Responses are returned
//! as parsed JSON without interpretation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::BrokerConfig;
use crate::domain::login::SessionIssuer;
use crate::domain::security::SecureString;
use crate::error::{Error, Result};

/// API version header every broker call carries
const VERSION_HEADER: &str = "X-Mirae-Version";
const VERSION: &str = "1";

#[derive(Clone)]
pub struct HttpSessionIssuer {
    http_client: HttpClient,
    base_url: String,
    login_path: String,
    session_path: String,
    logout_path: String,
}

impl std::fmt::Debug for HttpSessionIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSessionIssuer")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpSessionIssuer {
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            login_path: config.login_path.clone(),
            session_path: config.session_path.clone(),
            logout_path: config.logout_path.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_form(&self, api: &str, path: &str, form: &[(&str, &str)]) -> Result<Value> {
        let url = self.url(path);
        debug!(api, url = %url, "Sending broker request");

        let response = self
            .http_client
            .post(&url)
            .header(VERSION_HEADER, VERSION)
            .form(form)
            .send()
            .await
            .map_err(Error::NetworkError)?;

        read_json(api, response).await
    }
}

#[async_trait]
impl SessionIssuer for HttpSessionIssuer {
    async fn login(&self, user_id: &str, password: &SecureString) -> Result<Value> {
        self.post_form(
            "login",
            &self.login_path,
            &[("username", user_id), ("password", password.as_str())],
        )
        .await
    }

    async fn generate_session(
        &self,
        api_key: &str,
        request_token: &str,
        checksum: &str,
    ) -> Result<Value> {
        self.post_form(
            "generate_session",
            &self.session_path,
            &[
                ("api_key", api_key),
                ("request_token", request_token),
                ("checksum", checksum),
            ],
        )
        .await
    }

    async fn logout(&self, api_key: &str, access_token: &str) -> Result<Value> {
        let url = self.url(&self.logout_path);
        debug!(api = "logout", url = %url, "Sending broker request");

        let response = self
            .http_client
            .get(&url)
            .header(VERSION_HEADER, VERSION)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("token {}:{}", api_key, access_token),
            )
            .send()
            .await
            .map_err(Error::NetworkError)?;

        read_json("logout", response).await
    }
}

async fn read_json(api: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.map_err(Error::NetworkError)?;

    if !status.is_success() {
        warn!(api, status = status.as_u16(), "Broker returned an error status");
        return Err(Error::BrokerRejected {
            api: api.to_string(),
            reason: format!("HTTP {}: {}", status.as_u16(), body),
        });
    }

    serde_json::from_str(&body).map_err(|e| Error::BrokerRejected {
        api: api.to_string(),
        reason: format!("invalid JSON response: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn issuer(server: &MockServer) -> HttpSessionIssuer {
        let config = BrokerConfig {
            base_url: server.uri(),
            timeout_secs: 5,
            ..Default::default()
        };
        HttpSessionIssuer::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_login_posts_form_with_version_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connect/login"))
            .and(header("X-Mirae-Version", "1"))
            .and(body_string_contains("username=AB1234"))
            .and(body_string_contains("password=p%40ss"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "success", "data": {"cid": "CID1"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = issuer(&server)
            .login("AB1234", &SecureString::from("p@ss"))
            .await
            .unwrap();
        assert_eq!(response["data"]["cid"], "CID1");
    }

    #[tokio::test]
    async fn test_generate_session_sends_checksum() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session/token"))
            .and(body_string_contains("api_key=key"))
            .and(body_string_contains("request_token=123"))
            .and(body_string_contains("checksum=abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "success", "data": {"access_token": "tok"}})),
            )
            .mount(&server)
            .await;

        let response = issuer(&server)
            .generate_session("key", "123", "abc")
            .await
            .unwrap();
        assert_eq!(response["data"]["access_token"], "tok");
    }

    #[tokio::test]
    async fn test_logout_uses_token_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/logout"))
            .and(header("Authorization", "token key:tok"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "success", "data": true})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = issuer(&server).logout("key", "tok").await.unwrap();
        assert_eq!(response["status"], "success");
    }

    #[tokio::test]
    async fn test_http_error_is_broker_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connect/login"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
            .mount(&server)
            .await;

        let err = issuer(&server)
            .login("AB1234", &SecureString::from("wrong"))
            .await
            .unwrap_err();
        match err {
            Error::BrokerRejected { api, reason } => {
                assert_eq!(api, "login");
                assert_eq!(reason, "HTTP 401: invalid credentials");
            }
            other => panic!("expected BrokerRejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_json_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = issuer(&server)
            .generate_session("key", "123", "abc")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BrokerRejected { .. }));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = BrokerConfig {
            base_url: "https://broker.example/api/".to_string(),
            ..Default::default()
        };
        let issuer = HttpSessionIssuer::new(&config).unwrap();
        assert_eq!(issuer.url("/logout"), "https://broker.example/api/logout");
    }
}
