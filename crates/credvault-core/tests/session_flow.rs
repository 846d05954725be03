//! Broker login and logout against a mock broker

use std::fs;

use credvault_core::config::Config;
use credvault_core::domain::credentials::ApiKeyType;
use credvault_core::domain::login::{FixedOtp, session_checksum};
use credvault_core::domain::security::SecureString;
use credvault_core::storage::Database;
use credvault_core::{Error, Vault};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    _dir: TempDir,
    env_path: std::path::PathBuf,
    vault: Vault,
}

async fn harness(server: &MockServer) -> Harness {
    let dir = TempDir::new().unwrap();
    let env_path = dir.path().join(".env");
    fs::write(&env_path, "# broker session\nOTHER=untouched\n").unwrap();

    let mut config = Config::default();
    config.broker.base_url = server.uri();
    config.broker.api_secret = Some("s3cret".to_string());
    config.env_file.path = env_path.clone();

    let vault = Vault::with_database(config, Database::in_memory().await.unwrap()).unwrap();
    vault.keys().generate_key().await.unwrap();
    vault
        .credentials()
        .add_user(
            "AB1234",
            &SecureString::from("hunter2"),
            Some("api-key"),
            ApiKeyType::A,
        )
        .await
        .unwrap();

    Harness {
        _dir: dir,
        env_path,
        vault,
    }
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/connect/login"))
        .and(body_string_contains("username=AB1234"))
        .and(body_string_contains("password=hunter2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": {"cid": "CID1"}
        })))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_session(server: &MockServer) {
    let checksum = session_checksum("api-key", "123", "s3cret");
    Mock::given(method("POST"))
        .and(path("/session/token"))
        .and(body_string_contains(format!("checksum={}", checksum)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": {
                "user_id": "U1",
                "user_name": "Jane",
                "access_token": "acc-token",
                "public_token": "pub-token",
                "refresh_token": "ref-token",
                "enctoken": "enc-token",
                "login_time": "2026-10-16 09:15:00"
            }
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn login_then_logout_round_trip() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_session(&server).await;
    Mock::given(method("GET"))
        .and(path("/logout"))
        .and(header("Authorization", "token api-key:acc-token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "success", "data": true})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server).await;
    let sessions = h.vault.broker_session_service().unwrap();

    let outcome = sessions
        .login("AB1234", &FixedOtp::new("123"))
        .await
        .unwrap();
    assert_eq!(outcome.access_token.as_deref(), Some("acc-token"));
    assert_eq!(outcome.login_seq_id.len(), 20);

    let record = h.vault.credentials().get_record("AB1234").await.unwrap();
    assert_eq!(record.session.client_code.as_deref(), Some("CID1"));
    assert_eq!(record.session.access_token.as_deref(), Some("acc-token"));

    let env = fs::read_to_string(&h.env_path).unwrap();
    assert!(env.starts_with("# broker session\nOTHER=untouched\n"));
    assert!(env.contains("CREDVAULT_ACCESS_TOKEN=acc-token\n"));
    assert!(env.contains("CREDVAULT_CLIENT_CODE=CID1\n"));
    assert!(env.contains("CREDVAULT_LAST_LOGIN='2026-10-16 09:15:00'\n"));
    assert!(env.contains(&format!(
        "CREDVAULT_PASSWORD={}\n",
        record.password_ciphertext.as_ref().unwrap().as_str()
    )));
    assert!(!env.contains("hunter2"));

    let exchanges = h
        .vault
        .audit()
        .exchanges_for_sequence(&outcome.login_seq_id)
        .await
        .unwrap();
    let apis: Vec<_> = exchanges
        .iter()
        .map(|e| e.api_name.as_deref().unwrap_or_default())
        .collect();
    assert_eq!(apis, vec!["login", "generate_session", "login"]);

    let logout = sessions.logout("AB1234").await.unwrap();
    assert!(logout.broker_notified);
    assert_ne!(logout.login_seq_id, outcome.login_seq_id);

    let record = h.vault.credentials().get_record("AB1234").await.unwrap();
    assert!(!record.session.is_active());
    let env = fs::read_to_string(&h.env_path).unwrap();
    assert!(env.contains("CREDVAULT_ACCESS_TOKEN=\n"));
    assert!(env.contains("CREDVAULT_USER_ID=AB1234\n"));
    assert!(env.contains("OTHER=untouched\n"));
}

#[tokio::test]
async fn rejected_session_leaves_store_untouched() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/session/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "failure",
            "error": "Invalid request token"
        })))
        .mount(&server)
        .await;

    let h = harness(&server).await;
    let err = h
        .vault
        .broker_session_service()
        .unwrap()
        .login("AB1234", &FixedOtp::new("999"))
        .await
        .unwrap_err();
    match err {
        Error::BrokerRejected { api, reason } => {
            assert_eq!(api, "generate_session");
            assert_eq!(reason, "Invalid request token");
        }
        other => panic!("expected BrokerRejected, got {:?}", other),
    }

    let record = h.vault.credentials().get_record("AB1234").await.unwrap();
    assert!(record.session.access_token.is_none());
    let env = fs::read_to_string(&h.env_path).unwrap();
    assert!(!env.contains("CREDVAULT_ACCESS_TOKEN"));
}

#[tokio::test]
async fn broker_http_error_is_logged_as_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/login"))
        .respond_with(ResponseTemplate::new(500).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let h = harness(&server).await;
    let err = h
        .vault
        .broker_session_service()
        .unwrap()
        .login("AB1234", &FixedOtp::new("123"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("HTTP 500: maintenance"));
}
