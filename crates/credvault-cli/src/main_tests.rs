//! CLI argument parsing tests

use clap::Parser;

use crate::{Cli, Commands, KeyAction, LogAction, OutputFormat, UserAction};
use credvault_core::domain::credentials::ApiKeyType;

#[test]
fn test_users_add_parses_key_type() {
    let cli = Cli::try_parse_from([
        "credvault",
        "users",
        "add",
        "AB1234",
        "--api-key",
        "k",
        "--api-key-type",
        "b",
        "--password-stdin",
    ])
    .unwrap();

    match cli.command {
        Commands::Users {
            action:
                UserAction::Add {
                    user_id,
                    api_key,
                    api_key_type,
                    password_stdin,
                },
        } => {
            assert_eq!(user_id, "AB1234");
            assert_eq!(api_key.as_deref(), Some("k"));
            assert_eq!(api_key_type, ApiKeyType::B);
            assert!(password_stdin);
        }
        _ => panic!("expected users add"),
    }
}

#[test]
fn test_invalid_key_type_rejected() {
    assert!(
        Cli::try_parse_from(["credvault", "users", "add", "u", "--api-key-type", "C"]).is_err()
    );
}

#[test]
fn test_update_password_flags_conflict() {
    assert!(
        Cli::try_parse_from([
            "credvault",
            "users",
            "update",
            "u",
            "--password",
            "--password-stdin"
        ])
        .is_err()
    );
}

#[test]
fn test_login_user_is_optional() {
    let cli = Cli::try_parse_from(["credvault", "login", "--otp", "123456"]).unwrap();
    match cli.command {
        Commands::Login { user_id, otp } => {
            assert!(user_id.is_none());
            assert_eq!(otp.as_deref(), Some("123456"));
        }
        _ => panic!("expected login"),
    }
}

#[test]
fn test_global_format_flag() {
    let cli = Cli::try_parse_from(["credvault", "keys", "list", "--format", "json"]).unwrap();
    assert!(cli.format == OutputFormat::Json);
    assert!(matches!(
        cli.command,
        Commands::Keys {
            action: KeyAction::List
        }
    ));
}

#[test]
fn test_logs_events_default_limit() {
    let cli = Cli::try_parse_from(["credvault", "logs", "events"]).unwrap();
    match cli.command {
        Commands::Logs {
            action: LogAction::Events { limit },
        } => assert_eq!(limit, 20),
        _ => panic!("expected logs events"),
    }
}

#[test]
fn test_cli_definition_is_consistent() {
    use clap::CommandFactory;
    Cli::command().debug_assert();
}
