//! Credvault CLI - encrypted broker credential vault

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use credvault_core::config::Config;
use credvault_core::domain::audit::{LogLevel, RequestResponseLog};
use credvault_core::domain::credentials::{
    ApiKeyType, CredentialRecord, CredentialUpdate, RewrapOutcome,
};
use credvault_core::domain::login::{FixedOtp, OtpSource};
use credvault_core::domain::security::SecureString;
use credvault_core::infrastructure::EnvFile;
use credvault_core::{Error, Vault};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::json;
use tracing::{debug, warn};

#[cfg(test)]
mod main_tests;

#[derive(Parser)]
#[command(name = "credvault")]
#[command(author, version, about = "Encrypted broker credential vault", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage encryption keys
    Keys {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Manage stored user credentials
    Users {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Log in to the broker and store the session
    Login {
        /// User ID (defaults to the most recently updated user)
        user_id: Option<String>,
        /// Request token / OTP (prompted when omitted)
        #[arg(long)]
        otp: Option<String>,
    },

    /// Log out of the broker and clear the stored session
    Logout {
        /// User ID (defaults to the most recently updated user)
        user_id: Option<String>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Inspect the audit log
    Logs {
        #[command(subcommand)]
        action: LogAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Check system health
    Doctor,
}

#[derive(Subcommand)]
enum KeyAction {
    /// Generate a new key and append it to the registry
    Generate {
        /// Also write the key id and material into the env file
        #[arg(long)]
        write_env: bool,
    },
    /// List registry keys (fingerprints only)
    List,
    /// Show which key new encryptions use
    Active,
}

#[derive(Subcommand)]
enum UserAction {
    /// Add a user
    Add {
        user_id: String,
        /// Broker API key
        #[arg(long)]
        api_key: Option<String>,
        /// API key type (A or B)
        #[arg(long, default_value = "A")]
        api_key_type: ApiKeyType,
        /// Read the password from stdin instead of prompting
        #[arg(long)]
        password_stdin: bool,
    },
    /// Update a user; omitted fields keep their values
    Update {
        user_id: String,
        /// Prompt for a new password
        #[arg(long)]
        password: bool,
        /// Read the new password from stdin
        #[arg(long, conflicts_with = "password")]
        password_stdin: bool,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        api_key_type: Option<ApiKeyType>,
    },
    /// Delete a user
    Delete {
        user_id: String,
        /// Confirm deletion
        #[arg(short, long)]
        force: bool,
    },
    /// List users
    List,
    /// Show one user
    Show {
        user_id: String,
        /// Print the decrypted password
        #[arg(long)]
        reveal: bool,
    },
    /// Re-encrypt passwords under the active key
    Rewrap {
        /// Only this user (all users when omitted)
        user_id: Option<String>,
    },
}

#[derive(Subcommand)]
enum LogAction {
    /// Recent audit events
    Events {
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// Broker exchanges of one login sequence
    Sequence { login_seq_id: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("credvault=info".parse()?)
                .add_directive("credvault_core=info".parse()?),
        )
        .init();

    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "Loaded env file"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Could not load env file"),
    }

    let cli = Cli::parse();
    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Keys { action } => cmd_keys(&open_vault().await?, action, out).await,
        Commands::Users { action } => cmd_users(&open_vault().await?, action, out).await,
        Commands::Login { user_id, otp } => {
            cmd_login(&open_vault().await?, user_id, otp, out).await
        }
        Commands::Logout { user_id, yes } => {
            cmd_logout(&open_vault().await?, user_id, yes, out).await
        }
        Commands::Logs { action } => cmd_logs(&open_vault().await?, action, out).await,
        Commands::Config { action } => cmd_config(action, out.quiet),
        Commands::Doctor => cmd_doctor(out.quiet).await,
    }
}

async fn open_vault() -> anyhow::Result<Vault> {
    Vault::open(Config::load_with_env()?).await
}

#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    fn print_json(&self, value: &serde_json::Value) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    fn note(&self, message: &str) {
        if !self.quiet && !self.json() {
            println!("{}", message);
        }
    }
}

// ============================================================================
// Prompts
// ============================================================================

fn prompt_line(prompt: &str) -> credvault_core::Result<String> {
    let mut editor = DefaultEditor::new().map_err(|e| Error::Other(e.to_string()))?;
    match editor.readline(prompt) {
        Ok(line) => Ok(line.trim().to_string()),
        Err(ReadlineError::Interrupted | ReadlineError::Eof) => Err(Error::UserCancelled),
        Err(e) => Err(Error::Other(e.to_string())),
    }
}

fn confirm(prompt: &str) -> credvault_core::Result<bool> {
    let answer = prompt_line(&format!("{} (y/n): ", prompt))?;
    Ok(matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn read_password(from_stdin: bool) -> anyhow::Result<SecureString> {
    let password = if from_stdin {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        line.trim_end_matches(['\r', '\n']).to_string()
    } else {
        prompt_line("Password: ")?
    };
    if password.is_empty() {
        return Err(Error::InvalidInput("password cannot be empty".to_string()).into());
    }
    Ok(SecureString::new(password))
}

/// Asks for the request token on the terminal
struct PromptOtp;

impl OtpSource for PromptOtp {
    fn request_token(&self, user_id: &str) -> credvault_core::Result<String> {
        prompt_line(&format!("Enter OTP (request token) for {}: ", user_id))
    }
}

/// Explicit user id, or the most recently updated one
async fn resolve_user(vault: &Vault, user_id: Option<String>) -> anyhow::Result<String> {
    if let Some(user_id) = user_id {
        return Ok(user_id);
    }
    match vault.credentials().latest_credential().await? {
        Some(record) => Ok(record.user_id),
        None => Err(anyhow::anyhow!(
            "No users stored. Add one with `credvault users add <user-id>`."
        )),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_keys(vault: &Vault, action: KeyAction, out: Output) -> anyhow::Result<()> {
    let keys = vault.keys();
    match action {
        KeyAction::Generate { write_env } => {
            let generated = keys.generate_key().await?;
            let env_written = if write_env {
                let env_file = EnvFile::new(&vault.config().env_file.path);
                env_file.update(&generated.env_entries())?
            } else {
                false
            };

            if out.json() {
                out.print_json(&json!({ "key": generated.info, "env_written": env_written }))?;
            } else if !out.quiet {
                println!("Generated key {}", generated.info.key_id);
                println!("  Fingerprint: {}", generated.info.fingerprint);
                if write_env && !env_written {
                    println!(
                        "  Env file {} not found; nothing written.",
                        vault.config().env_file.path.display()
                    );
                } else if env_written {
                    println!(
                        "  Wrote key id and fallback key to {}",
                        vault.config().env_file.path.display()
                    );
                }
            }
        }
        KeyAction::List => {
            let infos = keys.list_keys().await?;
            if out.json() {
                out.print_json(&serde_json::to_value(&infos)?)?;
            } else if infos.is_empty() {
                out.note("No keys in the registry.\n\nCreate one with: credvault keys generate");
            } else {
                out.note("Keys (newest first):");
                for info in infos {
                    println!(
                        "  {:>4}  {}  {}",
                        info.key_id,
                        info.fingerprint,
                        info.created_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }
        KeyAction::Active => {
            let active = keys.active_key().await?;
            if out.json() {
                out.print_json(&serde_json::to_value(&active)?)?;
            } else {
                match active.key_id {
                    Some(key_id) => println!(
                        "Active key: {} ({}, {})",
                        key_id, active.source, active.fingerprint
                    ),
                    None => println!(
                        "Active key: fallback material ({}, no registry id)",
                        active.fingerprint
                    ),
                }
            }
        }
    }
    Ok(())
}

async fn cmd_users(vault: &Vault, action: UserAction, out: Output) -> anyhow::Result<()> {
    let credentials = vault.credentials();
    match action {
        UserAction::Add {
            user_id,
            api_key,
            api_key_type,
            password_stdin,
        } => {
            let password = read_password(password_stdin)?;
            let record = credentials
                .add_user(&user_id, &password, api_key.as_deref(), api_key_type)
                .await?;
            if out.json() {
                out.print_json(&serde_json::to_value(record.summary())?)?;
            } else {
                out.note(&format!(
                    "User '{}' added (key {}).",
                    record.user_id,
                    describe_key(record.password_key_id)
                ));
            }
        }
        UserAction::Update {
            user_id,
            password,
            password_stdin,
            api_key,
            api_key_type,
        } => {
            let password = if password || password_stdin {
                Some(read_password(password_stdin)?)
            } else {
                None
            };
            let record = credentials
                .update_user(
                    &user_id,
                    CredentialUpdate {
                        password,
                        api_key,
                        api_key_type,
                    },
                )
                .await?;
            if out.json() {
                out.print_json(&serde_json::to_value(record.summary())?)?;
            } else {
                out.note(&format!("User '{}' updated.", record.user_id));
            }
        }
        UserAction::Delete { user_id, force } => {
            if !force {
                out.note(&format!(
                    "Warning: This will permanently delete user '{}'.\nUse --force to confirm deletion.",
                    user_id
                ));
                return Ok(());
            }
            credentials.delete_user(&user_id).await?;
            out.note(&format!("User '{}' deleted.", user_id));
        }
        UserAction::List => {
            let records = credentials.list_users().await?;
            if out.json() {
                let summaries: Vec<_> = records.iter().map(CredentialRecord::summary).collect();
                out.print_json(&serde_json::to_value(summaries)?)?;
            } else if records.is_empty() {
                out.note("No users found.\n\nAdd one with: credvault users add <user-id>");
            } else {
                out.note("Users:");
                for record in records {
                    let session = if record.session.is_active() {
                        " [session active]"
                    } else {
                        ""
                    };
                    println!(
                        "  {} (type {}, key {}){}",
                        record.user_id,
                        record.api_key_type,
                        describe_key(record.password_key_id),
                        session
                    );
                }
            }
        }
        UserAction::Show { user_id, reveal } => {
            let user = credentials.get_user(&user_id).await?;
            let summary = user.record.summary();
            if out.json() {
                let mut value = serde_json::to_value(&summary)?;
                value["password_readable"] = json!(user.password.is_some());
                if reveal {
                    value["password"] = json!(user.password.as_ref().map(|p| p.as_str()));
                }
                out.print_json(&value)?;
                return Ok(());
            }

            println!("User: {}", summary.user_id);
            println!("  API key: {}", if summary.has_api_key { "set" } else { "not set" });
            println!("  API key type: {}", summary.api_key_type);
            println!("  Password key: {}", describe_key(summary.password_key_id));
            match (&user.password, reveal) {
                (Some(password), true) => println!("  Password: {}", password.as_str()),
                (Some(_), false) => println!("  Password: readable"),
                (None, _) => println!("  Password: UNREADABLE (no known key)"),
            }
            if let Some(code) = &summary.client_code {
                println!("  Client code: {}", code);
            }
            if let Some(name) = &summary.response_user_name {
                println!("  Broker name: {}", name);
            }
            println!(
                "  Session: {}",
                if summary.session_active { "active" } else { "none" }
            );
            if let Some(at) = summary.last_login_at {
                println!("  Last login: {}", at.format("%Y-%m-%d %H:%M:%S"));
            }
            if let Some(at) = summary.last_logout_at {
                println!("  Last logout: {}", at.format("%Y-%m-%d %H:%M:%S"));
            }
            println!("  Updated: {}", summary.updated_at.format("%Y-%m-%d %H:%M:%S"));
        }
        UserAction::Rewrap { user_id } => match user_id {
            Some(user_id) => {
                let outcome = credentials.rewrap_user(&user_id).await?;
                if out.json() {
                    out.print_json(&serde_json::to_value(&outcome)?)?;
                } else {
                    let message = match outcome {
                        RewrapOutcome::Rewrapped {
                            from_key_id,
                            to_key_id,
                        } => format!(
                            "{}: rewrapped from key {} to key {}",
                            user_id,
                            describe_key(from_key_id),
                            describe_key(to_key_id)
                        ),
                        RewrapOutcome::Current => format!("{}: already under the active key", user_id),
                        RewrapOutcome::NoPassword => format!("{}: no password stored", user_id),
                    };
                    out.note(&message);
                }
            }
            None => {
                let report = credentials.rewrap_all().await?;
                if out.json() {
                    out.print_json(&serde_json::to_value(&report)?)?;
                } else if !out.quiet {
                    println!("Rewrapped: {}", report.rewrapped.len());
                    println!("Already current: {}", report.current.len());
                    println!("Without password: {}", report.no_password.len());
                    if !report.unrecoverable.is_empty() {
                        println!(
                            "Unrecoverable (left untouched): {}",
                            report.unrecoverable.join(", ")
                        );
                    }
                }
            }
        },
    }
    Ok(())
}

async fn cmd_login(
    vault: &Vault,
    user_id: Option<String>,
    otp: Option<String>,
    out: Output,
) -> anyhow::Result<()> {
    let user_id = match user_id {
        Some(user_id) => user_id,
        None => resolve_user(vault, None).await?,
    };
    let sessions = vault.broker_session_service()?;

    out.note(&format!("Logging in {}...", user_id));
    let outcome = match otp {
        Some(otp) => sessions.login(&user_id, &FixedOtp::new(otp)).await?,
        None => sessions.login(&user_id, &PromptOtp).await?,
    };

    if out.json() {
        out.print_json(&serde_json::to_value(&outcome)?)?;
    } else if !out.quiet {
        println!("Login successful");
        println!("  Request token: {}", outcome.request_token);
        println!(
            "  Access token: {}",
            if outcome.access_token.is_some() { "stored" } else { "not returned" }
        );
        println!("  Login seq id: {}", outcome.login_seq_id);
    }
    Ok(())
}

async fn cmd_logout(
    vault: &Vault,
    user_id: Option<String>,
    yes: bool,
    out: Output,
) -> anyhow::Result<()> {
    let user_id = resolve_user(vault, user_id).await?;

    if !yes && !confirm(&format!("Log out {}?", user_id))? {
        vault
            .audit()
            .log_exchange(
                RequestResponseLog::new(LogLevel::Info, "Logout cancelled by user", "session")
                    .request(json!({ "user_id": user_id }).to_string())
                    .response("{}")
                    .api("logout"),
            )
            .await;
        out.note("Logout cancelled.");
        return Ok(());
    }

    let outcome = vault.broker_session_service()?.logout(&user_id).await?;
    if out.json() {
        out.print_json(&serde_json::to_value(&outcome)?)?;
    } else if !out.quiet {
        println!("Logout successful");
        if !outcome.broker_notified {
            println!("  (no stored session; broker not contacted)");
        }
        println!("  Login seq id: {}", outcome.login_seq_id);
    }
    Ok(())
}

async fn cmd_logs(vault: &Vault, action: LogAction, out: Output) -> anyhow::Result<()> {
    match action {
        LogAction::Events { limit } => {
            let events = vault.audit().recent_events(limit).await?;
            if out.json() {
                out.print_json(&serde_json::to_value(&events)?)?;
            } else if events.is_empty() {
                out.note("No events recorded.");
            } else {
                for event in events {
                    println!(
                        "{}  {:<5}  [{}] {}",
                        event.created_at.format("%Y-%m-%d %H:%M:%S"),
                        event.level.as_str(),
                        event.module,
                        event.message
                    );
                }
            }
        }
        LogAction::Sequence { login_seq_id } => {
            let exchanges = vault.audit().exchanges_for_sequence(&login_seq_id).await?;
            if out.json() {
                out.print_json(&serde_json::to_value(&exchanges)?)?;
            } else if exchanges.is_empty() {
                out.note(&format!("No exchanges for sequence {}.", login_seq_id));
            } else {
                for exchange in exchanges {
                    println!(
                        "{}  {:<5}  {:<16} {}",
                        exchange.created_at.format("%Y-%m-%d %H:%M:%S"),
                        exchange.level.as_str(),
                        exchange.api_name.as_deref().unwrap_or("-"),
                        exchange.message
                    );
                }
            }
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load_with_env()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load_with_env()?;
            let items = config.list()?;
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("Credvault Health Check");
        println!("======================");
        println!();
    }

    let mut all_ok = true;

    let config = match Config::load_with_env() {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
            }
            config
        }
        Err(e) => {
            if !quiet {
                println!("[!!] Configuration: Error - {}", e);
                println!();
                println!("Some checks failed. See above for details.");
            }
            return Ok(());
        }
    };

    if !quiet {
        match Config::config_path() {
            Ok(path) if path.exists() => println!("[OK] Config file: {}", path.display()),
            Ok(path) => println!("[--] Config file: {} (using defaults)", path.display()),
            Err(e) => println!("[!!] Config file: Error - {}", e),
        }
    }

    match config.keys.fallback_material() {
        Ok(Some(_)) => {
            if !quiet {
                println!("[OK] Fallback key: Configured");
            }
        }
        Ok(None) => {
            if !quiet {
                println!("[--] Fallback key: Not set");
            }
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Fallback key: {}", e);
            }
        }
    }

    if !quiet {
        if config.broker.api_secret.is_some() {
            println!("[OK] Broker secret: Configured");
        } else {
            println!("[--] Broker secret: Not set (checksum uses an empty secret)");
        }
    }

    match Vault::open(config.clone()).await {
        Ok(vault) => {
            let db = vault.database();
            match db.health_check().await {
                Ok(()) => {
                    if !quiet {
                        println!("[OK] Database: Connected");
                        println!("     Path: {}", db.path().display());
                    }
                    match db.migration_status().await {
                        Ok(status) if status.needs_migration => {
                            all_ok = false;
                            if !quiet {
                                println!(
                                    "[!!] Database: Migrations pending (v{} -> v{})",
                                    status.current_version, status.target_version
                                );
                            }
                        }
                        Ok(status) => {
                            if !quiet {
                                println!("[OK] Database: Schema v{}", status.current_version);
                            }
                        }
                        Err(e) => {
                            all_ok = false;
                            if !quiet {
                                println!("[!!] Database: Migration check failed - {}", e);
                            }
                        }
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Database: Health check failed - {}", e);
                    }
                }
            }

            match vault.keys().active_key().await {
                Ok(active) => {
                    if !quiet {
                        println!(
                            "[OK] Active key: {} ({})",
                            describe_key(active.key_id),
                            active.source
                        );
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Active key: {}", e);
                        if let Some(suggestion) = e.suggestion() {
                            println!("     Run `{}`", suggestion);
                        }
                    }
                }
            }

            if !quiet {
                let users = vault.credentials().list_users().await.unwrap_or_default();
                println!("     Users: {}", users.len());
            }
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Database: Failed to initialize - {}", e);
            }
        }
    }

    if !quiet {
        let env_path: PathBuf = config.env_file.path.clone();
        if !config.env_file.enabled {
            println!("[--] Env file: Updates disabled");
        } else if env_path.exists() {
            println!("[OK] Env file: {}", env_path.display());
        } else {
            println!("[--] Env file: {} (not found; will not be created)", env_path.display());
        }
    }

    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed!");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }

    Ok(())
}

fn describe_key(key_id: Option<i64>) -> String {
    match key_id {
        Some(id) => id.to_string(),
        None => "fallback".to_string(),
    }
}
