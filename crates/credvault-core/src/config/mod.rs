//! Configuration management with file persistence
//!
//! `config.toml` holds non-secret settings. Secrets (fallback key material,
//! broker API secret) are accepted from the environment only, and every
//! environment override is applied in [`Config::apply_env`].

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::domain::security::KeyMaterial;
use crate::storage::DATABASE_FILE;

/// Overrides the config directory
pub const ENV_CONFIG_DIR: &str = "CREDVAULT_CONFIG_DIR";
/// Process-wide active key id
pub const ENV_ACTIVE_KEY_ID: &str = "CREDVAULT_ACTIVE_KEY_ID";
/// Fallback key material (base64 or hex, 32 bytes)
pub const ENV_FALLBACK_KEY: &str = "CREDVAULT_FALLBACK_KEY";
/// Secret mixed into the session checksum
pub const ENV_BROKER_SECRET: &str = "CREDVAULT_BROKER_SECRET";
/// Broker base URL override
pub const ENV_BROKER_URL: &str = "CREDVAULT_BROKER_URL";

const DEFAULT_BROKER_URL: &str = "https://api.mstock.trade/openapi/typea";

/// Credvault configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub keys: KeysConfig,
    pub database: DatabaseSettings,
    pub broker: BrokerConfig,
    pub env_file: EnvFileConfig,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Registry id new encryptions use; the newest key when unset
    pub active_key_id: Option<i64>,
    #[serde(skip)]
    pub fallback_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Database file; `credvault.db` in the config directory when unset
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub base_url: String,
    pub login_path: String,
    pub session_path: String,
    pub logout_path: String,
    pub timeout_secs: u64,
    #[serde(skip)]
    pub api_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvFileConfig {
    /// Rewrite the env file after login and logout
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: crate::storage::database::DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BROKER_URL.to_string(),
            login_path: "/connect/login".to_string(),
            session_path: "/session/token".to_string(),
            logout_path: "/logout".to_string(),
            timeout_secs: 30,
            api_secret: None,
        }
    }
}

impl Default for EnvFileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(".env"),
        }
    }
}

impl std::fmt::Debug for KeysConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeysConfig")
            .field("active_key_id", &self.active_key_id)
            .field("fallback_key", &self.fallback_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("base_url", &self.base_url)
            .field("login_path", &self.login_path)
            .field("session_path", &self.session_path)
            .field("logout_path", &self.logout_path)
            .field("timeout_secs", &self.timeout_secs)
            .field("api_secret", &self.api_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl KeysConfig {
    /// Parse the fallback key, if one was provided
    pub fn fallback_material(&self) -> crate::Result<Option<KeyMaterial>> {
        self.fallback_key
            .as_deref()
            .map(|raw| KeyMaterial::from_base64(raw).or_else(|_| KeyMaterial::from_hex(raw)))
            .transpose()
    }
}

impl BrokerConfig {
    /// Secret for the session checksum; empty when unset
    pub fn api_secret(&self) -> &str {
        self.api_secret.as_deref().unwrap_or_default()
    }
}

/// Keys accepted by `get`, `set` and `list`
const CONFIG_KEYS: &[&str] = &[
    "keys.active_key_id",
    "keys.fallback_key",
    "database.path",
    "database.max_connections",
    "broker.base_url",
    "broker.login_path",
    "broker.session_path",
    "broker.logout_path",
    "broker.timeout_secs",
    "broker.api_secret",
    "env_file.enabled",
    "env_file.path",
];

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(ENV_CONFIG_DIR) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("credvault")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Load configuration and apply process environment overrides
    pub fn load_with_env() -> anyhow::Result<Self> {
        let mut config = Self::load()?;
        config.apply_env(|name| env::var(name).ok())?;
        Ok(config)
    }

    /// Parse a config file body, rejecting secrets written into it
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let raw: toml::Table = toml::from_str(contents)?;
        for (section, key, var) in [
            ("keys", "fallback_key", ENV_FALLBACK_KEY),
            ("broker", "api_secret", ENV_BROKER_SECRET),
        ] {
            let present = raw
                .get(section)
                .and_then(|s| s.as_table())
                .is_some_and(|s| s.contains_key(key));
            if present {
                return Err(anyhow!(
                    "{}.{} must not be stored in the config file. Set {} instead.",
                    section,
                    key,
                    var
                ));
            }
        }

        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(raw) = non_empty(ENV_ACTIVE_KEY_ID) {
            let key_id = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid {} value: {}", ENV_ACTIVE_KEY_ID, raw))?;
            self.keys.active_key_id = Some(key_id);
        }
        if let Some(raw) = non_empty(ENV_FALLBACK_KEY) {
            self.keys.fallback_key = Some(raw.trim().to_string());
        }
        if let Some(secret) = non_empty(ENV_BROKER_SECRET) {
            self.broker.api_secret = Some(secret);
        }
        if let Some(url) = non_empty(ENV_BROKER_URL) {
            self.broker.base_url = url.trim().trim_end_matches('/').to_string();
        }

        self.validate()
    }

    /// Save configuration to file (secrets are never written)
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(key_id) = self.keys.active_key_id {
            if key_id <= 0 {
                return Err(anyhow!("keys.active_key_id must be positive, got {}", key_id));
            }
        }
        if !self.broker.base_url.starts_with("http://")
            && !self.broker.base_url.starts_with("https://")
        {
            return Err(anyhow!(
                "broker.base_url must start with http:// or https://"
            ));
        }
        if self.broker.timeout_secs == 0 {
            return Err(anyhow!("broker.timeout_secs must be greater than zero"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow!("database.max_connections must be greater than zero"));
        }
        Ok(())
    }

    /// Resolved database file path
    pub fn database_path(&self) -> anyhow::Result<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join(DATABASE_FILE)),
        }
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "keys.active_key_id" => Ok(self
                .keys
                .active_key_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "(newest registry key)".to_string())),
            "keys.fallback_key" => Ok(redacted(
                self.keys.fallback_key.as_deref(),
                ENV_FALLBACK_KEY,
            )),

            "database.path" => Ok(self.database_path()?.display().to_string()),
            "database.max_connections" => Ok(self.database.max_connections.to_string()),

            "broker.base_url" => Ok(self.broker.base_url.clone()),
            "broker.login_path" => Ok(self.broker.login_path.clone()),
            "broker.session_path" => Ok(self.broker.session_path.clone()),
            "broker.logout_path" => Ok(self.broker.logout_path.clone()),
            "broker.timeout_secs" => Ok(self.broker.timeout_secs.to_string()),
            "broker.api_secret" => Ok(redacted(
                self.broker.api_secret.as_deref(),
                ENV_BROKER_SECRET,
            )),

            "env_file.enabled" => Ok(self.env_file.enabled.to_string()),
            "env_file.path" => Ok(self.env_file.path.display().to_string()),

            _ => Err(unknown_key(key)),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "keys.active_key_id" => {
                if value.eq_ignore_ascii_case("none") || value.is_empty() {
                    self.keys.active_key_id = None;
                } else {
                    let key_id: i64 = value
                        .parse()
                        .with_context(|| format!("Invalid active_key_id value: {}", value))?;
                    if key_id <= 0 {
                        return Err(anyhow!("active_key_id must be positive"));
                    }
                    self.keys.active_key_id = Some(key_id);
                }
            }

            "database.path" => {
                self.database.path = Some(PathBuf::from(value));
            }
            "database.max_connections" => {
                let max: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_connections value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("max_connections must be greater than zero"));
                }
                self.database.max_connections = max;
            }

            "broker.base_url" => {
                if !value.starts_with("http://") && !value.starts_with("https://") {
                    return Err(anyhow!("Invalid base_url: {}. Must be an http(s) URL", value));
                }
                self.broker.base_url = value.trim_end_matches('/').to_string();
            }
            "broker.login_path" => self.broker.login_path = normalize_path(value)?,
            "broker.session_path" => self.broker.session_path = normalize_path(value)?,
            "broker.logout_path" => self.broker.logout_path = normalize_path(value)?,
            "broker.timeout_secs" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
                if secs == 0 {
                    return Err(anyhow!("timeout_secs must be greater than zero"));
                }
                self.broker.timeout_secs = secs;
            }

            "env_file.enabled" => {
                self.env_file.enabled = value
                    .parse()
                    .with_context(|| format!("Invalid boolean value: {}", value))?;
            }
            "env_file.path" => {
                self.env_file.path = PathBuf::from(value);
            }

            "keys.fallback_key" => {
                return Err(anyhow!(
                    "Key material cannot be stored in configuration. Set the {} environment variable instead.",
                    ENV_FALLBACK_KEY
                ));
            }
            "broker.api_secret" => {
                return Err(anyhow!(
                    "The broker secret cannot be stored in configuration. Set the {} environment variable instead.",
                    ENV_BROKER_SECRET
                ));
            }

            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        CONFIG_KEYS
            .iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn redacted(value: Option<&str>, var: &str) -> String {
    match value {
        Some(_) => "***".to_string(),
        None => format!("(not set - use {} env var)", var),
    }
}

fn normalize_path(value: &str) -> anyhow::Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Endpoint path cannot be empty"));
    }
    if trimmed.starts_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("/{}", trimmed))
    }
}

fn unknown_key(key: &str) -> anyhow::Error {
    anyhow!(
        "Unknown configuration key: {}. Use `credvault config list` to see available keys.",
        key
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.keys.active_key_id, None);
        assert!(config.env_file.enabled);
        assert_eq!(config.broker.api_secret(), "");
    }

    #[test]
    fn test_apply_env_threads_key_settings() {
        let key = KeyMaterial::generate();
        let encoded = key.to_base64();
        let mut config = Config::default();
        config
            .apply_env(env_of(&[
                (ENV_ACTIVE_KEY_ID, "7"),
                (ENV_FALLBACK_KEY, encoded.as_str()),
                (ENV_BROKER_SECRET, "s3cret"),
                (ENV_BROKER_URL, "http://localhost:9000/"),
            ]))
            .unwrap();

        assert_eq!(config.keys.active_key_id, Some(7));
        assert_eq!(config.keys.fallback_material().unwrap(), Some(key));
        assert_eq!(config.broker.api_secret(), "s3cret");
        assert_eq!(config.broker.base_url, "http://localhost:9000");
    }

    #[test]
    fn test_apply_env_ignores_blank_values() {
        let mut config = Config::default();
        config
            .apply_env(env_of(&[(ENV_ACTIVE_KEY_ID, "  "), (ENV_FALLBACK_KEY, "")]))
            .unwrap();
        assert_eq!(config.keys.active_key_id, None);
        assert!(config.keys.fallback_key.is_none());
    }

    #[test]
    fn test_apply_env_rejects_bad_key_id() {
        let mut config = Config::default();
        assert!(config.apply_env(env_of(&[(ENV_ACTIVE_KEY_ID, "seven")])).is_err());
    }

    #[test]
    fn test_fallback_key_accepts_hex() {
        let key = KeyMaterial::from_bytes(&[3u8; 32]).unwrap();
        let hex_key = "03".repeat(32);
        let mut config = Config::default();
        config
            .apply_env(env_of(&[(ENV_FALLBACK_KEY, hex_key.as_str())]))
            .unwrap();
        assert_eq!(config.keys.fallback_material().unwrap(), Some(key));
    }

    #[test]
    fn test_invalid_fallback_key_is_an_error() {
        let mut config = Config::default();
        config
            .apply_env(env_of(&[(ENV_FALLBACK_KEY, "too-short")]))
            .unwrap();
        assert!(config.keys.fallback_material().is_err());
    }

    #[test]
    fn test_secrets_in_file_rejected() {
        let err = Config::from_toml_str("[keys]\nfallback_key = \"abc\"\n").unwrap_err();
        assert!(err.to_string().contains(ENV_FALLBACK_KEY));

        let err = Config::from_toml_str("[broker]\napi_secret = \"abc\"\n").unwrap_err();
        assert!(err.to_string().contains(ENV_BROKER_SECRET));
    }

    #[test]
    fn test_toml_roundtrip_omits_secrets() {
        let mut config = Config::default();
        config.keys.active_key_id = Some(3);
        config.keys.fallback_key = Some("secret-material".to_string());
        config.broker.api_secret = Some("secret".to_string());

        let serialized = toml::to_string_pretty(&config).unwrap();
        assert!(!serialized.contains("secret"));

        let parsed = Config::from_toml_str(&serialized).unwrap();
        assert_eq!(parsed.keys.active_key_id, Some(3));
        assert!(parsed.keys.fallback_key.is_none());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = Config::from_toml_str("[broker]\ntimeout_secs = 5\n").unwrap();
        assert_eq!(config.broker.timeout_secs, 5);
        assert_eq!(config.broker.login_path, "/connect/login");
    }

    #[test]
    fn test_get_set_values() {
        let mut config = Config::default();
        config.set("keys.active_key_id", "4").unwrap();
        assert_eq!(config.get("keys.active_key_id").unwrap(), "4");
        config.set("keys.active_key_id", "none").unwrap();
        assert_eq!(config.keys.active_key_id, None);

        config.set("broker.session_path", "session/token").unwrap();
        assert_eq!(config.get("broker.session_path").unwrap(), "/session/token");

        config.set("env_file.enabled", "false").unwrap();
        assert!(!config.env_file.enabled);
    }

    #[test]
    fn test_set_validation() {
        let mut config = Config::default();
        assert!(config.set("keys.active_key_id", "0").is_err());
        assert!(config.set("broker.base_url", "ftp://x").is_err());
        assert!(config.set("broker.timeout_secs", "0").is_err());
        assert!(config.set("keys.fallback_key", "abc").is_err());
        assert!(config.set("broker.api_secret", "abc").is_err());
        assert!(config.set("nope", "1").is_err());
    }

    #[test]
    fn test_list_redacts_secrets() {
        let mut config = Config::default();
        config.keys.fallback_key = Some("material".to_string());
        config.database.path = Some(PathBuf::from("/tmp/credvault.db"));

        let listed = config.list().unwrap();
        assert_eq!(listed.len(), CONFIG_KEYS.len());
        let fallback = listed
            .iter()
            .find(|(k, _)| k == "keys.fallback_key")
            .unwrap();
        assert_eq!(fallback.1, "***");
        assert!(!format!("{:?}", config).contains("material"));
    }
}
