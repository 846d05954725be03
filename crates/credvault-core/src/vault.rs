//! Service wiring
//!
//! Opens the database and builds the key, credential, audit and session
//! services from one [`Config`].

use std::sync::Arc;

use anyhow::Context;

use crate::config::Config;
use crate::domain::audit::AuditService;
use crate::domain::credentials::CredentialService;
use crate::domain::login::{SessionIssuer, SessionService};
use crate::domain::security::{KeyResolver, KeyService};
use crate::infrastructure::EnvFile;
use crate::infrastructure::audit::SqliteAuditRepository;
use crate::infrastructure::broker::HttpSessionIssuer;
use crate::infrastructure::credentials::SqliteCredentialRepository;
use crate::infrastructure::security::SqliteKeyRegistry;
use crate::storage::{Database, DatabaseConfig};

/// All services over one database
#[derive(Debug, Clone)]
pub struct Vault {
    config: Config,
    database: Database,
    keys: KeyService,
    audit: AuditService,
    credentials: CredentialService,
}

impl Vault {
    /// Open the configured database file and build the services
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let path = config.database_path()?;
        let database = Database::new(
            DatabaseConfig::with_path(&path).max_connections(config.database.max_connections),
        )
        .await
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Self::with_database(config, database)
    }

    /// Build the services over an already opened database
    pub fn with_database(config: Config, database: Database) -> anyhow::Result<Self> {
        let pool = database.pool().clone();
        let fallback = config
            .keys
            .fallback_material()
            .context("Invalid fallback key material")?;

        let resolver = KeyResolver::new(
            Arc::new(SqliteKeyRegistry::new(pool.clone())),
            config.keys.active_key_id,
            fallback,
        );
        let keys = KeyService::new(resolver);
        let audit = AuditService::new(Arc::new(SqliteAuditRepository::new(pool.clone())));
        let credentials = CredentialService::new(
            Arc::new(SqliteCredentialRepository::new(pool)),
            keys.clone(),
            audit.clone(),
        );

        Ok(Self {
            config,
            database,
            keys,
            audit,
            credentials,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn keys(&self) -> &KeyService {
        &self.keys
    }

    pub fn audit(&self) -> &AuditService {
        &self.audit
    }

    pub fn credentials(&self) -> &CredentialService {
        &self.credentials
    }

    /// The env file, when env file updates are enabled
    pub fn env_file(&self) -> Option<EnvFile> {
        self.config
            .env_file
            .enabled
            .then(|| EnvFile::new(&self.config.env_file.path))
    }

    /// Session service over an arbitrary issuer
    pub fn session_service(&self, issuer: Arc<dyn SessionIssuer>) -> SessionService {
        let service = SessionService::new(self.credentials.clone(), issuer, self.audit.clone())
            .with_api_secret(self.config.broker.api_secret());
        match self.env_file() {
            Some(env_file) => service.with_env_file(env_file),
            None => service,
        }
    }

    /// Session service talking to the configured broker over HTTP
    pub fn broker_session_service(&self) -> crate::Result<SessionService> {
        let issuer = HttpSessionIssuer::new(&self.config.broker)?;
        Ok(self.session_service(Arc::new(issuer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::credentials::ApiKeyType;
    use crate::domain::security::{KeyMaterial, SecureString};

    async fn vault(config: Config) -> Vault {
        let database = Database::in_memory().await.unwrap();
        Vault::with_database(config, database).unwrap()
    }

    #[tokio::test]
    async fn test_services_share_one_registry() {
        let vault = vault(Config::default()).await;
        let generated = vault.keys().generate_key().await.unwrap();
        assert_eq!(generated.info.key_id, 1);

        let record = vault
            .credentials()
            .add_user("AB1234", &SecureString::from("pw"), None, ApiKeyType::A)
            .await
            .unwrap();
        assert_eq!(record.password_key_id, Some(1));
    }

    #[tokio::test]
    async fn test_fallback_key_from_config() {
        let mut config = Config::default();
        config.keys.fallback_key = Some(KeyMaterial::generate().to_base64());
        let vault = vault(config).await;

        // No registry keys: the fallback material seals without an id
        let record = vault
            .credentials()
            .add_user("AB1234", &SecureString::from("pw"), None, ApiKeyType::A)
            .await
            .unwrap();
        assert_eq!(record.password_key_id, None);
        assert_eq!(
            vault
                .credentials()
                .decrypt_password("AB1234")
                .await
                .unwrap()
                .as_str(),
            "pw"
        );
    }

    #[tokio::test]
    async fn test_invalid_fallback_key_rejected() {
        let mut config = Config::default();
        config.keys.fallback_key = Some("not-a-key".to_string());
        let database = Database::in_memory().await.unwrap();
        assert!(Vault::with_database(config, database).is_err());
    }

    #[tokio::test]
    async fn test_env_file_toggle() {
        let mut config = Config::default();
        config.env_file.enabled = false;
        assert!(vault(config).await.env_file().is_none());
        assert!(vault(Config::default()).await.env_file().is_some());
    }
}
