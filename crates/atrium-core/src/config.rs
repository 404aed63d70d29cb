use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8400;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Session tokens expire after 8 hours.
pub const TOKEN_EXPIRE_HOURS: i64 = 8;
pub const SECRET_KEY_PLACEHOLDER: &str = "change-this-secret-key-in-production";

/// Top-level config (atrium.toml + ATRIUM_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtriumConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub limits: RateLimitConfig,
    /// "development" or "production". Production tightens validation,
    /// enables HSTS, and rejects wildcard origins.
    #[serde(default = "default_env")]
    pub environment: String,
}

impl Default for AtriumConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            security: SecurityConfig::default(),
            provider: ProviderConfig::default(),
            storage: StorageConfig::default(),
            ingestion: IngestionConfig::default(),
            limits: RateLimitConfig::default(),
            environment: default_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite file. Domain tables and vector collections share it.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Process secret. Derives the vault encryption key and signs session
    /// tokens. Must be changed from the placeholder in production.
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
    /// Admin dashboard password. Plaintext is accepted in development;
    /// production expects an argon2 hash (`$argon2` prefix).
    pub admin_password: Option<String>,
    #[serde(default = "default_token_hours")]
    pub token_expire_hours: i64,
    /// Explicit CORS origin list. No wildcards in production.
    #[serde(default = "default_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret_key: default_secret_key(),
            admin_password: None,
            token_expire_hours: default_token_hours(),
            allowed_origins: default_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Bootstrap OpenRouter key used until a vault key is configured.
    pub api_key: Option<String>,
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_provider_base_url(),
            default_model: default_model(),
            embedding_model: default_embedding_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    #[serde(default = "default_max_file_mb")]
    pub max_file_size_mb: u64,
}

impl StorageConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            max_file_size_mb: default_max_file_mb(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Seconds between reaper ticks.
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_seconds: u64,
    /// A file stuck in processing longer than this is reclaimed.
    #[serde(default = "default_stale_minutes")]
    pub stale_processing_minutes: i64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            reaper_interval_seconds: default_reaper_interval(),
            stale_processing_minutes: default_stale_minutes(),
        }
    }
}

/// Per-IP fixed-window request caps. All values are requests per minute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_login_rpm")]
    pub login_per_minute: u32,
    #[serde(default = "default_chat_rpm")]
    pub chat_per_minute: u32,
    #[serde(default = "default_upload_rpm")]
    pub upload_per_minute: u32,
    #[serde(default = "default_settings_rpm")]
    pub settings_per_minute: u32,
    #[serde(default = "default_keys_rpm")]
    pub keys_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            login_per_minute: default_login_rpm(),
            chat_per_minute: default_chat_rpm(),
            upload_per_minute: default_upload_rpm(),
            settings_per_minute: default_settings_rpm(),
            keys_per_minute: default_keys_rpm(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_env() -> String {
    "development".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_secret_key() -> String {
    SECRET_KEY_PLACEHOLDER.to_string()
}
fn default_token_hours() -> i64 {
    TOKEN_EXPIRE_HOURS
}
fn default_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://localhost:3000".to_string(),
    ]
}
fn default_provider_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_model() -> String {
    "anthropic/claude-3.5-sonnet".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_upload_dir() -> String {
    "./data/uploads".to_string()
}
fn default_max_file_mb() -> u64 {
    50
}
fn default_reaper_interval() -> u64 {
    300
}
fn default_stale_minutes() -> i64 {
    15
}
fn default_login_rpm() -> u32 {
    5
}
fn default_chat_rpm() -> u32 {
    30
}
fn default_upload_rpm() -> u32 {
    10
}
fn default_settings_rpm() -> u32 {
    10
}
fn default_keys_rpm() -> u32 {
    10
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.atrium/atrium.db", home)
}
fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.atrium/atrium.toml", home)
}

impl AtriumConfig {
    /// Load config from a TOML file with ATRIUM_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: AtriumConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("ATRIUM_").split("_"))
            .extract()
            .map_err(|e| crate::error::AtriumError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Fail fast on settings that are unsafe for production deployments.
    pub fn validate(&self) -> crate::error::Result<()> {
        if !self.is_production() {
            return Ok(());
        }

        if self.security.secret_key == SECRET_KEY_PLACEHOLDER {
            return Err(crate::error::AtriumError::Config(
                "secret_key must be changed from the default value in production".to_string(),
            ));
        }

        for origin in &self.security.allowed_origins {
            if origin.contains('*') {
                return Err(crate::error::AtriumError::Config(format!(
                    "wildcard CORS origins are not allowed in production: {origin}"
                )));
            }
        }

        match &self.security.admin_password {
            None => tracing::warn!("admin_password is not set; admin login is disabled"),
            Some(p) if !p.starts_with("$argon2") => {
                tracing::warn!("admin_password appears to be plaintext; use an argon2 hash in production");
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_development_safe() {
        let config = AtriumConfig::default();
        assert!(!config.is_production());
        assert!(config.validate().is_ok());
        assert_eq!(config.ingestion.reaper_interval_seconds, 300);
        assert_eq!(config.ingestion.stale_processing_minutes, 15);
        assert_eq!(config.storage.max_file_size_bytes(), 50 * 1024 * 1024);
    }

    #[test]
    fn production_rejects_placeholder_secret() {
        let mut config = AtriumConfig::default();
        config.environment = "production".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn production_rejects_wildcard_origins() {
        let mut config = AtriumConfig::default();
        config.environment = "production".to_string();
        config.security.secret_key = "a-real-secret-with-enough-entropy-0123456789".to_string();
        config.security.allowed_origins = vec!["*".to_string()];
        assert!(config.validate().is_err());
    }
}
