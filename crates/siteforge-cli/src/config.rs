//! Configuration for the siteforge CLI
//!
//! Loaded from YAML (or TOML when the file ends in `.toml`), then overridden by
//! `SITEFORGE_*` environment variables.
//!
//! ```yaml
//! data_dir: ~/.siteforge
//! resolver:
//!   suffixes: [sites.example.com]
//!   cache_ttl_secs: 5
//! registry:
//!   provision_attempts: 3
//!   backoff_ms: 50
//! store:
//!   max_connections: 5
//! logging:
//!   level: info
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use siteforge_store_sqlite::SqliteStoreConfig;
use siteforge_tenancy::{RegistryConfig, ResolverConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteforgeConfig {
    /// Root for `directory.db` and `tenants/<tenant-id>.db`
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default)]
    pub resolver: ResolverSettings,

    #[serde(default)]
    pub registry: RegistrySettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverSettings {
    #[serde(default)]
    pub suffixes: Vec<String>,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    #[serde(default = "default_provision_attempts")]
    pub provision_attempts: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default = "default_false")]
    pub json: bool,

    #[serde(default = "default_false")]
    pub log_sql_queries: bool,
}

impl Default for SiteforgeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            resolver: ResolverSettings::default(),
            registry: RegistrySettings::default(),
            store: StoreSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            suffixes: Vec::new(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            provision_attempts: default_provision_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            log_sql_queries: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    FileRead(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid config: {0}")]
    ValidationError(String),
}

impl SiteforgeConfig {
    /// Load configuration from a YAML or TOML file. `~` is expanded.
    ///
    /// # Errors
    /// - `ConfigError::FileRead` if the file cannot be read
    /// - `ConfigError::ParseError` for invalid YAML/TOML
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let expanded_path = shellexpand::tilde(path);
        let path = PathBuf::from(expanded_path.as_ref());

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            ConfigError::FileRead(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(format!("YAML parse error: {}", e)))?
        };

        Ok(config)
    }

    /// Location checked when no `--config` is given: `~/.siteforge/config.yaml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".siteforge").join("config.yaml"))
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        if let Ok(val) = std::env::var("SITEFORGE_DATA_DIR") {
            self.data_dir = val;
        }

        if let Ok(val) = std::env::var("SITEFORGE_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Ok(val) = std::env::var("SITEFORGE_CACHE_TTL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => self.resolver.cache_ttl_secs = secs,
                Err(_) => eprintln!(
                    "Warning: Invalid SITEFORGE_CACHE_TTL_SECS '{}', using {}",
                    val, self.resolver.cache_ttl_secs
                ),
            }
        }
    }

    /// # Errors
    /// - `ConfigError::ValidationError` for zero provisioning attempts or
    ///   connections, or an empty resolver suffix
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "data_dir must not be empty".to_string(),
            ));
        }
        if self.registry.provision_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "registry.provision_attempts must be at least 1".to_string(),
            ));
        }
        if self.store.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "store.max_connections must be at least 1".to_string(),
            ));
        }
        if let Some(index) = self
            .resolver
            .suffixes
            .iter()
            .position(|s| s.trim().trim_matches('.').is_empty())
        {
            return Err(ConfigError::ValidationError(format!(
                "resolver.suffixes[{}] is empty",
                index
            )));
        }
        Ok(())
    }

    /// Data directory with `~` expanded.
    pub fn expanded_data_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).as_ref())
    }

    pub fn directory_db_path(&self) -> PathBuf {
        directory_db_path(&self.expanded_data_dir())
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            suffixes: self.resolver.suffixes.clone(),
            cache_ttl: Duration::from_secs(self.resolver.cache_ttl_secs),
            cache_capacity: self.resolver.cache_capacity,
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::default()
            .with_provision_attempts(self.registry.provision_attempts)
            .with_backoff(Duration::from_millis(self.registry.backoff_ms))
    }

    pub fn store_config(&self) -> SqliteStoreConfig {
        SqliteStoreConfig::default()
            .with_max_connections(self.store.max_connections)
            .with_busy_timeout(Duration::from_millis(self.store.busy_timeout_ms))
            .with_acquire_timeout(Duration::from_secs(self.store.acquire_timeout_secs))
    }
}

fn directory_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("directory.db")
}

fn default_data_dir() -> String {
    "~/.siteforge".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    5
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_provision_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    50
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_false() -> bool {
    false
}
