//! Run configuration, read from a TOML file. Every section has defaults, so an
//! empty file (or no file at all) is a valid configuration apart from the API key.

use crate::aemet::endpoints::DEFAULT_BASE_URL;
use crate::fetch::retry::{
    RetryPolicy, DEFAULT_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_AFTER_FLOOR,
};
use crate::fetch::transport::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
use crate::pipeline::orchestrator::DEFAULT_INTER_ENTITY_DELAY;
use crate::store::repository::ConflictPolicy;
use log::debug;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const API_KEY_ENV: &str = "AEMET_API_KEY";
const CONFIG_DIR_NAME: &str = "aemet_etl";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{0}'")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("No API key: set {API_KEY_ENV}, api.api_key or api.api_key_file")]
    MissingApiKey,

    #[error("Failed to read API key file '{0}'")]
    ApiKeyFile(PathBuf, #[source] std::io::Error),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub retry: RetryConfig,
    pub run: RunConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_key_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            api_key_file: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            read_timeout_secs: DEFAULT_READ_TIMEOUT.as_secs(),
        }
    }
}

impl ApiConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// First non-empty of `env_value`, `api_key`, then the trimmed contents of `api_key_file`.
    pub fn resolve_api_key(&self, env_value: Option<String>) -> Result<String, ConfigError> {
        let non_empty = |key: &str| {
            let key = key.trim();
            (!key.is_empty()).then(|| key.to_string())
        };

        if let Some(key) = env_value.as_deref().and_then(non_empty) {
            debug!("Using API key from {}", API_KEY_ENV);
            return Ok(key);
        }
        if let Some(key) = self.api_key.as_deref().and_then(non_empty) {
            return Ok(key);
        }
        if let Some(path) = &self.api_key_file {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ApiKeyFile(path.clone(), e))?;
            if let Some(key) = non_empty(&contents) {
                return Ok(key);
            }
        }
        Err(ConfigError::MissingApiKey)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_secs: u64,
    pub retry_after_floor_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_secs: DEFAULT_DELAY.as_secs(),
            retry_after_floor_secs: DEFAULT_RETRY_AFTER_FLOOR.as_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(self.max_attempts)
            .delay(Duration::from_secs(self.delay_secs))
            .retry_after_floor(Duration::from_secs(self.retry_after_floor_secs))
            .build()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// How many days before today the observation date lies.
    pub observation_offset_days: u64,
    pub inter_entity_delay_secs: u64,
    /// Extra passes over partial and failed entities.
    pub retry_rounds: u32,
    pub forecast_conflict: ConflictPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            observation_offset_days: 6,
            inter_entity_delay_secs: DEFAULT_INTER_ENTITY_DELAY.as_secs(),
            retry_rounds: 0,
            forecast_conflict: ConflictPolicy::default(),
        }
    }
}

impl RunConfig {
    pub fn inter_entity_delay(&self) -> Duration {
        Duration::from_secs(self.inter_entity_delay_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("weather.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `env_logger` filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml_str(toml: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(origin.to_path_buf(), e))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let toml = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        Self::from_toml_str(&toml, path)
    }

    /// Loads `path` when given. Otherwise loads the default location if that file
    /// exists, and falls back to built-in defaults when it does not.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match default_config_path() {
            Some(default) if default.is_file() => {
                debug!("Loading config from {}", default.display());
                Self::from_file(&default)
            }
            _ => Ok(Self::default()),
        }
    }

    /// API key from the environment first, then from the file's `api` section.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        self.api.resolve_api_key(std::env::var(API_KEY_ENV).ok())
    }
}

/// `<config dir>/aemet_etl/config.toml`, e.g. `~/.config/aemet_etl/config.toml` on Linux.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
