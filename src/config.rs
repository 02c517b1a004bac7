//! Configuration management for Tankobon.
//!
//! Handles loading, saving, and validating configuration from
//! platform-specific config directories.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name used for config and data directories.
const APP_NAME: &str = "Tankobon";

/// Default config filename.
const CONFIG_FILENAME: &str = "config.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chapter catalogue resolution settings.
    pub catalog: CatalogConfig,

    /// Remote chapter feed settings.
    pub remote: RemoteConfig,

    /// Local chapter library settings.
    pub library: LibraryConfig,

    /// Persistent state settings.
    pub storage: StorageConfig,

    /// Diagnostic logging settings.
    pub logging: LoggingConfig,
}

/// Tunables for the remote batch loop and the chapter cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Chapters requested per remote batch.
    pub batch_size: usize,

    /// The batch loop stops once the offset exceeds this value.
    pub max_offset: usize,

    /// Consecutive exhausted batches that end the loop.
    pub empty_batch_limit: u32,

    /// Pause between remote batches in milliseconds.
    pub batch_delay_ms: u64,

    /// How long a cached chapter list stays fresh, in hours.
    pub cache_ttl_hours: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_offset: 10_000,
            empty_batch_limit: 3,
            batch_delay_ms: 100,
            cache_ttl_hours: 24,
        }
    }
}

impl CatalogConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours.saturating_mul(60 * 60))
    }
}

/// Remote chapter feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the chapter feed API.
    pub base_url: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mangadex.org".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Local chapter library configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Path to the library JSON file. Defaults to `library.json` in the data directory.
    pub path: Option<PathBuf>,
}

/// Persistent state configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding cache, progress and settings records.
    pub data_directory: Option<PathBuf>,

    /// Debounce window for progress writes in milliseconds.
    pub progress_debounce_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: None,
            progress_debounce_ms: 500,
        }
    }
}

impl StorageConfig {
    pub fn progress_debounce(&self) -> Duration {
        Duration::from_millis(self.progress_debounce_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `TANKOBON_LOG`/`RUST_LOG` are unset.
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
    /// Returns the platform-specific config directory path.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Returns the full path to the config file.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILENAME))
    }

    /// Loads configuration from the default location.
    ///
    /// If the config file doesn't exist, creates a default one.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Saves configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.catalog.batch_size == 0 {
            return Err(invalid("catalog.batch_size", "must be greater than 0"));
        }

        if self.catalog.empty_batch_limit == 0 {
            return Err(invalid("catalog.empty_batch_limit", "must be greater than 0"));
        }

        if self.catalog.cache_ttl_hours == 0 {
            return Err(invalid("catalog.cache_ttl_hours", "must be greater than 0"));
        }

        if self.remote.base_url.trim().is_empty() {
            return Err(invalid("remote.base_url", "must not be empty"));
        }

        Ok(())
    }

    /// Returns the effective data directory, using config or default.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(ref dir) = self.storage.data_directory {
            Ok(dir.clone())
        } else {
            dirs::data_dir()
                .map(|p| p.join(APP_NAME))
                .ok_or(ConfigError::NoConfigDir)
        }
    }

    /// Returns the effective library file path.
    pub fn library_path(&self) -> Result<PathBuf, ConfigError> {
        match self.library.path {
            Some(ref path) => Ok(path.clone()),
            None => Ok(self.data_dir()?.join("library.json")),
        }
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
