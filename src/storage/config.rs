//! Application configuration.
//!
//! Loaded from `config.toml` in the platform data directory. Every section has
//! defaults, so a partial or missing file is fine.

use crate::metrics::aggregator::AggregatorConfig;
use crate::metrics::power::PowerModelConfig;
use crate::recording::types::TrackerConfig;
use crate::sensors::fusion::PowerFusionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Database file name inside the data directory.
const DATABASE_FILE: &str = "runtrack.db";

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Tracker settings
    pub tracker: TrackerConfig,
    /// Pace plausibility bounds
    pub aggregator: AggregatorConfig,
    /// Power model coefficients
    pub power: PowerModelConfig,
    /// Power fusion weights and references
    pub fusion: PowerFusionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::new(),
            tracker: TrackerConfig::default(),
            aggregator: AggregatorConfig::default(),
            power: PowerModelConfig::default(),
            fusion: PowerFusionConfig::default(),
        }
    }
}

impl AppConfig {
    /// Path of the activity database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "runtrack", "RunTrack")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load application configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut config = load_config_from(&get_config_path())?;
    config.data_dir = get_data_dir();
    Ok(config)
}

/// Load configuration from a file. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        return Ok(AppConfig {
            data_dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            ..Default::default()
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    let mut config: AppConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.data_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    Ok(config)
}

/// Save application configuration to the default location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

/// Save application configuration to a file.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
