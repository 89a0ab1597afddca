//! Configuration loading
//!
//! Resolution order for the config file:
//! 1. `--config <file>` (must exist)
//! 2. `<dataset>/data-monitoring/hallmonitor.toml`
//! 3. `<user config dir>/hallmonitor/config.toml`
//! 4. Built-in defaults
//!
//! Missing optional files are not errors; a file that exists but does not
//! parse is.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable that overrides the operator identity
pub const OPERATOR_ENV: &str = "HALLMONITOR_OPERATOR";

/// Dataset-local config file, relative to the dataset root
pub const DATASET_CONFIG_FILE: &str = "data-monitoring/hallmonitor.toml";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HallMonitorConfig {
    /// Operator recorded in every table row
    #[serde(default)]
    pub operator: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub psychopy: PsychopyConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Psychopy content check settings
#[derive(Debug, Clone, Deserialize)]
pub struct PsychopyConfig {
    /// Column of the psychopy `.csv` holding the subject number
    #[serde(default = "default_id_column")]
    pub id_column: String,
}

impl Default for PsychopyConfig {
    fn default() -> Self {
        Self {
            id_column: default_id_column(),
        }
    }
}

/// External tracker updater
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackerConfig {
    /// Program and leading arguments; empty disables the tracker update
    #[serde(default)]
    pub command: Vec<String>,

    /// Restrict the update to one `s<N>_r<N>` (passed as `none` when unset)
    #[serde(default)]
    pub session_filter: Option<String>,

    /// Dataset holds child data
    #[serde(default)]
    pub child_data: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_id_column() -> String {
    "id".to_string()
}

impl HallMonitorConfig {
    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;
        let config = toml::from_str(&text)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Resolve the config for a dataset; returns the file used, if any
    pub fn resolve(cli_path: Option<&Path>, dataset: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = cli_path {
            if !path.is_file() {
                return Err(Error::Config(format!("Config file not found: {:?}", path)));
            }
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }

        let candidates = [
            Some(dataset.join(DATASET_CONFIG_FILE)),
            dirs::config_dir().map(|d| d.join("hallmonitor").join("config.toml")),
        ];
        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                return Ok((Self::from_file(&path)?, Some(path)));
            }
            debug!("No config file at {:?}", path);
        }

        debug!("Using built-in configuration defaults");
        Ok((Self::default(), None))
    }

    /// Operator identity: env override, then config, then login name
    pub fn operator(&self) -> String {
        let from_env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        from_env(OPERATOR_ENV)
            .or_else(|| self.operator.clone().filter(|v| !v.trim().is_empty()))
            .or_else(|| from_env("USER"))
            .or_else(|| from_env("USERNAME"))
            .unwrap_or_else(|| "unknown".to_string())
    }
}
