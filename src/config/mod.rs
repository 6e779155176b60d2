//! Application configuration.
//!
//! Loaded from YAML files and environment variables with the `config` crate.

use std::path::PathBuf;

use serde::Deserialize;

use crate::object::Delivery;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "buscast.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "BUSCAST_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "BUSCAST";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "BUSCAST_LOG";

/// Errors raised while loading or interpreting configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid file mode '{0}': expected octal digits")]
    Mode(String),
}

/// Bus configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Directory for anonymous buses (defaults to `$XDG_RUNTIME_DIR/buscast`).
    pub bus_dir: Option<PathBuf>,
    /// Delivery policy recorded in new buses.
    pub delivery: Delivery,
    /// Octal file mode of new buses.
    pub mode: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bus_dir: None,
            delivery: Delivery::default(),
            mode: "600".to_string(),
        }
    }
}

impl BusConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `buscast.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(Environment::with_prefix(CONFIG_ENV_PREFIX).separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Parse `mode` as an octal permission mask.
    pub fn file_mode(&self) -> Result<u32, ConfigError> {
        parse_mode(&self.mode)
    }
}

/// Parse an octal mode string (`"660"`, `"0660"` or `"0o660"`).
pub fn parse_mode(raw: &str) -> Result<u32, ConfigError> {
    let digits = raw.trim().trim_start_matches("0o");
    u32::from_str_radix(digits, 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
        .ok_or_else(|| ConfigError::Mode(raw.to_string()))
}
