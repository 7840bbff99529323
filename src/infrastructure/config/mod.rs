//! Store configuration
//!
//! Layered with the `config` crate, later layers overriding earlier ones:
//! - built-in defaults
//! - an optional TOML file
//! - environment variables prefixed `IMPLSTORE_`
//!   (`IMPLSTORE_SHARED_CACHE_DIRS` takes a comma-separated list)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use validator::{Validate, ValidationError};

use crate::error::StoreError;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "IMPLSTORE";

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration validation failed: {0}")]
    Validation(String),

    #[error("configuration file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("configuration format error: {0}")]
    FormatError(String),
}

impl From<ConfigError> for StoreError {
    fn from(err: ConfigError) -> Self {
        StoreError::Config(err.to_string())
    }
}

impl From<::config::ConfigError> for ConfigError {
    fn from(err: ::config::ConfigError) -> Self {
        ConfigError::FormatError(err.to_string())
    }
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct StoreConfig {
    /// The user's writable implementation cache.
    #[validate(custom(function = "validate_path"))]
    pub cache_dir: PathBuf,

    /// System-wide caches searched after `cache_dir`, never written to.
    #[serde(default)]
    pub shared_cache_dirs: Vec<PathBuf>,

    /// Remove write permission from committed entries.
    #[serde(default = "default_read_only_entries")]
    pub read_only_entries: bool,

    /// Staging directories older than this are purged when the store opens.
    #[validate(range(min = 1, max = 8760))]
    #[serde(default = "default_stale_stage_hours")]
    pub stale_stage_hours: u64,

    #[validate(custom(function = "validate_log_level"))]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub log_json: bool,
}

fn default_read_only_entries() -> bool {
    true
}

fn default_stale_stage_hours() -> u64 {
    24
}

fn default_log_level() -> String {
    "info".to_string()
}

/// `$XDG_CACHE_HOME` (or `$HOME/.cache`) + `implstore/implementations`.
pub fn default_cache_dir() -> PathBuf {
    let base = std::env::var_os("XDG_CACHE_HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
        .unwrap_or_else(std::env::temp_dir);
    base.join("implstore").join("implementations")
}

/// `$XDG_CONFIG_HOME` (or `$HOME/.config`) + `implstore/config.toml`.
pub fn default_config_file() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .map(|base| base.join("implstore").join("config.toml"))
}

fn validate_path(path: &PathBuf) -> Result<(), ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::new("empty_path"));
    }
    Ok(())
}

fn validate_log_level(level: &String) -> Result<(), ValidationError> {
    match level.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" | "off" => Ok(()),
        _ => Err(ValidationError::new("unknown_log_level")),
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            shared_cache_dirs: Vec::new(),
            read_only_entries: default_read_only_entries(),
            stale_stage_hours: default_stale_stage_hours(),
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl StoreConfig {
    /// Load defaults, then `file` (required if given), then the environment.
    ///
    /// Without an explicit file, `default_config_file()` is read if present.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&StoreConfig::default())?);

        match file {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound(path.to_path_buf()));
                }
                builder = builder.add_source(
                    ::config::File::from(path)
                        .format(::config::FileFormat::Toml)
                        .required(true),
                );
            }
            None => {
                if let Some(path) = default_config_file() {
                    builder = builder.add_source(
                        ::config::File::from(path)
                            .format(::config::FileFormat::Toml)
                            .required(false),
                    );
                }
            }
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("shared_cache_dirs"),
        );

        let config: StoreConfig = builder.build()?.try_deserialize()?;
        config.validate_config()?;

        info!(
            cache_dir = %config.cache_dir.display(),
            shared = config.shared_cache_dirs.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = ::config::Config::builder()
            .add_source(::config::Config::try_from(&StoreConfig::default())?)
            .add_source(::config::File::from_str(text, ::config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate_config()?;
        Ok(config)
    }

    pub fn validate_config(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))
    }

    pub fn stale_stage_age(&self) -> Duration {
        Duration::from_secs(self.stale_stage_hours * 3600)
    }

    /// Serialize as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::FormatError(e.to_string()))
    }
}
