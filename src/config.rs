//! Runtime settings.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `FACTURO_*` environment variables (a `.env` file is read first if present).
//! Command-line flags are applied on top by the CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::storage::DEFAULT_COMMAND_TIMEOUT;

/// Read from the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "facturo.toml";
pub const DEFAULT_DATABASE: &str = "facturo.db";

pub const ENV_DATABASE: &str = "FACTURO_DATABASE";
pub const ENV_COMMAND_TIMEOUT: &str = "FACTURO_COMMAND_TIMEOUT_SECS";
pub const ENV_LOG_LEVEL: &str = "FACTURO_LOG_LEVEL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// SQLite database file
    pub database: PathBuf,
    /// Upper bound for any single storage operation
    pub command_timeout_secs: u64,
    /// Default `tracing` filter, overridden by `RUST_LOG`
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DATABASE),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT.as_secs(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load defaults, the config file and the process environment.
    ///
    /// `explicit` must exist if given. Without it, [`DEFAULT_CONFIG_FILE`] is
    /// used when present and silently skipped otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        // A missing .env is normal
        let _ = dotenvy::dotenv();

        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!("Loading configuration from {:?}", path);
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Override fields from variables returned by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(database) = lookup(ENV_DATABASE).filter(|v| !v.trim().is_empty()) {
            self.database = PathBuf::from(database);
        }
        if let Some(value) = lookup(ENV_COMMAND_TIMEOUT) {
            self.command_timeout_secs = value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| ConfigError::InvalidEnv {
                    key: ENV_COMMAND_TIMEOUT,
                    value: value.clone(),
                })?;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            self.log_level = level;
        }
        Ok(())
    }

    /// Reject settings that would make every storage operation fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "command_timeout_secs",
                reason: "must be at least 1 second".to_string(),
            });
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
