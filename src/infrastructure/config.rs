//! Configuration loading with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types. All are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid max_concurrent: {0}. Must be between 1 and 100")]
    InvalidMaxConcurrent(usize),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid server port: 0")]
    InvalidServerPort,

    #[error("Invalid timeout: {0}. Must be positive")]
    InvalidTimeout(u64),

    #[error("Driver '{0}' has an empty command")]
    EmptyDriverCommand(String),
}

/// Loads configuration with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.hivemind/config.yaml` (project config)
    /// 3. `.hivemind/local.yaml` (local overrides)
    /// 4. `HIVEMIND_*` environment variables
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".hivemind/config.yaml"))
            .merge(Yaml::file(".hivemind/local.yaml"))
            .merge(Env::prefixed("HIVEMIND_").split("__"))
            .extract()
            .context("Failed to extract configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, over defaults.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.max_concurrent == 0 || config.max_concurrent > 100 {
            return Err(ConfigError::InvalidMaxConcurrent(config.max_concurrent));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        if config.server.port == 0 {
            return Err(ConfigError::InvalidServerPort);
        }

        if config.orchestrator.single_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout(0));
        }
        if config.orchestrator.multi_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout(0));
        }

        for (name, driver) in &config.drivers {
            if let Some(command) = &driver.command {
                if command.is_empty() {
                    return Err(ConfigError::EmptyDriverCommand(name.clone()));
                }
            }
        }

        Ok(())
    }
}
