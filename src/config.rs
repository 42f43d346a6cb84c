//! Configuration handling for the driver shell.
//!
//! Manages the `graphjin-mongo.toml` configuration file.
//!
//! ## Environment Variables
//!
//! The following environment variables override config file settings:
//!
//! - `GJ_MONGO_URI` - Document store connection URI
//! - `GJ_MONGO_DATABASE` - Target database
//! - `GJ_MONGO_SAMPLE_SIZE` - Documents sampled per collection by introspection
//!
//! These can be set in a `.env` file next to the config file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::driver::dsl::DEFAULT_SAMPLE_SIZE;

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "graphjin-mongo.toml";

/// Environment variable names
pub const ENV_URI: &str = "GJ_MONGO_URI";
pub const ENV_DATABASE: &str = "GJ_MONGO_DATABASE";
pub const ENV_SAMPLE_SIZE: &str = "GJ_MONGO_SAMPLE_SIZE";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Document store URI
    #[serde(default = "default_uri")]
    pub uri: String,
    /// Target database
    pub database: String,
    /// Default introspection sample size
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    /// Tracing filter directive, e.g. `graphjin_mongo=debug`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
    /// JSON seed file for the in-memory backend (relative to the config file)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<PathBuf>,
}

fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_sample_size() -> usize {
    DEFAULT_SAMPLE_SIZE
}

impl Config {
    /// Create a new configuration for the given database
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            uri: default_uri(),
            database: database.into(),
            sample_size: default_sample_size(),
            log_filter: None,
            seed: None,
        }
    }

    /// Load configuration from a directory
    ///
    /// This also loads any `.env` file in the directory and applies
    /// environment variable overrides.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let env_path = dir.join(".env");
        if env_path.exists() {
            let _ = dotenvy::from_path(&env_path);
        }

        let config_path = dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            anyhow::bail!("Configuration file not found: {}", config_path.display());
        }

        let content = std::fs::read_to_string(&config_path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides();
        if config.sample_size == 0 {
            anyhow::bail!("sample_size must be a positive integer");
        }

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(uri) = std::env::var(ENV_URI) {
            if !uri.is_empty() {
                self.uri = uri;
            }
        }

        if let Ok(database) = std::env::var(ENV_DATABASE) {
            if !database.is_empty() {
                self.database = database;
            }
        }

        if let Ok(size) = std::env::var(ENV_SAMPLE_SIZE) {
            if let Ok(size) = size.parse::<usize>() {
                if size > 0 {
                    self.sample_size = size;
                }
            }
        }
    }

    /// Save configuration to a directory
    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Absolute path of the seed file, if one is configured
    pub fn seed_path(&self, config_dir: &Path) -> Option<PathBuf> {
        self.seed.as_ref().map(|seed| {
            if seed.is_absolute() {
                seed.clone()
            } else {
                config_dir.join(seed)
            }
        })
    }
}
