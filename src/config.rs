//! Configuration management

use crate::error::{ChainError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Longest run of leading zero digits a 32-byte hex hash can satisfy.
pub const MAX_DIFFICULTY: u64 = 63;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub miner: MinerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    #[serde(default = "default_difficulty")]
    pub difficulty: u64,
    /// Build each application's states in its own task.
    #[serde(default = "default_concurrent")]
    pub concurrent: bool,
    /// Skip the proof-of-work search and accept the first candidate after a delay.
    #[serde(default)]
    pub simulated: bool,
    #[serde(default = "default_simulated_delay_ms")]
    pub simulated_delay_ms: u64,
    #[serde(default)]
    pub miner_address: String,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            concurrent: default_concurrent(),
            simulated: false,
            simulated_delay_ms: default_simulated_delay_ms(),
            miner_address: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_difficulty() -> u64 {
    5
}

fn default_concurrent() -> bool {
    true
}

fn default_simulated_delay_ms() -> u64 {
    2_000
}

fn default_store_path() -> String {
    "./data/content.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.miner.difficulty > MAX_DIFFICULTY {
            return Err(ChainError::ConfigError(format!(
                "miner.difficulty must be at most {}, got {}",
                MAX_DIFFICULTY, self.miner.difficulty
            )));
        }
        if self.store.path.is_empty() {
            return Err(ChainError::ConfigError(
                "store.path must be set".to_string(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ChainError::ConfigError(format!(
                "logging.format must be pretty or json, got {}",
                self.logging.format
            )));
        }
        Ok(())
    }
}

/// Reads the TOML file at `path`; a missing file yields the defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = fs::read_to_string(path)?;
    Config::from_toml(&text)
}
