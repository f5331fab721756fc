//! Client configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use trainlink_core::sync::discovery::DEFAULT_DISCOVERY_PORT;
use trainlink_core::sync::DEFAULT_SYNC_PORT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Server to connect to.  Empty means: discover one.
    #[serde(default)]
    pub server_host: String,
    #[serde(default = "default_sync_port")]
    pub server_port: u16,
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Name this client reports in its HELLO.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Log filter when RUST_LOG is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_sync_port() -> u16 {
    DEFAULT_SYNC_PORT
}

fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}

fn default_client_name() -> String {
    "trainlink-client".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: String::new(),
            server_port: default_sync_port(),
            discovery_port: default_discovery_port(),
            client_name: default_client_name(),
            log_level: default_log_level(),
        }
    }
}

impl ClientConfig {
    /// Loads the config file, or returns defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
