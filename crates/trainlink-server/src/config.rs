//! Server configuration, loaded from a TOML file with per-field defaults.
//!
//! A missing file yields the defaults; a present file only needs to name
//! the fields it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use trainlink_core::sync::discovery::DEFAULT_DISCOVERY_PORT;
use trainlink_core::sync::DEFAULT_SYNC_PORT;

use crate::transport::serial::{DEFAULT_BAUD_RATE, DEFAULT_SERIAL_PORT};

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
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub links: LinksSection,
    #[serde(default)]
    pub sync: SyncSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// Name reported in discovery replies.
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Log filter when RUST_LOG is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinksSection {
    #[serde(default = "default_true")]
    pub serial_enabled: bool,
    #[serde(default = "default_serial_port")]
    pub serial_port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default)]
    pub base3_enabled: bool,
    #[serde(default = "default_base3_host")]
    pub base3_host: String,
    #[serde(default = "default_base3_port")]
    pub base3_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncSection {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_sync_port")]
    pub sync_port: u16,
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

fn default_server_name() -> String {
    "trainlink".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_serial_port() -> String {
    DEFAULT_SERIAL_PORT.to_string()
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_base3_host() -> String {
    "192.168.99.1".to_string()
}

fn default_base3_port() -> u16 {
    crate::transport::base3::DEFAULT_BASE3_PORT
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_sync_port() -> u16 {
    DEFAULT_SYNC_PORT
}

fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}

fn default_max_clients() -> usize {
    16
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for LinksSection {
    fn default() -> Self {
        Self {
            serial_enabled: true,
            serial_port: default_serial_port(),
            baud_rate: default_baud_rate(),
            base3_enabled: false,
            base3_host: default_base3_host(),
            base3_port: default_base3_port(),
        }
    }
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            sync_port: default_sync_port(),
            discovery_port: default_discovery_port(),
            max_clients: default_max_clients(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            links: LinksSection::default(),
            sync: SyncSection::default(),
        }
    }
}

impl ServerConfig {
    /// Loads the config file, or returns defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Writes the config back out.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
