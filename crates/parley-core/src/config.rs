//! Configuration system for Parley
//!
//! Supports TOML configuration files with sensible defaults.
//! Configuration is loaded from:
//! - macOS: ~/Library/Application Support/parley/config.toml
//! - Linux: ~/.config/parley/config.toml
//! - Windows: %APPDATA%/parley/config.toml

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ConfigError;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// WebSocket signaling server settings
    pub signal: SignalConfig,
    /// HTTP discovery API settings
    pub api: ApiConfig,
    /// LAN discovery beacon settings
    pub discovery: DiscoveryConfig,
}

/// Signaling server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// WebSocket port, also advertised in discovery datagrams
    pub port: u16,
    /// Bind address
    pub bind: IpAddr,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_SIGNAL_PORT,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

/// HTTP discovery API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// HTTP port
    pub port: u16,
    /// Bind address
    pub bind: IpAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_API_PORT,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

/// LAN discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Run the UDP beacon at all
    pub enabled: bool,
    /// UDP port shared by every beacon on the LAN
    pub port: u16,
    /// Datagram prefix
    pub prefix: String,
    /// Override local address detection
    pub local_ip: Option<Ipv4Addr>,
    /// Peer time-to-live in milliseconds
    pub peer_ttl_ms: u64,
    /// Self-announce interval in milliseconds
    pub broadcast_interval_ms: u64,
    /// Stale peer sweep interval in milliseconds
    pub janitor_interval_ms: u64,
    /// Blocklist file (searched in the working and config directories if None)
    pub blocklist_path: Option<PathBuf>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: crate::DEFAULT_DISCOVERY_PORT,
            prefix: crate::DISCOVERY_PREFIX.to_string(),
            local_ip: None,
            peer_ttl_ms: crate::PEER_TTL_MS,
            broadcast_interval_ms: crate::BROADCAST_INTERVAL_MS,
            janitor_interval_ms: crate::JANITOR_INTERVAL_MS,
            blocklist_path: None,
        }
    }
}

impl DiscoveryConfig {
    pub fn peer_ttl(&self) -> Duration {
        Duration::from_millis(self.peer_ttl_ms)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_millis(self.janitor_interval_ms)
    }

    /// Resolve the blocklist file to read
    ///
    /// An explicit path always wins. Otherwise the working directory is
    /// tried first, then the platform config directory.
    pub fn blocklist_file(&self) -> PathBuf {
        if let Some(path) = &self.blocklist_path {
            return path.clone();
        }

        let local = PathBuf::from(crate::BLOCKLIST_FILE);
        if local.exists() {
            return local;
        }

        Config::config_dir()
            .map(|dir| dir.join(crate::BLOCKLIST_FILE))
            .filter(|path| path.exists())
            .unwrap_or(local)
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Failed to load config from {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            None => {
                debug!("No config directory found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get the platform config directory
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("com", "parley", "parley").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Generate a sample configuration file content
    pub fn sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}
