//! Configuration system for lanchat.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. explicit path (first CLI argument of the daemon)
//!   2. $LANCHAT_CONFIG
//!   3. $XDG_CONFIG_HOME/lanchat/config.toml
//!   4. ~/.config/lanchat/config.toml

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::wire::{validate_handle, WireError};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanchatConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub discovery: DiscoveryConfig,
    pub exchange: ExchangeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Display name, also the protocol identity. No whitespace or commas.
    pub handle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP port for incoming text and image transfers.
    pub port: u16,
    /// UDP port shared by every peer for discovery.
    pub discovery_port: u16,
    /// Destination for discovery broadcasts.
    pub broadcast_addr: IpAddr,
    /// Address announced to peers in SEEN replies. Unset = probe the
    /// outbound interface.
    pub advertise_addr: Option<IpAddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// How many copies of WHO each burst sends.
    pub burst_count: u32,
    /// Gap between burst copies.
    pub burst_interval_ms: u64,
    /// Quiet period after the last SEEN before a WHO round is committed.
    pub settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Where received images are written. Created if absent.
    pub image_dir: PathBuf,
    /// Hand received images to the platform viewer.
    pub open_images: bool,
    /// Refuse image announcements larger than this.
    pub max_image_bytes: u64,
    /// Bound on connect, ack and header reads.
    pub io_timeout_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for LanchatConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            network: NetworkConfig::default(),
            discovery: DiscoveryConfig::default(),
            exchange: ExchangeConfig::default(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        let handle = std::env::var("USER")
            .ok()
            .filter(|u| validate_handle(u).is_ok())
            .unwrap_or_else(|| "anonymous".to_string());
        Self { handle }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            discovery_port: 4000,
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            advertise_addr: None,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            burst_count: 3,
            burst_interval_ms: 200,
            settle_ms: 600,
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            image_dir: data_dir().join("images"),
            open_images: true,
            max_image_bytes: 64 * 1024 * 1024,
            io_timeout_ms: 5_000,
        }
    }
}

impl DiscoveryConfig {
    pub fn burst_interval(&self) -> Duration {
        Duration::from_millis(self.burst_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl ExchangeConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("lanchat")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local").join("share"))
        .join("lanchat")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid identity: {0}")]
    InvalidHandle(#[from] WireError),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl LanchatConfig {
    /// Load config from the default location: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load config from `path`, falling back to defaults when it does not
    /// exist. Env overrides are applied last.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            LanchatConfig::default()
        };
        config.apply_env_overrides();
        validate_handle(&config.identity.handle)?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("LANCHAT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config to `path` if nothing is there yet.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(&LanchatConfig::default())
            .map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply LANCHAT_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LANCHAT_IDENTITY__HANDLE") {
            self.identity.handle = v;
        }
        if let Ok(v) = std::env::var("LANCHAT_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Ok(v) = std::env::var("LANCHAT_NETWORK__DISCOVERY_PORT") {
            if let Ok(p) = v.parse() {
                self.network.discovery_port = p;
            }
        }
        if let Ok(v) = std::env::var("LANCHAT_NETWORK__BROADCAST_ADDR") {
            if let Ok(a) = v.parse() {
                self.network.broadcast_addr = a;
            }
        }
        if let Ok(v) = std::env::var("LANCHAT_EXCHANGE__IMAGE_DIR") {
            self.exchange.image_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("LANCHAT_EXCHANGE__OPEN_IMAGES") {
            self.exchange.open_images = v == "true" || v == "1";
        }
    }
}
