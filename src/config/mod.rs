//! Configuration module
//!
//! Handles loading and saving PipeLink configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::network::{ChannelEndpoint, NetworkConfig};
use crate::protocol::{DEFAULT_CHANNEL_NAME, DEFAULT_MAX_FRAME_SIZE};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Channel naming
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Client dispatcher settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Wire protocol limits
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Demo backend settings
    #[serde(default)]
    pub demo: DemoConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

/// Channel configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel name (derived from user and document path if not set)
    pub name: Option<String>,
    /// Directory for Unix domain sockets (runtime dir if not set)
    pub socket_dir: Option<PathBuf>,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Pause between connection attempts in ms
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_retry_interval() -> u64 {
    50
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            retry_interval_ms: default_retry_interval(),
        }
    }
}

/// Protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Largest accepted frame payload in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
        }
    }
}

/// Demo backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Number of elements selected when the backend starts
    #[serde(default = "default_selection_size")]
    pub selection_size: i32,
}

fn default_selection_size() -> i32 {
    3
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            selection_size: default_selection_size(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("pipelink/config.toml")),
            Some(PathBuf::from("./pipelink.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Runtime settings for the dispatchers
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            connect_timeout_ms: self.client.connect_timeout_ms,
            retry_interval_ms: self.client.retry_interval_ms,
            max_frame_size: self.protocol.max_frame_size,
        }
    }

    /// Resolve the channel: explicit name, then `fallback`, then the default
    pub fn endpoint(&self, fallback: Option<String>) -> ChannelEndpoint {
        let name = self
            .channel
            .name
            .clone()
            .or(fallback)
            .unwrap_or_else(|| DEFAULT_CHANNEL_NAME.to_string());
        ChannelEndpoint::new(name, self.channel.socket_dir.as_deref())
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        channel: ChannelConfig {
            name: Some("pipelink-tower-model".to_string()),
            socket_dir: None,
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}
