//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment**: `MUXLINK_LOG` replaces the configured log level
//! 2. **Config file**: path via `--config <path>`, or `muxlink.toml` in the working directory
//! 3. **Compiled defaults**: see each field's default value below
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [tunnels]
//! connect_timeout_ms = 5000   # omit to wait as long as the transport does
//!
//! [session]
//! default_terminal_rows = 24  # used when standard output is not a terminal
//! default_terminal_cols = 80
//!
//! [[tunnel]]
//! name = "web"
//! kind = "fixed"
//! listen = "127.0.0.1:8080"
//! target = "10.0.0.5:80"
//!
//! [[tunnel]]
//! name = "proxy"
//! kind = "dynamic"
//! listen = "127.0.0.1:1080"
//!
//! [[tunnel]]
//! name = "docker"
//! kind = "socket"
//! listen = "127.0.0.1:0"
//! path = "/var/run/docker.sock"
//!
//! [[command]]
//! name = "build"
//! run = "make -j4"
//! ```

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use muxlink_proto::{Endpoint, TerminalSize};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::tunnels::TunnelOptions;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "muxlink.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse { path: PathBuf, source: toml::de::Error },
}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub tunnels: TunnelsConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// Tunnels opened at startup, in order.
    #[serde(default, rename = "tunnel")]
    pub tunnel_list: Vec<TunnelConfig>,
    /// Remote commands run one after another, in order.
    #[serde(default, rename = "command")]
    pub commands: Vec<CommandConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset (default `info`).
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Settings shared by all tunnels.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TunnelsConfig {
    /// Upper bound on dialing a tunnel's destination, in milliseconds. No bound when omitted.
    pub connect_timeout_ms: Option<u64>,
}

impl TunnelsConfig {
    pub fn options(&self) -> TunnelOptions {
        TunnelOptions {
            connect_timeout: self.connect_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Terminal rows requested when standard output is not a terminal (default 24).
    #[serde(default = "default_terminal_rows")]
    pub default_terminal_rows: u16,
    /// Terminal columns requested when standard output is not a terminal (default 80).
    #[serde(default = "default_terminal_cols")]
    pub default_terminal_cols: u16,
}

impl SessionConfig {
    pub fn default_size(&self) -> TerminalSize {
        TerminalSize::new(self.default_terminal_rows, self.default_terminal_cols)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TunnelConfig {
    Fixed {
        name: String,
        #[serde(deserialize_with = "deserialize_endpoint")]
        listen: Endpoint,
        #[serde(deserialize_with = "deserialize_endpoint")]
        target: Endpoint,
    },
    Dynamic {
        name: String,
        #[serde(deserialize_with = "deserialize_endpoint")]
        listen: Endpoint,
    },
    Socket {
        name: String,
        #[serde(deserialize_with = "deserialize_endpoint")]
        listen: Endpoint,
        path: PathBuf,
    },
}

impl TunnelConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Fixed { name, .. } | Self::Dynamic { name, .. } | Self::Socket { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandConfig {
    pub name: String,
    pub run: String,
}

fn deserialize_endpoint<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Endpoint, D::Error> {
    let text = String::deserialize(deserializer)?;
    text.parse().map_err(serde::de::Error::custom)
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_terminal_rows() -> u16 {
    24
}
fn default_terminal_cols() -> u16 {
    80
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_terminal_rows: default_terminal_rows(),
            default_terminal_cols: default_terminal_cols(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or from [`DEFAULT_CONFIG_FILE`] if present, or defaults.
    ///
    /// An explicitly given file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|path| path.exists()),
        };

        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })?
            }
            None => Config::default(),
        };

        if let Ok(level) = std::env::var("MUXLINK_LOG") {
            config.logging.level = level;
        }

        Ok(config)
    }
}
