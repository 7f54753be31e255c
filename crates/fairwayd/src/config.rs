//! Daemon configuration.
//!
//! The listen address and the timing knobs come from an optional TOML file,
//! with `FAIRWAYD_ADDR` as an environment override for the address. Missing
//! keys fall back to defaults, so a config file only needs the values it
//! changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::registry::DEFAULT_MAX_BAYS;
use crate::server::DEFAULT_LISTEN_ADDR;
use crate::sweeper::DEFAULT_SWEEP_INTERVAL;

/// Environment variable overriding the listen address.
pub const ADDR_ENV_VAR: &str = "FAIRWAYD_ADDR";

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the acceptor binds, `host:port`.
    pub listen_addr: String,

    /// Seconds an unidentified connection may hold a socket.
    pub handshake_timeout_secs: u64,

    /// Seconds between liveness sweeps.
    pub sweep_interval_secs: u64,

    /// Maximum number of registered bays.
    pub max_bays: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            handshake_timeout_secs: 10,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
            max_bays: DEFAULT_MAX_BAYS,
        }
    }
}

impl ServerConfig {
    /// Loads configuration: TOML file if given, then the environment
    /// override on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        Ok(config.with_env_override(std::env::var(ADDR_ENV_VAR).ok()))
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Self = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Applies the address override, if one is set and non-empty.
    fn with_env_override(mut self, addr: Option<String>) -> Self {
        if let Some(addr) = addr {
            if !addr.is_empty() {
                self.listen_addr = addr;
            }
        }
        self
    }

    /// Handshake deadline as a `Duration`.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Sweep period as a `Duration`.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Errors that can occur loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("failed to parse config {path}: {error}")]
    Parse { path: PathBuf, error: String },
}
