//! Link configuration
//!
//! All settings have defaults, so an empty file is a valid configuration:
//!
//! ```toml
//! reply_timeout_ms = 2000
//! open_settle_ms = 1500
//!
//! [reconnect]
//! base_backoff_ms = 250
//! max_backoff_ms = 4000
//! max_attempts = 5
//!
//! [toolchain]
//! cli = "arduino-cli"
//! max_parallel_jobs = 2
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use boardlink_toolchain::ToolchainConfig;
use serde::Deserialize;
use thiserror::Error;

/// Error loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// The file could not be read
    #[error("Cannot read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Read error
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML or has unknown keys
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Reconnect schedule after a transport failure
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectConfig {
    /// Delay before the first attempt
    pub base_backoff_ms: u64,
    /// Upper bound of the doubling delay
    pub max_backoff_ms: u64,
    /// Attempts before giving up; 0 disables reconnecting
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: 250,
            max_backoff_ms: 4000,
            max_attempts: 5,
        }
    }
}

/// Settings for connections and the protocol engine
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// Deadline of a reply-expecting command
    pub reply_timeout_ms: u64,
    /// Wait after opening a port, while the board resets
    pub open_settle_ms: u64,
    /// Version queries sent before declaring the firmware stale
    pub handshake_attempts: u32,
    /// How long to wait for a flashed board to come back
    pub reappear_timeout_ms: u64,
    /// Poll interval while waiting for a board to come back
    pub reappear_poll_ms: u64,
    /// Reconnect schedule
    pub reconnect: ReconnectConfig,
    /// External toolchain
    pub toolchain: ToolchainConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: 2000,
            open_settle_ms: 1500,
            handshake_attempts: 3,
            reappear_timeout_ms: 10_000,
            reappear_poll_ms: 200,
            reconnect: ReconnectConfig::default(),
            toolchain: ToolchainConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigFileError> {
        Ok(toml::from_str(content)?)
    }

    /// Reply deadline
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// Settle time after open
    pub fn open_settle(&self) -> Duration {
        Duration::from_millis(self.open_settle_ms)
    }

    /// Bound on waiting for a flashed board
    pub fn reappear_timeout(&self) -> Duration {
        Duration::from_millis(self.reappear_timeout_ms)
    }

    /// Poll interval while waiting for a flashed board
    pub fn reappear_poll(&self) -> Duration {
        Duration::from_millis(self.reappear_poll_ms.max(1))
    }
}
