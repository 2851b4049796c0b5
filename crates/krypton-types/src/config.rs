//! Connection configuration, optionally loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Default time a call waits for its response.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Default upper bound on a single framed message (16 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Errors from strict config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Tunables for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Timeout applied to calls that do not set their own.
    pub default_timeout_ms: u64,
    /// Largest message body sent or accepted.
    pub max_message_size: u32,
    /// Protocol identifier for the session layer. Reported in connection logs.
    pub protocol_id: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            protocol_id: crate::PROTOCOL_ID.to_string(),
        }
    }
}

impl ConnectionConfig {
    /// The default call timeout as a [`Duration`].
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Load configuration from `path`, returning errors instead of falling back.
pub fn try_load_config(path: &Path) -> Result<ConnectionConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Load configuration from `path`, using defaults when the path is absent
/// or the file cannot be read or parsed.
pub fn load_config(path: Option<&Path>) -> ConnectionConfig {
    let Some(path) = path else {
        return ConnectionConfig::default();
    };

    match try_load_config(path) {
        Ok(config) => {
            info!(path = %path.display(), "Loaded connection configuration");
            config
        }
        Err(e) => {
            warn!(error = %e, "Using default connection configuration");
            ConnectionConfig::default()
        }
    }
}
