//! Worker configuration (TOML).
//!
//! Every field has a default, so an empty file is a valid config:
//!
//! ```toml
//! [connection]
//! host = "127.0.0.1"
//! port = 11300
//! connect_timeout_ms = 2000
//!
//! [worker]
//! reserve_timeout_ms = 5000
//!
//! [disposition]
//! release_priority = 1024
//! release_delay_secs = 0
//! bury_priority = 1024
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ports::{ConnectOptions, DEFAULT_PORT, DEFAULT_PRIORITY};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub connection: ConnectionSection,
    pub worker: WorkerSection,
    pub disposition: DispositionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: Option<u64>,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    /// Reserve timeout used by the run loop. Unset waits indefinitely.
    pub reserve_timeout_ms: Option<u64>,
}

/// Priority and delay attached to release/bury commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispositionConfig {
    pub release_priority: u32,
    pub release_delay_secs: u64,
    pub bury_priority: u32,
}

impl Default for DispositionConfig {
    fn default() -> Self {
        Self {
            release_priority: DEFAULT_PRIORITY,
            release_delay_secs: 0,
            bury_priority: DEFAULT_PRIORITY,
        }
    }
}

impl DispositionConfig {
    pub fn release_delay(&self) -> Duration {
        Duration::from_secs(self.release_delay_secs)
    }
}

impl WorkerConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: WorkerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.host.trim().is_empty() {
            return Err(ConfigError::Invalid("connection.host is empty".to_string()));
        }
        if self.connection.port == 0 {
            return Err(ConfigError::Invalid("connection.port must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn connect_options(&self) -> ConnectOptions {
        let mut opts = ConnectOptions::new(&self.connection.host).with_port(self.connection.port);
        if let Some(ms) = self.connection.connect_timeout_ms {
            opts = opts.with_connect_timeout(Duration::from_millis(ms));
        }
        opts
    }

    pub fn reserve_timeout(&self) -> Option<Duration> {
        self.worker.reserve_timeout_ms.map(Duration::from_millis)
    }
}
