//! Server configuration

use crate::error::ConfigError;
use crate::locks::LockStrategy;
use crate::protocol::DEFAULT_PORT;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Directory holding one subdirectory per user id
    pub root_dir: PathBuf,
    /// Poll for busy users at this interval instead of waiting for a release signal
    pub lock_poll_ms: Option<u64>,
    pub log_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            root_dir: PathBuf::from("backupsvr"),
            lock_poll_ms: None,
            log_dir: PathBuf::from("/tmp"),
        }
    }
}

impl ServerConfig {
    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn lock_strategy(&self) -> LockStrategy {
        match self.lock_poll_ms {
            Some(ms) => LockStrategy::Poll(Duration::from_millis(ms)),
            None => LockStrategy::Notify,
        }
    }
}
