//! Peer configuration.
//!
//! A peer is described by a [`PeerConfig`], loaded from an optional TOML file
//! and then overridden field by field from the command line.
//!
//! ```toml
//! name = "A"
//! host = "127.0.0.1"
//! port = 7000
//! data_dir = "/var/lib/meshfs/A"
//! bootstrap = "B:127.0.0.1:7001"
//! hop_timeout_ms = 5000
//! flood_timeout_ms = 30000
//! connect_timeout_ms = 3000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use meshfs_client::constants::DEFAULT_CONNECT_TIMEOUT;
use meshfs_kernel::constants::{DEFAULT_FLOOD_BUDGET, DEFAULT_HOP_TIMEOUT};
use meshfs_types::{PeerInfo, PeerInfoParseError};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_HOST, DEFAULT_NAME, DEFAULT_PORT};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid bootstrap peer: {0}")]
    Bootstrap(#[from] PeerInfoParseError),
    #[error("invalid peer name {0:?}: must be non-empty and contain no ':'")]
    Name(String),
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Unique peer identifier within the network.
    pub name: String,
    pub host: String,
    /// 0 picks a free port.
    pub port: u16,
    /// Real directory mirrored by the storage engine. `None` keeps
    /// everything in memory.
    pub data_dir: Option<PathBuf>,
    /// `name:host:port` of a peer already in the network.
    pub bootstrap: Option<String>,
    /// Liveness ping bound per neighbor.
    pub hop_timeout_ms: u64,
    /// Bound on a whole flood started by this peer.
    pub flood_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            data_dir: None,
            bootstrap: None,
            hop_timeout_ms: DEFAULT_HOP_TIMEOUT.as_millis() as u64,
            flood_timeout_ms: DEFAULT_FLOOD_BUDGET.as_millis() as u64,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl PeerConfig {
    /// An in-memory peer on an ephemeral localhost port.
    pub fn ephemeral(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port: 0,
            ..Self::default()
        }
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Check everything that can be checked before binding a socket.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() || self.name.contains(':') {
            return Err(ConfigError::Name(self.name.clone()));
        }
        for (field, value) in [
            ("hop_timeout_ms", self.hop_timeout_ms),
            ("flood_timeout_ms", self.flood_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroTimeout(field));
            }
        }
        self.bootstrap_peer()?;
        Ok(())
    }

    pub fn bootstrap_peer(&self) -> Result<Option<PeerInfo>, ConfigError> {
        match &self.bootstrap {
            Some(s) => Ok(Some(s.parse()?)),
            None => Ok(None),
        }
    }

    pub fn hop_timeout(&self) -> Duration {
        Duration::from_millis(self.hop_timeout_ms)
    }

    pub fn flood_timeout(&self) -> Duration {
        Duration::from_millis(self.flood_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
