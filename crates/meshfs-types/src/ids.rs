//! Peer identity.
//!
//! A peer is named by a human-chosen identifier (`A`, `storage-3`, ...) and
//! reached at a `host:port`. The textual form `name:host:port` is what the
//! bootstrap argument and `getNeighbors` use.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A peer identifier. Unique within one network.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A peer reference: identifier plus network address.
///
/// Holding a `PeerInfo` says nothing about whether the peer is alive.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub host: String,
    pub port: u16,
}

impl PeerInfo {
    pub fn new(id: impl Into<PeerId>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
        }
    }

    /// `host:port`, suitable for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `name:host:port`
impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.id, self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerInfoParseError {
    #[error("expected name:host:port, got {0:?}")]
    Shape(String),
    #[error("invalid port in {0:?}")]
    Port(String),
}

impl FromStr for PeerInfo {
    type Err = PeerInfoParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Host may itself contain ':' (IPv6), so split name off the front
        // and port off the back.
        let (name, rest) = s
            .split_once(':')
            .ok_or_else(|| PeerInfoParseError::Shape(s.to_string()))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| PeerInfoParseError::Shape(s.to_string()))?;
        if name.is_empty() || host.is_empty() {
            return Err(PeerInfoParseError::Shape(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| PeerInfoParseError::Port(s.to_string()))?;
        Ok(Self::new(name, host, port))
    }
}
