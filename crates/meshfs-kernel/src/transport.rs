//! The "call this neighbor" seam.
//!
//! The kernel never opens sockets. Anything that can carry a [`Request`] to
//! a peer and bring back its [`Response`] can drive the flood resolver and
//! the membership protocol: TCP in production, an in-process mesh in tests.

use async_trait::async_trait;
use meshfs_types::{PeerInfo, Request, Response};
use thiserror::Error;

/// Why a call to a neighbor produced no response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot reach {peer}: {reason}")]
    Unreachable { peer: String, reason: String },

    #[error("timed out talking to {0}")]
    Timeout(String),

    #[error("connection to {peer} closed mid-call")]
    Closed { peer: String },

    #[error("protocol error from {peer}: {reason}")]
    Protocol { peer: String, reason: String },
}

impl TransportError {
    pub fn unreachable(peer: &PeerInfo, reason: impl ToString) -> Self {
        Self::Unreachable {
            peer: peer.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn protocol(peer: &PeerInfo, reason: impl ToString) -> Self {
        Self::Protocol {
            peer: peer.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Sends one request to one peer and waits for its answer.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn call(&self, peer: &PeerInfo, request: Request) -> Result<Response, TransportError>;
}
