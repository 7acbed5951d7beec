//! Membership directory and the join/leave protocol.
//!
//! A peer's neighbors are plain references: adding or removing one has no
//! effect on the remote peer. Edges become symmetric only because the join
//! protocol announces the joiner to everyone it learns about.

use dashmap::DashMap;
use meshfs_types::{PeerId, PeerInfo, RemoteError, Request, Response};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::transport::{PeerTransport, TransportError};

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("bootstrap call failed: {0}")]
    Transport(#[from] TransportError),

    #[error("bootstrap refused: {0}")]
    Refused(RemoteError),

    #[error("bootstrap sent an unexpected reply to {0}")]
    UnexpectedReply(&'static str),
}

/// The set of peers this peer knows about, keyed by identifier.
#[derive(Debug)]
pub struct Membership {
    me: PeerInfo,
    neighbors: DashMap<PeerId, PeerInfo>,
}

impl Membership {
    /// An isolated peer: no neighbors yet.
    pub fn new(me: PeerInfo) -> Self {
        Self {
            me,
            neighbors: DashMap::new(),
        }
    }

    pub fn me(&self) -> &PeerInfo {
        &self.me
    }

    /// Add or refresh a neighbor. A peer never lists itself.
    ///
    /// Returns `true` if the neighbor was not already known.
    pub fn add(&self, peer: PeerInfo) -> bool {
        if peer.id == self.me.id {
            return false;
        }
        debug!(me = %self.me.id, neighbor = %peer, "add neighbor");
        self.neighbors.insert(peer.id.clone(), peer).is_none()
    }

    /// Returns `true` if the neighbor was present.
    pub fn remove(&self, id: &PeerId) -> bool {
        let removed = self.neighbors.remove(id).is_some();
        if removed {
            debug!(me = %self.me.id, neighbor = %id, "remove neighbor");
        }
        removed
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.neighbors.contains_key(id)
    }

    /// Current neighbors, ordered by identifier.
    pub fn list(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self.neighbors.iter().map(|e| e.value().clone()).collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    /// Current neighbors as `name:host:port`.
    pub fn describe(&self) -> Vec<String> {
        self.list().iter().map(ToString::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Bootstrap side of a join: answer with ourselves and everyone we know
    /// (minus the joiner), then take the joiner on as a neighbor.
    pub fn admit(&self, joiner: PeerInfo) -> Vec<PeerInfo> {
        let mut known = vec![self.me.clone()];
        known.extend(self.list().into_iter().filter(|p| p.id != joiner.id));
        info!(me = %self.me.id, joiner = %joiner, known = known.len(), "admitting peer");
        self.add(joiner);
        known
    }

    /// Joining side: ask `bootstrap` who is out there, add them all, and
    /// announce ourselves to each one the bootstrap did not already tell.
    ///
    /// Announce failures are logged and skipped. Returns the neighbor count
    /// afterwards.
    pub async fn join(
        &self,
        transport: &dyn PeerTransport,
        bootstrap: &PeerInfo,
    ) -> Result<usize, MembershipError> {
        let reply = transport
            .call(
                bootstrap,
                Request::Join {
                    peer: self.me.clone(),
                },
            )
            .await?;
        let peers = match reply {
            Response::Peers(peers) => peers,
            Response::Error(e) => return Err(MembershipError::Refused(e)),
            _ => return Err(MembershipError::UnexpectedReply("join")),
        };

        for peer in peers {
            if peer.id == self.me.id {
                continue;
            }
            self.add(peer.clone());
            if peer.id == bootstrap.id {
                continue;
            }
            let announce = Request::Announce {
                peer: self.me.clone(),
            };
            match transport.call(&peer, announce).await {
                Ok(Response::Ack) => {}
                Ok(other) => warn!(peer = %peer, reply = ?other, "unexpected announce reply"),
                Err(e) => warn!(peer = %peer, error = %e, "announce failed"),
            }
        }
        info!(me = %self.me.id, neighbors = self.len(), "joined network");
        Ok(self.len())
    }

    /// Best-effort: tell every neighbor to drop us. Unreachable neighbors are
    /// skipped. Returns how many acknowledged.
    pub async fn leave(&self, transport: &dyn PeerTransport) -> usize {
        let mut acked = 0;
        for peer in self.list() {
            let request = Request::Leave {
                peer: self.me.id.clone(),
            };
            match transport.call(&peer, request).await {
                Ok(Response::Ack) => acked += 1,
                Ok(other) => warn!(peer = %peer, reply = ?other, "unexpected leave reply"),
                Err(e) => warn!(peer = %peer, error = %e, "leave notification failed"),
            }
        }
        info!(me = %self.me.id, notified = acked, "left network");
        acked
    }
}
