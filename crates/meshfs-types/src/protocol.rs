//! Peer-to-peer wire protocol.
//!
//! Every peer implements the same surface. A [`Request`] goes out, exactly
//! one [`Response`] comes back. Payloads are `postcard`-encoded; framing is
//! the transport's business.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::attr::{NodeAttr, SetAttr};
use crate::error::RemoteError;
use crate::ids::{PeerId, PeerInfo};

/// The set of peers a single logical request has already reached.
///
/// Created fresh for each top-level flood and only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visited(BTreeSet<PeerId>);

impl Visited {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set seeded with a single peer.
    pub fn seeded(peer: PeerId) -> Self {
        let mut v = Self::new();
        v.insert(peer);
        v
    }

    /// Returns `true` if the peer was not already present.
    pub fn insert(&mut self, peer: PeerId) -> bool {
        self.0.insert(peer)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.0.contains(peer)
    }

    /// Union another set into this one.
    pub fn merge(&mut self, other: Visited) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<PeerId> for Visited {
    fn from_iter<I: IntoIterator<Item = PeerId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A filesystem operation. Every variant can be resolved locally or flooded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsOp {
    Mkdir { path: String },
    Mknod { path: String },
    Symlink { target: String, link: String },
    Link { existing: String, new: String },
    Write { path: String, data: Vec<u8> },
    Read { path: String },
    Rename { from: String, to: String },
    Rmdir { path: String },
    Unlink { path: String },
    Readdir { path: String },
    Readlink { path: String },
    Getattr { path: String },
    Setattr { path: String, change: SetAttr },
    /// Which peer holds this path.
    Locate { path: String },
    Exists { path: String },
}

impl FsOp {
    /// Operation name, for logs and spans.
    pub fn name(&self) -> &'static str {
        match self {
            FsOp::Mkdir { .. } => "mkdir",
            FsOp::Mknod { .. } => "mknod",
            FsOp::Symlink { .. } => "symlink",
            FsOp::Link { .. } => "link",
            FsOp::Write { .. } => "write",
            FsOp::Read { .. } => "read",
            FsOp::Rename { .. } => "rename",
            FsOp::Rmdir { .. } => "rmdir",
            FsOp::Unlink { .. } => "unlink",
            FsOp::Readdir { .. } => "readdir",
            FsOp::Readlink { .. } => "readlink",
            FsOp::Getattr { .. } => "getattr",
            FsOp::Setattr { .. } => "setattr",
            FsOp::Locate { .. } => "locate",
            FsOp::Exists { .. } => "exists",
        }
    }

    /// The path the operation is primarily about.
    pub fn path(&self) -> &str {
        match self {
            FsOp::Mkdir { path }
            | FsOp::Mknod { path }
            | FsOp::Write { path, .. }
            | FsOp::Read { path }
            | FsOp::Rmdir { path }
            | FsOp::Unlink { path }
            | FsOp::Readdir { path }
            | FsOp::Readlink { path }
            | FsOp::Getattr { path }
            | FsOp::Setattr { path, .. }
            | FsOp::Locate { path }
            | FsOp::Exists { path } => path,
            FsOp::Symlink { link, .. } => link,
            FsOp::Link { new, .. } => new,
            FsOp::Rename { from, .. } => from,
        }
    }
}

/// Successful result of an [`FsOp`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsReply {
    Done,
    Data(Vec<u8>),
    Names(Vec<String>),
    Target(String),
    Attr(NodeAttr),
    Located(PeerId),
    Exists(bool),
}

/// Flood state carried by a forwarded filesystem request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub visited: Visited,
    /// Time the receiver has to answer, its own forwarding included.
    pub budget_ms: u64,
}

/// Everything one peer can ask another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// A filesystem operation. `hop: None` is a direct call: the receiving
    /// peer starts a fresh flood. `Some` continues an existing one.
    Fs { op: FsOp, hop: Option<Hop> },
    /// Membership entry point: the joiner introduces itself and receives the
    /// peers the bootstrap knows about.
    Join { peer: PeerInfo },
    /// "A new peer exists, add it."
    Announce { peer: PeerInfo },
    /// "Drop me from your neighbors."
    Leave { peer: PeerId },
    AddNeighbor { peer: PeerInfo },
    RemoveNeighbor { peer: PeerId },
    GetNeighbors,
    ListAllPaths,
    Ping,
}

/// Everything a peer answers with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Fs {
        result: Result<FsReply, RemoteError>,
        visited: Visited,
    },
    Peers(Vec<PeerInfo>),
    /// `name:host:port` strings.
    Neighbors(Vec<String>),
    Paths(Vec<String>),
    Ack,
    Pong(PeerId),
    Error(RemoteError),
}

#[derive(Debug, thiserror::Error)]
#[error("wire codec error: {0}")]
pub struct WireError(#[from] postcard::Error);

/// Encode a protocol message.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, WireError> {
    Ok(postcard::to_allocvec(msg)?)
}

/// Decode a protocol message.
pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, WireError> {
    Ok(postcard::from_bytes(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::NodeKind;
    use std::time::SystemTime;

    #[test]
    fn visited_grows_and_merges() {
        let mut v = Visited::seeded(PeerId::new("A"));
        assert!(!v.insert(PeerId::new("A")));
        assert!(v.insert(PeerId::new("B")));

        let other: Visited = ["C", "B"].into_iter().map(PeerId::from).collect();
        v.merge(other);

        assert_eq!(v.len(), 3);
        assert!(v.contains(&PeerId::new("C")));
    }

    #[test]
    fn fs_request_survives_the_wire() {
        let req = Request::Fs {
            op: FsOp::Write {
                path: "/a/b.txt".into(),
                data: b"payload".to_vec(),
            },
            hop: Some(Hop {
                visited: Visited::seeded(PeerId::new("A")),
                budget_ms: 4_900,
            }),
        };
        let bytes = encode(&req).unwrap();
        let back: Request = decode(&bytes).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn attr_response_survives_the_wire() {
        let now = SystemTime::now();
        let resp = Response::Fs {
            result: Ok(FsReply::Attr(NodeAttr {
                name: "b.txt".into(),
                kind: NodeKind::File,
                size: 7,
                nlink: 2,
                created: now,
                modified: now,
                open: false,
            })),
            visited: Visited::new(),
        };
        let back: Response = decode(&encode(&resp).unwrap()).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn garbage_does_not_decode() {
        let result: Result<Request, _> = decode(&[0xff, 0xff, 0xff]);
        assert!(result.is_err());
    }

    #[test]
    fn op_path_and_name() {
        let op = FsOp::Rename {
            from: "/x".into(),
            to: "/y".into(),
        };
        assert_eq!(op.path(), "/x");
        assert_eq!(op.name(), "rename");
    }
}
