//! Talking to peers over TCP.
//!
//! [`TcpTransport`] is what a peer uses to reach its neighbors during a
//! flood or a join. [`PeerClient`] is a typed wrapper over one long-lived
//! connection, used by the shell and by tests.

use std::time::Duration;

use async_trait::async_trait;
use meshfs_kernel::{PeerTransport, TransportError};
use meshfs_types::{
    FsOp, FsReply, NodeAttr, PeerId, PeerInfo, RemoteError, Request, Response, SetAttr,
};
use tokio::net::TcpStream;
use tracing::debug;

use crate::codec::{CodecError, MessageStream};
use crate::constants::DEFAULT_CONNECT_TIMEOUT;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connect to {0} failed: {1}")]
    Connect(String, #[source] std::io::Error),
    #[error("connect to {0} timed out")]
    ConnectTimeout(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("peer closed the connection")]
    Closed,
    #[error("peer error: {0}")]
    Remote(#[from] RemoteError),
    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),
}

/// One framed TCP connection to a peer.
pub struct Connection {
    stream: MessageStream<TcpStream>,
}

impl Connection {
    pub async fn open(addr: &str, connect_timeout: Duration) -> Result<Self, ClientError> {
        let tcp = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::ConnectTimeout(addr.to_string()))?
            .map_err(|e| ClientError::Connect(addr.to_string(), e))?;
        tcp.set_nodelay(true)
            .map_err(|e| ClientError::Connect(addr.to_string(), e))?;
        Ok(Self {
            stream: MessageStream::new(tcp),
        })
    }

    /// Send one request and wait for its response.
    pub async fn round_trip(&mut self, request: &Request) -> Result<Response, ClientError> {
        self.stream.send(request).await?;
        self.stream.recv().await?.ok_or(ClientError::Closed)
    }
}

/// [`PeerTransport`] over TCP, one connection per call.
///
/// Timeouts beyond the connect are the caller's business: the flood
/// resolver bounds every ping and every forwarded call itself.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl PeerTransport for TcpTransport {
    async fn call(&self, peer: &PeerInfo, request: Request) -> Result<Response, TransportError> {
        let mut conn = Connection::open(&peer.address(), self.connect_timeout)
            .await
            .map_err(|e| match e {
                ClientError::ConnectTimeout(_) => TransportError::Timeout(peer.to_string()),
                other => TransportError::unreachable(peer, other),
            })?;
        debug!(peer = %peer, "calling");
        conn.round_trip(&request).await.map_err(|e| match e {
            ClientError::Closed => TransportError::Closed {
                peer: peer.to_string(),
            },
            other => TransportError::protocol(peer, other),
        })
    }
}

/// Typed calls against one peer.
///
/// Filesystem calls are direct: the peer answers from its own storage if it
/// can and floods its neighbors otherwise.
pub struct PeerClient {
    addr: String,
    conn: Connection,
}

impl PeerClient {
    pub async fn connect(addr: impl Into<String>) -> Result<Self, ClientError> {
        Self::connect_with_timeout(addr, DEFAULT_CONNECT_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        addr: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let addr = addr.into();
        let conn = Connection::open(&addr, connect_timeout).await?;
        Ok(Self { addr, conn })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn request(&mut self, request: Request) -> Result<Response, ClientError> {
        match self.conn.round_trip(&request).await? {
            Response::Error(e) => Err(e.into()),
            other => Ok(other),
        }
    }

    /// Run a filesystem operation, flooding if the peer does not hold it.
    pub async fn fs(&mut self, op: FsOp) -> Result<FsReply, ClientError> {
        match self.request(Request::Fs { op, hop: None }).await? {
            Response::Fs { result, .. } => Ok(result?),
            _ => Err(ClientError::UnexpectedReply("fs")),
        }
    }

    async fn fs_done(&mut self, op: FsOp) -> Result<(), ClientError> {
        let name = op.name();
        match self.fs(op).await? {
            FsReply::Done => Ok(()),
            _ => Err(ClientError::UnexpectedReply(name)),
        }
    }

    // ========================================================================
    // Filesystem
    // ========================================================================

    pub async fn mkdir(&mut self, path: &str) -> Result<(), ClientError> {
        self.fs_done(FsOp::Mkdir { path: path.into() }).await
    }

    pub async fn mknod(&mut self, path: &str) -> Result<(), ClientError> {
        self.fs_done(FsOp::Mknod { path: path.into() }).await
    }

    pub async fn symlink(&mut self, target: &str, link: &str) -> Result<(), ClientError> {
        self.fs_done(FsOp::Symlink {
            target: target.into(),
            link: link.into(),
        })
        .await
    }

    pub async fn link(&mut self, existing: &str, new: &str) -> Result<(), ClientError> {
        self.fs_done(FsOp::Link {
            existing: existing.into(),
            new: new.into(),
        })
        .await
    }

    pub async fn write(&mut self, path: &str, data: &[u8]) -> Result<(), ClientError> {
        self.fs_done(FsOp::Write {
            path: path.into(),
            data: data.to_vec(),
        })
        .await
    }

    pub async fn read(&mut self, path: &str) -> Result<Vec<u8>, ClientError> {
        match self.fs(FsOp::Read { path: path.into() }).await? {
            FsReply::Data(data) => Ok(data),
            _ => Err(ClientError::UnexpectedReply("read")),
        }
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> Result<(), ClientError> {
        self.fs_done(FsOp::Rename {
            from: from.into(),
            to: to.into(),
        })
        .await
    }

    pub async fn rmdir(&mut self, path: &str) -> Result<(), ClientError> {
        self.fs_done(FsOp::Rmdir { path: path.into() }).await
    }

    pub async fn unlink(&mut self, path: &str) -> Result<(), ClientError> {
        self.fs_done(FsOp::Unlink { path: path.into() }).await
    }

    pub async fn readdir(&mut self, path: &str) -> Result<Vec<String>, ClientError> {
        match self.fs(FsOp::Readdir { path: path.into() }).await? {
            FsReply::Names(names) => Ok(names),
            _ => Err(ClientError::UnexpectedReply("readdir")),
        }
    }

    pub async fn readlink(&mut self, path: &str) -> Result<String, ClientError> {
        match self.fs(FsOp::Readlink { path: path.into() }).await? {
            FsReply::Target(target) => Ok(target),
            _ => Err(ClientError::UnexpectedReply("readlink")),
        }
    }

    pub async fn getattr(&mut self, path: &str) -> Result<NodeAttr, ClientError> {
        match self.fs(FsOp::Getattr { path: path.into() }).await? {
            FsReply::Attr(attr) => Ok(attr),
            _ => Err(ClientError::UnexpectedReply("getattr")),
        }
    }

    pub async fn setattr(&mut self, path: &str, change: SetAttr) -> Result<(), ClientError> {
        self.fs_done(FsOp::Setattr {
            path: path.into(),
            change,
        })
        .await
    }

    /// Which peer holds `path`.
    pub async fn locate(&mut self, path: &str) -> Result<PeerId, ClientError> {
        match self.fs(FsOp::Locate { path: path.into() }).await? {
            FsReply::Located(peer) => Ok(peer),
            _ => Err(ClientError::UnexpectedReply("locate")),
        }
    }

    pub async fn exists(&mut self, path: &str) -> Result<bool, ClientError> {
        match self.fs(FsOp::Exists { path: path.into() }).await? {
            FsReply::Exists(found) => Ok(found),
            _ => Err(ClientError::UnexpectedReply("exists")),
        }
    }

    // ========================================================================
    // Membership and introspection
    // ========================================================================

    /// Neighbors as `name:host:port`.
    pub async fn neighbors(&mut self) -> Result<Vec<String>, ClientError> {
        match self.request(Request::GetNeighbors).await? {
            Response::Neighbors(list) => Ok(list),
            _ => Err(ClientError::UnexpectedReply("get_neighbors")),
        }
    }

    pub async fn add_neighbor(&mut self, peer: PeerInfo) -> Result<(), ClientError> {
        match self.request(Request::AddNeighbor { peer }).await? {
            Response::Ack => Ok(()),
            _ => Err(ClientError::UnexpectedReply("add_neighbor")),
        }
    }

    pub async fn remove_neighbor(&mut self, peer: PeerId) -> Result<(), ClientError> {
        match self.request(Request::RemoveNeighbor { peer }).await? {
            Response::Ack => Ok(()),
            _ => Err(ClientError::UnexpectedReply("remove_neighbor")),
        }
    }

    /// Every path the peer holds itself. Does not flood.
    pub async fn list_all_paths(&mut self) -> Result<Vec<String>, ClientError> {
        match self.request(Request::ListAllPaths).await? {
            Response::Paths(paths) => Ok(paths),
            _ => Err(ClientError::UnexpectedReply("list_all_paths")),
        }
    }

    pub async fn ping(&mut self) -> Result<PeerId, ClientError> {
        match self.request(Request::Ping).await? {
            Response::Pong(id) => Ok(id),
            _ => Err(ClientError::UnexpectedReply("ping")),
        }
    }
}
