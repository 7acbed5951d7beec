//! The peer runtime.
//!
//! [`PeerNode`] owns one storage engine, one membership directory, one flood
//! resolver and the listener that exposes them. [`PeerService`] is the part
//! every connection task shares: it turns a [`Request`] into a [`Response`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use meshfs_client::TcpTransport;
use meshfs_kernel::{
    FloodResolver, Membership, MembershipError, PeerTransport, StorageEngine, VfsError,
};
use meshfs_types::{PeerId, PeerInfo, Request, Response};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, PeerConfig};
use crate::constants::LEAVE_TIMEOUT;
use crate::server::serve;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("storage: {0}")]
    Storage(#[from] VfsError),
    #[error("cannot create data directory {path}: {source}")]
    DataDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("join failed: {0}")]
    Join(#[from] MembershipError),
}

/// Request dispatch for one peer.
pub struct PeerService {
    resolver: Arc<FloodResolver>,
}

impl PeerService {
    pub fn new(resolver: Arc<FloodResolver>) -> Self {
        Self { resolver }
    }

    pub fn me(&self) -> &PeerId {
        self.resolver.me()
    }

    pub async fn dispatch(&self, request: Request) -> Response {
        let membership = self.resolver.membership();
        match request {
            Request::Fs { op, hop: None } => {
                debug!(peer = %self.me(), op = op.name(), path = op.path(), "direct call");
                let (result, visited) = self.resolver.resolve(op).await;
                Response::Fs { result, visited }
            }
            Request::Fs { op, hop: Some(hop) } => {
                let budget = Duration::from_millis(hop.budget_ms);
                let (result, visited) = self.resolver.handle(op, hop.visited, budget).await;
                Response::Fs { result, visited }
            }
            Request::Join { peer } => Response::Peers(membership.admit(peer)),
            Request::Announce { peer } => {
                info!(peer = %self.me(), neighbor = %peer, "announced");
                membership.add(peer);
                Response::Ack
            }
            Request::Leave { peer } => {
                info!(peer = %self.me(), neighbor = %peer, "neighbor left");
                membership.remove(&peer);
                Response::Ack
            }
            Request::AddNeighbor { peer } => {
                membership.add(peer);
                Response::Ack
            }
            Request::RemoveNeighbor { peer } => {
                membership.remove(&peer);
                Response::Ack
            }
            Request::GetNeighbors => Response::Neighbors(membership.describe()),
            Request::ListAllPaths => Response::Paths(self.resolver.engine().list_all_paths()),
            Request::Ping => Response::Pong(self.me().clone()),
        }
    }
}

/// A running peer.
pub struct PeerNode {
    resolver: Arc<FloodResolver>,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    listener: JoinHandle<()>,
}

impl PeerNode {
    /// Mount storage, bind the listener and start serving. The peer starts
    /// isolated; call [`join_network`](Self::join_network) to connect it.
    pub async fn start(config: &PeerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let engine = match &config.data_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|source| ServerError::DataDir {
                        path: dir.display().to_string(),
                        source,
                    })?;
                StorageEngine::mount(dir).await?
            }
            None => StorageEngine::new(),
        };

        let bind_addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: bind_addr.clone(),
            source,
        })?;

        // With port 0 the advertised port is whatever the OS picked.
        let me = PeerInfo::new(config.name.as_str(), config.host.as_str(), local_addr.port());
        let transport: Arc<dyn PeerTransport> =
            Arc::new(TcpTransport::new(config.connect_timeout()));
        let resolver = Arc::new(
            FloodResolver::new(
                Arc::new(engine),
                Arc::new(Membership::new(me.clone())),
                transport,
            )
            .with_hop_timeout(config.hop_timeout())
            .with_flood_budget(config.flood_timeout()),
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let service = Arc::new(PeerService::new(Arc::clone(&resolver)));
        let listener = tokio::spawn(serve(listener, service, shutdown_rx));
        info!(peer = %me, "peer started");

        Ok(Self {
            resolver,
            local_addr,
            shutdown,
            listener,
        })
    }

    pub fn me(&self) -> &PeerInfo {
        self.resolver.membership().me()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn resolver(&self) -> &Arc<FloodResolver> {
        &self.resolver
    }

    pub fn engine(&self) -> &Arc<StorageEngine> {
        self.resolver.engine()
    }

    pub fn membership(&self) -> &Arc<Membership> {
        self.resolver.membership()
    }

    /// Join through `bootstrap`. Returns the neighbor count afterwards.
    pub async fn join_network(&self, bootstrap: &PeerInfo) -> Result<usize, ServerError> {
        let transport = self.resolver.transport();
        Ok(self
            .membership()
            .join(transport.as_ref(), bootstrap)
            .await?)
    }

    /// Tell every neighbor we are going. Best-effort and bounded in time.
    pub async fn leave_network(&self) -> usize {
        let transport = self.resolver.transport();
        match tokio::time::timeout(LEAVE_TIMEOUT, self.membership().leave(transport.as_ref())).await
        {
            Ok(acked) => acked,
            Err(_) => {
                warn!(peer = %self.me(), "leave timed out");
                0
            }
        }
    }

    /// Stop accepting and close open connections. Does not leave the
    /// network; neighbors will see this peer as unreachable.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.listener.await {
            warn!(error = %e, "listener task failed");
        }
    }
}
