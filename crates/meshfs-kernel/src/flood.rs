//! Visited-set flood resolution.
//!
//! A peer that cannot answer an operation from its own storage engine asks
//! its neighbors, who ask theirs, until someone answers or every reachable
//! peer has been tried. The [`Visited`] set travels with the request and
//! comes back with every reply, so each peer handles one logical request at
//! most once, even on a graph full of cycles.
//!
//! Neighbors are tried one at a time in identifier order. The first success
//! wins, which makes the answer deterministic for a fixed topology.
//!
//! Time is split two ways. Before a neighbor gets the operation it must
//! answer a ping within the hop timeout, so a dead or wedged peer costs one
//! hop timeout and nothing more. The operation itself then runs against the
//! flood budget: every forwarded request carries what is left of it, minus
//! [`HOP_MARGIN`], so a subtree always gives up before its caller does and
//! the caller still has time for the next sibling.
//!
//! No engine lock is held while a neighbor is being called: every engine
//! operation takes and releases its own path lock before the flood moves on.

use std::sync::Arc;
use std::time::Duration;

use meshfs_types::{FsOp, FsReply, Hop, PeerId, PeerInfo, RemoteError, Request, Response, Visited};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::constants::{DEFAULT_FLOOD_BUDGET, DEFAULT_HOP_TIMEOUT, HOP_MARGIN};
use crate::membership::Membership;
use crate::transport::PeerTransport;
use crate::vfs::{StorageEngine, VfsError};

/// Answers filesystem operations locally, or by asking the neighborhood.
pub struct FloodResolver {
    engine: Arc<StorageEngine>,
    membership: Arc<Membership>,
    transport: Arc<dyn PeerTransport>,
    hop_timeout: Duration,
    flood_budget: Duration,
}

impl FloodResolver {
    pub fn new(
        engine: Arc<StorageEngine>,
        membership: Arc<Membership>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            engine,
            membership,
            transport,
            hop_timeout: DEFAULT_HOP_TIMEOUT,
            flood_budget: DEFAULT_FLOOD_BUDGET,
        }
    }

    /// Bound on a neighbor's liveness ping.
    pub fn with_hop_timeout(mut self, hop_timeout: Duration) -> Self {
        self.hop_timeout = hop_timeout;
        self
    }

    /// Bound on a whole flood started here.
    pub fn with_flood_budget(mut self, flood_budget: Duration) -> Self {
        self.flood_budget = flood_budget;
        self
    }

    pub fn me(&self) -> &PeerId {
        &self.membership.me().id
    }

    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    pub fn transport(&self) -> &Arc<dyn PeerTransport> {
        &self.transport
    }

    /// Entry point for a direct call: start a fresh flood from here.
    ///
    /// This is the only place an exhausted `Exists` flood turns into
    /// `Exists(false)`; mid-flood it must stay a miss.
    pub async fn resolve(&self, op: FsOp) -> (Result<FsReply, RemoteError>, Visited) {
        let is_exists = matches!(op, FsOp::Exists { .. });
        let visited = Visited::seeded(self.me().clone());
        let (result, visited) = self.handle(op, visited, self.flood_budget).await;
        match result {
            Err(e) if is_exists && e.kind.is_miss() => (Ok(FsReply::Exists(false)), visited),
            other => (other, visited),
        }
    }

    /// One hop of a flood. Try locally; on a miss, walk the unvisited
    /// neighbors depth-first until one of them answers or `budget` runs out.
    pub async fn handle(
        &self,
        op: FsOp,
        mut visited: Visited,
        budget: Duration,
    ) -> (Result<FsReply, RemoteError>, Visited) {
        let deadline = Instant::now() + budget;
        let me = self.me().clone();
        visited.insert(me.clone());

        // Detached so that an abandoned flood cannot stop a mutation between
        // its physical step and its namespace commit.
        let local = {
            let engine = Arc::clone(&self.engine);
            let me = me.clone();
            let op = op.clone();
            tokio::spawn(async move { apply(&engine, &me, &op).await })
        };
        let miss = match local.await {
            Ok(Ok(reply)) => {
                debug!(peer = %me, op = op.name(), path = op.path(), "answered locally");
                return (Ok(reply), visited);
            }
            Ok(Err(e)) if !e.is_miss() => return (Err(e.into()), visited),
            Ok(Err(e)) => RemoteError::from(e),
            Err(e) => {
                error!(peer = %me, op = op.name(), error = %e, "local operation task failed");
                let failure = RemoteError::transport(format!("local {} failed: {e}", op.name()));
                return (Err(failure), visited);
            }
        };

        for neighbor in self.membership.list() {
            if visited.contains(&neighbor.id) {
                continue;
            }
            if deadline.saturating_duration_since(Instant::now()) <= HOP_MARGIN * 2 {
                warn!(peer = %me, op = op.name(), path = op.path(), "flood budget spent");
                break;
            }

            let alive = self.ping(&neighbor, deadline).await;
            if !alive {
                visited.insert(neighbor.id.clone());
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let hop = Hop {
                visited: visited.clone(),
                budget_ms: remaining.saturating_sub(HOP_MARGIN).as_millis() as u64,
            };
            debug!(
                peer = %me,
                neighbor = %neighbor.id,
                op = op.name(),
                path = op.path(),
                visited = visited.len(),
                budget_ms = hop.budget_ms,
                "forwarding"
            );
            let request = Request::Fs {
                op: op.clone(),
                hop: Some(hop),
            };
            let outcome = tokio::time::timeout(remaining, self.transport.call(&neighbor, request)).await;
            visited.insert(neighbor.id.clone());

            match outcome {
                Ok(Ok(Response::Fs {
                    result,
                    visited: theirs,
                })) => {
                    visited.merge(theirs);
                    match result {
                        Ok(reply) => return (Ok(reply), visited),
                        Err(e) if e.kind.is_miss() => {}
                        Err(e) => return (Err(e), visited),
                    }
                }
                Ok(Ok(other)) => {
                    warn!(peer = %me, neighbor = %neighbor.id, reply = ?other, "unexpected flood reply");
                }
                Ok(Err(e)) => {
                    warn!(peer = %me, neighbor = %neighbor.id, error = %e, "neighbor call failed");
                }
                Err(_) => {
                    warn!(
                        peer = %me,
                        neighbor = %neighbor.id,
                        budget_ms = remaining.as_millis() as u64,
                        "neighbor ran out of flood budget"
                    );
                }
            }
        }

        debug!(peer = %me, op = op.name(), path = op.path(), "flood exhausted");
        (Err(miss), visited)
    }

    /// Liveness check ahead of forwarding, bounded by the hop timeout.
    async fn ping(&self, neighbor: &PeerInfo, deadline: Instant) -> bool {
        let limit = self
            .hop_timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        match tokio::time::timeout(limit, self.transport.call(neighbor, Request::Ping)).await {
            Ok(Ok(Response::Pong(_))) => true,
            Ok(Ok(other)) => {
                warn!(peer = %self.me(), neighbor = %neighbor.id, reply = ?other, "unexpected ping reply");
                false
            }
            Ok(Err(e)) => {
                warn!(peer = %self.me(), neighbor = %neighbor.id, error = %e, "neighbor unreachable");
                false
            }
            Err(_) => {
                warn!(
                    peer = %self.me(),
                    neighbor = %neighbor.id,
                    timeout_ms = limit.as_millis() as u64,
                    "neighbor ping timed out"
                );
                false
            }
        }
    }
}

/// Run an operation against one engine only.
///
/// `Locate` and `Exists` report a miss as `NotFound` so that the flood keeps
/// looking.
async fn apply(engine: &StorageEngine, me: &PeerId, op: &FsOp) -> Result<FsReply, VfsError> {
    match op {
        FsOp::Mkdir { path } => engine.mkdir(path).await.map(|_| FsReply::Done),
        FsOp::Mknod { path } => engine.mknod(path).await.map(|_| FsReply::Done),
        FsOp::Symlink { target, link } => engine.symlink(target, link).await.map(|_| FsReply::Done),
        FsOp::Link { existing, new } => engine.link(existing, new).await.map(|_| FsReply::Done),
        FsOp::Write { path, data } => engine.write(path, data).await.map(|_| FsReply::Done),
        FsOp::Read { path } => engine.read(path).await.map(FsReply::Data),
        FsOp::Rename { from, to } => engine.rename(from, to).await.map(|_| FsReply::Done),
        FsOp::Rmdir { path } => engine.rmdir(path).await.map(|_| FsReply::Done),
        FsOp::Unlink { path } => engine.unlink(path).await.map(|_| FsReply::Done),
        FsOp::Readdir { path } => engine.readdir(path).await.map(FsReply::Names),
        FsOp::Readlink { path } => engine.readlink(path).await.map(FsReply::Target),
        FsOp::Getattr { path } => engine.getattr(path).await.map(FsReply::Attr),
        FsOp::Setattr { path, change } => engine
            .setattr(path, change.clone())
            .await
            .map(|_| FsReply::Done),
        FsOp::Locate { path } => match engine.exists(path).await? {
            true => Ok(FsReply::Located(me.clone())),
            false => Err(VfsError::not_found(path.clone())),
        },
        FsOp::Exists { path } => match engine.exists(path).await? {
            true => Ok(FsReply::Exists(true)),
            false => Err(VfsError::not_found(path.clone())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use meshfs_types::{ErrorKind, PeerInfo};
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};

    /// In-process network: every "address" is a resolver in this map.
    #[derive(Default)]
    struct Mesh {
        peers: Mutex<HashMap<PeerId, Arc<FloodResolver>>>,
        /// Flood requests each peer received.
        handled: Mutex<HashMap<PeerId, usize>>,
        dead: Mutex<HashSet<PeerId>>,
        /// Accept a call and never answer it.
        stalled: Mutex<HashSet<PeerId>>,
        /// Answer pings, sit on filesystem requests forever.
        wedged: Mutex<HashSet<PeerId>>,
    }

    impl Mesh {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn spawn(self: &Arc<Self>, name: &str) -> Arc<FloodResolver> {
            let me = PeerInfo::new(name, "mesh", 0);
            let transport: Arc<dyn PeerTransport> = Arc::clone(self) as Arc<dyn PeerTransport>;
            let resolver = Arc::new(
                FloodResolver::new(
                    Arc::new(StorageEngine::new()),
                    Arc::new(Membership::new(me.clone())),
                    transport,
                )
                .with_hop_timeout(Duration::from_millis(200))
                .with_flood_budget(Duration::from_secs(3)),
            );
            self.peers.lock().insert(me.id, Arc::clone(&resolver));
            resolver
        }

        fn calls(&self) -> usize {
            self.handled.lock().values().sum()
        }

        fn handled_by(&self, name: &str) -> usize {
            self.handled
                .lock()
                .get(&PeerId::new(name))
                .copied()
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl PeerTransport for Mesh {
        async fn call(&self, peer: &PeerInfo, request: Request) -> Result<Response, TransportError> {
            let dead = self.dead.lock().contains(&peer.id);
            if dead {
                return Err(TransportError::unreachable(peer, "connection refused"));
            }
            let stalled = self.stalled.lock().contains(&peer.id);
            if stalled {
                std::future::pending::<()>().await;
            }
            let target = self
                .peers
                .lock()
                .get(&peer.id)
                .cloned()
                .ok_or_else(|| TransportError::unreachable(peer, "unknown"))?;

            match request {
                Request::Ping => Ok(Response::Pong(peer.id.clone())),
                Request::Fs { op, hop } => {
                    *self.handled.lock().entry(peer.id.clone()).or_default() += 1;
                    let wedged = self.wedged.lock().contains(&peer.id);
                    if wedged {
                        std::future::pending::<()>().await;
                    }
                    let (result, visited) = match hop {
                        Some(hop) => {
                            let budget = Duration::from_millis(hop.budget_ms);
                            target.handle(op, hop.visited, budget).await
                        }
                        None => target.resolve(op).await,
                    };
                    Ok(Response::Fs { result, visited })
                }
                _ => Err(TransportError::protocol(peer, "mesh only carries fs requests")),
            }
        }
    }

    fn connect(a: &FloodResolver, b: &FloodResolver) {
        a.membership().add(b.membership().me().clone());
        b.membership().add(a.membership().me().clone());
    }

    fn disconnect(a: &FloodResolver, b: &FloodResolver) {
        a.membership().remove(b.me());
        b.membership().remove(a.me());
    }

    fn locate(path: &str) -> FsOp {
        FsOp::Locate { path: path.into() }
    }

    #[tokio::test]
    async fn test_local_hit_contacts_nobody() {
        let mesh = Mesh::new();
        let a = mesh.spawn("A");
        let b = mesh.spawn("B");
        connect(&a, &b);

        a.engine().mkdir("/a").await.unwrap();
        a.engine().mknod("/a/b.txt").await.unwrap();

        let (result, _) = a.resolve(locate("/a/b.txt")).await;
        assert_eq!(result.unwrap(), FsReply::Located(PeerId::new("A")));
        assert_eq!(mesh.calls(), 0);
    }

    #[tokio::test]
    async fn test_locate_round_trip_along_chain() {
        let mesh = Mesh::new();
        let peers: Vec<_> = ["A", "B", "C", "D"].iter().map(|n| mesh.spawn(n)).collect();
        for pair in peers.windows(2) {
            connect(&pair[0], &pair[1]);
        }
        let d = &peers[3];
        d.engine().mkdir("/a").await.unwrap();
        d.engine().mknod("/a/b.txt").await.unwrap();

        for from in &peers {
            let (result, _) = from.resolve(locate("/a/b.txt")).await;
            assert_eq!(result.unwrap(), FsReply::Located(PeerId::new("D")));
        }
    }

    #[tokio::test]
    async fn test_flood_terminates_on_complete_graph() {
        let mesh = Mesh::new();
        let names = ["A", "B", "C", "D", "E"];
        let peers: Vec<_> = names.iter().map(|n| mesh.spawn(n)).collect();
        for i in 0..peers.len() {
            for j in (i + 1)..peers.len() {
                connect(&peers[i], &peers[j]);
            }
        }

        let (result, visited) = peers[0].resolve(locate("/nowhere")).await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::NotFound);
        assert_eq!(visited.len(), names.len());
        for name in &names[1..] {
            assert_eq!(mesh.handled_by(name), 1, "{name} handled the flood more than once");
        }
        assert_eq!(mesh.handled_by("A"), 0);
    }

    #[tokio::test]
    async fn test_flood_terminates_on_ring() {
        let mesh = Mesh::new();
        let peers: Vec<_> = ["A", "B", "C", "D", "E", "F"]
            .iter()
            .map(|n| mesh.spawn(n))
            .collect();
        for i in 0..peers.len() {
            connect(&peers[i], &peers[(i + 1) % peers.len()]);
        }

        let (result, visited) = peers[2].resolve(locate("/missing")).await;
        assert!(result.is_err());
        assert_eq!(visited.len(), 6);
        assert_eq!(mesh.calls(), 5);
    }

    #[tokio::test]
    async fn test_graph_resilience() {
        // A - B - C
        // |       |
        // D ------+
        let mesh = Mesh::new();
        let a = mesh.spawn("A");
        let b = mesh.spawn("B");
        let c = mesh.spawn("C");
        let d = mesh.spawn("D");
        connect(&a, &b);
        connect(&b, &c);
        connect(&a, &d);
        connect(&d, &c);
        c.engine().mknod("/only-on-c").await.unwrap();

        let (result, _) = a.resolve(locate("/only-on-c")).await;
        assert_eq!(result.unwrap(), FsReply::Located(PeerId::new("C")));

        disconnect(&a, &b);
        let (result, _) = a.resolve(locate("/only-on-c")).await;
        assert_eq!(result.unwrap(), FsReply::Located(PeerId::new("C")));

        disconnect(&d, &c);
        let (result, _) = a.resolve(locate("/only-on-c")).await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_dead_neighbor_does_not_abort_siblings() {
        let mesh = Mesh::new();
        let a = mesh.spawn("A");
        let b = mesh.spawn("B");
        let c = mesh.spawn("C");
        connect(&a, &b);
        connect(&a, &c);
        c.engine().mknod("/on-c").await.unwrap();
        mesh.dead.lock().insert(PeerId::new("B"));

        let (result, visited) = a.resolve(locate("/on-c")).await;
        assert_eq!(result.unwrap(), FsReply::Located(PeerId::new("C")));
        assert!(visited.contains(&PeerId::new("B")));
    }

    #[tokio::test]
    async fn test_stalled_neighbor_times_out() {
        let mesh = Mesh::new();
        let a = mesh.spawn("A");
        let b = mesh.spawn("B");
        let c = mesh.spawn("C");
        connect(&a, &b);
        connect(&a, &c);
        c.engine().mknod("/on-c").await.unwrap();
        mesh.stalled.lock().insert(PeerId::new("B"));

        let (result, _) = a.resolve(locate("/on-c")).await;
        assert_eq!(result.unwrap(), FsReply::Located(PeerId::new("C")));
    }

    #[tokio::test]
    async fn test_stalled_peer_two_hops_away_spares_siblings() {
        // A - B - C (stalled)
        //      \
        //       D
        let mesh = Mesh::new();
        let a = mesh.spawn("A");
        let b = mesh.spawn("B");
        let c = mesh.spawn("C");
        let d = mesh.spawn("D");
        connect(&a, &b);
        connect(&b, &c);
        connect(&b, &d);
        d.engine().mknod("/on-d").await.unwrap();
        mesh.stalled.lock().insert(PeerId::new("C"));

        let (result, visited) = a.resolve(locate("/on-d")).await;
        assert_eq!(result.unwrap(), FsReply::Located(PeerId::new("D")));
        assert!(visited.contains(&PeerId::new("C")));
        assert_eq!(mesh.handled_by("C"), 0);
    }

    #[tokio::test]
    async fn test_wedged_neighbor_is_bounded_by_flood_budget() {
        let mesh = Mesh::new();
        let a = mesh.spawn("A");
        let b = mesh.spawn("B");
        connect(&a, &b);
        mesh.wedged.lock().insert(PeerId::new("B"));

        let started = Instant::now();
        let (result, _) = a
            .handle(locate("/anywhere"), Visited::new(), Duration::from_millis(500))
            .await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::NotFound);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(mesh.handled_by("B"), 1);
    }

    #[tokio::test]
    async fn test_definite_error_is_not_forwarded() {
        let mesh = Mesh::new();
        let a = mesh.spawn("A");
        let b = mesh.spawn("B");
        connect(&a, &b);
        a.engine().mkdir("/taken").await.unwrap();

        let (result, _) = a.resolve(FsOp::Mkdir { path: "/taken".into() }).await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::AlreadyExists);

        let (result, _) = a.resolve(FsOp::Mkdir { path: "/../up".into() }).await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::TraversalSecurity);
        assert_eq!(mesh.calls(), 0);
    }

    #[tokio::test]
    async fn test_create_lands_on_parent_owner() {
        let mesh = Mesh::new();
        let a = mesh.spawn("A");
        let b = mesh.spawn("B");
        connect(&a, &b);
        b.engine().mkdir("/docs").await.unwrap();

        let (result, _) = a.resolve(FsOp::Mknod { path: "/docs/new.txt".into() }).await;
        assert_eq!(result.unwrap(), FsReply::Done);
        let (result, _) = a
            .resolve(FsOp::Write {
                path: "/docs/new.txt".into(),
                data: b"remote".to_vec(),
            })
            .await;
        assert_eq!(result.unwrap(), FsReply::Done);

        assert_eq!(b.engine().read("/docs/new.txt").await.unwrap(), b"remote");
        assert!(!a.engine().exists("/docs/new.txt").await.unwrap());

        let (result, _) = a.resolve(FsOp::Read { path: "/docs/new.txt".into() }).await;
        assert_eq!(result.unwrap(), FsReply::Data(b"remote".to_vec()));
    }

    #[tokio::test]
    async fn test_exists_is_false_only_at_the_top() {
        let mesh = Mesh::new();
        let a = mesh.spawn("A");
        let b = mesh.spawn("B");
        let c = mesh.spawn("C");
        connect(&a, &b);
        connect(&b, &c);
        c.engine().mknod("/deep").await.unwrap();

        let (result, _) = a.resolve(FsOp::Exists { path: "/deep".into() }).await;
        assert_eq!(result.unwrap(), FsReply::Exists(true));

        let (result, _) = a.resolve(FsOp::Exists { path: "/gone".into() }).await;
        assert_eq!(result.unwrap(), FsReply::Exists(false));

        let (result, _) = a
            .handle(FsOp::Exists { path: "/gone".into() }, Visited::new(), Duration::from_secs(1))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_isolated_peer_reports_not_found() {
        let mesh = Mesh::new();
        let a = mesh.spawn("A");
        let (result, visited) = a.resolve(FsOp::Read { path: "/x".into() }).await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::NotFound);
        assert_eq!(visited.len(), 1);
    }
}
