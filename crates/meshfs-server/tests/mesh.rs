//! End-to-end tests: real peers on ephemeral localhost ports, talking TCP.

use std::time::Duration;

use meshfs_client::{ClientError, MessageStream, PeerClient};
use meshfs_server::{PeerConfig, PeerNode};
use meshfs_types::{ErrorKind, FsOp, PeerId, PeerInfo, Request};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

async fn start(name: &str) -> PeerNode {
    let config = PeerConfig {
        hop_timeout_ms: 500,
        flood_timeout_ms: 10_000,
        connect_timeout_ms: 500,
        ..PeerConfig::ephemeral(name)
    };
    PeerNode::start(&config).await.unwrap()
}

async fn client(node: &PeerNode) -> PeerClient {
    PeerClient::connect(node.local_addr().to_string())
        .await
        .unwrap()
}

/// Symmetric edge without going through the join protocol.
fn connect(a: &PeerNode, b: &PeerNode) {
    a.membership().add(b.me().clone());
    b.membership().add(a.me().clone());
}

async fn cut(a: &PeerNode, b: &PeerNode) {
    client(a).await.remove_neighbor(b.me().id.clone()).await.unwrap();
    client(b).await.remove_neighbor(a.me().id.clone()).await.unwrap();
}

/// A "peer" that accepts connections and never answers. Each connection
/// reports on the channel once the other side lets go of it.
async fn silent_peer(name: &str) -> (PeerInfo, mpsc::UnboundedReceiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = stream.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
                let _ = tx.send(());
            });
        }
    });
    (PeerInfo::new(name, "127.0.0.1", port), rx)
}

fn is_not_found(err: &ClientError) -> bool {
    matches!(err, ClientError::Remote(e) if e.kind == ErrorKind::NotFound)
}

#[tokio::test]
async fn test_join_forms_complete_graph() {
    let a = start("A").await;
    let b = start("B").await;
    let c = start("C").await;

    assert_eq!(b.join_network(a.me()).await.unwrap(), 1);
    assert_eq!(c.join_network(a.me()).await.unwrap(), 2);

    for node in [&a, &b, &c] {
        assert_eq!(node.membership().len(), 2, "{} neighbors", node.me().id);
    }

    let mut to_b = client(&b).await;
    let listed = to_b.neighbors().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().any(|s| s.starts_with("C:")));
}

#[tokio::test]
async fn test_locate_and_read_across_peers() {
    let a = start("A").await;
    let b = start("B").await;
    let c = start("C").await;
    connect(&a, &b);
    connect(&b, &c);

    let mut to_c = client(&c).await;
    to_c.mkdir("/a").await.unwrap();
    to_c.mknod("/a/b.txt").await.unwrap();
    to_c.write("/a/b.txt", b"hello from C").await.unwrap();

    let mut to_a = client(&a).await;
    assert_eq!(to_a.locate("/a/b.txt").await.unwrap(), PeerId::new("C"));
    assert_eq!(to_a.read("/a/b.txt").await.unwrap(), b"hello from C");
    assert!(to_a.exists("/a/b.txt").await.unwrap());
    assert!(!to_a.exists("/a/missing").await.unwrap());

    // Local-first: A holds nothing itself.
    assert!(to_a.list_all_paths().await.unwrap().is_empty());
    assert_eq!(
        to_c.list_all_paths().await.unwrap(),
        vec!["/a", "/a/b.txt"]
    );

    // A create under C's directory lands on C.
    to_a.mknod("/a/from-a.txt").await.unwrap();
    assert_eq!(to_a.locate("/a/from-a.txt").await.unwrap(), PeerId::new("C"));
    assert!(a.engine().list_all_paths().is_empty());
}

#[tokio::test]
async fn test_graph_resilience() {
    let a = start("A").await;
    let b = start("B").await;
    let c = start("C").await;
    let d = start("D").await;
    connect(&a, &b);
    connect(&b, &c);
    connect(&a, &d);
    connect(&d, &c);
    c.engine().mknod("/only-on-c").await.unwrap();

    let mut to_a = client(&a).await;
    assert_eq!(to_a.locate("/only-on-c").await.unwrap(), PeerId::new("C"));

    cut(&a, &b).await;
    assert_eq!(to_a.locate("/only-on-c").await.unwrap(), PeerId::new("C"));

    cut(&d, &c).await;
    let err = to_a.locate("/only-on-c").await.unwrap_err();
    assert!(is_not_found(&err), "{err}");
}

#[tokio::test]
async fn test_dead_neighbor_is_skipped() {
    let a = start("A").await;
    let b = start("B").await;
    let c = start("C").await;
    connect(&a, &b);
    connect(&a, &c);
    c.engine().mknod("/on-c").await.unwrap();

    b.shutdown().await;

    let mut to_a = client(&a).await;
    assert_eq!(to_a.locate("/on-c").await.unwrap(), PeerId::new("C"));
}

#[tokio::test]
async fn test_silent_peer_behind_a_neighbor_spares_siblings() {
    // A - B - C (silent)
    //      \
    //       D
    let a = start("A").await;
    let b = start("B").await;
    let d = start("D").await;
    connect(&a, &b);
    connect(&b, &d);
    let (silent, _closed) = silent_peer("C").await;
    b.membership().add(silent);
    d.engine().mknod("/on-d").await.unwrap();

    let mut to_a = client(&a).await;
    assert_eq!(to_a.locate("/on-d").await.unwrap(), PeerId::new("D"));
    assert!(to_a.exists("/on-d").await.unwrap());
}

#[tokio::test]
async fn test_hung_up_caller_cancels_the_flood() {
    let config = PeerConfig {
        hop_timeout_ms: 5_000,
        ..PeerConfig::ephemeral("B")
    };
    let b = PeerNode::start(&config).await.unwrap();
    let (silent, mut closed) = silent_peer("C").await;
    b.membership().add(silent);

    let stream = TcpStream::connect(b.local_addr()).await.unwrap();
    let mut messages = MessageStream::new(stream);
    messages
        .send(&Request::Fs {
            op: FsOp::Locate {
                path: "/nowhere".into(),
            },
            hop: None,
        })
        .await
        .unwrap();
    // Give B time to reach the silent peer, then walk away.
    tokio::time::sleep(Duration::from_millis(200)).await;
    drop(messages);

    // B lets go of C long before its 5s ping timeout would have.
    let released = tokio::time::timeout(Duration::from_secs(2), closed.recv()).await;
    assert!(matches!(released, Ok(Some(()))));
}

#[tokio::test]
async fn test_leave_removes_peer_everywhere() {
    let a = start("A").await;
    let b = start("B").await;
    let c = start("C").await;
    b.join_network(a.me()).await.unwrap();
    c.join_network(a.me()).await.unwrap();

    assert_eq!(c.leave_network().await, 2);
    c.shutdown().await;

    let gone = PeerId::new("C");
    assert!(!a.membership().contains(&gone));
    assert!(!b.membership().contains(&gone));
}

#[tokio::test]
async fn test_definite_errors_reach_the_client() {
    let a = start("A").await;
    let mut to_a = client(&a).await;
    to_a.mkdir("/d").await.unwrap();
    to_a.mknod("/d/f").await.unwrap();

    let err = to_a.mkdir("/d").await.unwrap_err();
    assert!(matches!(&err, ClientError::Remote(e) if e.kind == ErrorKind::AlreadyExists));

    let err = to_a.rmdir("/d").await.unwrap_err();
    assert!(matches!(&err, ClientError::Remote(e) if e.kind == ErrorKind::NotEmpty));

    let err = to_a.mknod("/../escape").await.unwrap_err();
    assert!(matches!(&err, ClientError::Remote(e) if e.kind == ErrorKind::TraversalSecurity));

    // The connection survives failed calls.
    assert_eq!(to_a.ping().await.unwrap(), PeerId::new("A"));
}

#[tokio::test]
async fn test_restart_from_data_dir() {
    let dir = TempDir::new().unwrap();
    let config = PeerConfig {
        data_dir: Some(dir.path().join("A")),
        ..PeerConfig::ephemeral("A")
    };

    let node = PeerNode::start(&config).await.unwrap();
    let mut to_a = client(&node).await;
    to_a.mkdir("/docs").await.unwrap();
    to_a.mknod("/docs/notes.txt").await.unwrap();
    to_a.write("/docs/notes.txt", b"kept on disk").await.unwrap();
    drop(to_a);
    node.shutdown().await;

    let node = PeerNode::start(&config).await.unwrap();
    let mut to_a = client(&node).await;
    assert_eq!(
        to_a.read("/docs/notes.txt").await.unwrap(),
        b"kept on disk"
    );
}

#[tokio::test]
async fn test_concurrent_clients_write_whole_buffers() {
    let a = start("A").await;
    client(&a).await.mknod("/shared.txt").await.unwrap();
    let addr = a.local_addr().to_string();

    let mut tasks = Vec::new();
    for i in 0..16 {
        let addr = addr.clone();
        tasks.push(tokio::spawn(async move {
            let payload = format!("client {i} ").repeat(500).into_bytes();
            let mut c = PeerClient::connect(addr).await.unwrap();
            c.write("/shared.txt", &payload).await.unwrap();
            payload
        }));
    }
    let mut payloads = Vec::new();
    for t in tasks {
        payloads.push(t.await.unwrap());
    }

    let last = tokio::time::timeout(Duration::from_secs(5), async {
        client(&a).await.read("/shared.txt").await.unwrap()
    })
    .await
    .unwrap();
    assert!(payloads.contains(&last));
}
