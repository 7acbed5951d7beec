//! meshfs peer binary
//!
//! ## Usage
//!
//! ```bash
//! # First peer: an isolated network of one
//! meshfs-peer A 127.0.0.1 7000 ./data/A
//!
//! # Later peers join through any existing one
//! meshfs-peer B 127.0.0.1 7001 ./data/B A:127.0.0.1:7000
//!
//! # Or from a file, with command-line overrides
//! meshfs-peer --config peer.toml --port 7002
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use meshfs_server::{PeerConfig, PeerNode};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "meshfs-peer", about = "Run a meshfs peer")]
struct Args {
    /// Peer name, unique in the network
    name: Option<String>,
    /// Host to bind and advertise
    host: Option<String>,
    /// Port to listen on (0 picks one)
    port: Option<u16>,
    /// Directory mirrored by this peer's storage
    data_dir: Option<PathBuf>,
    /// Existing peer to join through, as name:host:port
    bootstrap: Option<String>,

    /// TOML config file; command-line values win over it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Neighbor liveness ping timeout in milliseconds
    #[arg(long)]
    hop_timeout_ms: Option<u64>,

    /// Total time a flood started here may take, in milliseconds
    #[arg(long)]
    flood_timeout_ms: Option<u64>,

    /// TCP connect timeout in milliseconds
    #[arg(long)]
    connect_timeout_ms: Option<u64>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<PeerConfig> {
        let mut config = match &self.config {
            Some(path) => PeerConfig::load(path)?,
            None => PeerConfig::default(),
        };
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = Some(dir);
        }
        if let Some(bootstrap) = self.bootstrap {
            config.bootstrap = Some(bootstrap);
        }
        if let Some(ms) = self.hop_timeout_ms {
            config.hop_timeout_ms = ms;
        }
        if let Some(ms) = self.flood_timeout_ms {
            config.flood_timeout_ms = ms;
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout_ms = ms;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Args::parse().into_config()?;
    let node = PeerNode::start(&config)
        .await
        .with_context(|| format!("starting peer {}", config.name))?;

    match config.bootstrap_peer()? {
        Some(bootstrap) => {
            let neighbors = node
                .join_network(&bootstrap)
                .await
                .with_context(|| format!("joining through {bootstrap}"))?;
            info!(peer = %node.me(), neighbors, "ready");
        }
        None => info!(peer = %node.me(), "ready, no bootstrap: starting a new network"),
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c, shutting down");
    }
    info!(peer = %node.me(), "shutting down");
    node.leave_network().await;
    node.shutdown().await;
    Ok(())
}
