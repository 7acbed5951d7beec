//! Interactive shell for a meshfs peer.
//!
//! ## Usage
//!
//! ```bash
//! meshfs-shell                  # connect to 127.0.0.1:7000
//! meshfs-shell 10.0.0.5:7001
//! ```

use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use meshfs_client::constants::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_PEER_ADDR};
use meshfs_client::shell::HELP;
use meshfs_client::{Command, PeerClient};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "meshfs-shell", about = "Talk to a meshfs peer")]
struct Args {
    /// Peer address, host:port
    #[arg(default_value = DEFAULT_PEER_ADDR)]
    addr: String,

    /// TCP connect timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_millis() as u64)]
    connect_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut client = PeerClient::connect_with_timeout(
        args.addr.clone(),
        Duration::from_millis(args.connect_timeout_ms),
    )
    .await
    .with_context(|| format!("connecting to {}", args.addr))?;

    let me = client.ping().await.context("ping")?;
    println!("connected to {me} at {}", client.addr());
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{me}> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        if command == Command::Exit {
            break;
        }
        match command.run(&mut client).await {
            Ok(out) if out.is_empty() => {}
            Ok(out) => println!("{out}"),
            Err(e) => println!("error: {e}"),
        }
    }
    Ok(())
}
