//! meshfs peer runtime
//!
//! Binds a TCP listener in front of a [`FloodResolver`](meshfs_kernel::FloodResolver)
//! and manages the peer's place in the network: start, join, leave.

pub mod config;
pub mod constants;
pub mod node;
pub mod server;

pub use config::{ConfigError, PeerConfig};
pub use node::{PeerNode, PeerService, ServerError};
