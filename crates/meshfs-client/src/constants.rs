//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Default peer address for the shell.
pub const DEFAULT_PEER_ADDR: &str = "127.0.0.1:7000";

/// How long to wait for a TCP connect before giving up on a peer.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Largest frame either side will accept. Whole-file writes travel in one
/// frame, so this is also the largest file that can cross the wire.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;
