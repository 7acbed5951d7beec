//! Server configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Default listen port for a peer.
pub const DEFAULT_PORT: u16 = 7000;

/// Default bind address (localhost only).
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default peer name when neither the command line nor a config file
/// provides one.
pub const DEFAULT_NAME: &str = "peer";

/// Upper bound on the whole best-effort leave at shutdown.
pub const LEAVE_TIMEOUT: Duration = Duration::from_secs(10);
