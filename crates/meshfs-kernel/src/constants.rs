//! Kernel constants.

use std::time::Duration;

/// Symlink hops allowed during one path resolution.
pub const MAX_SYMLINK_HOPS: usize = 40;

/// How long a neighbor gets to prove it is alive before the flood skips it.
pub const DEFAULT_HOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Total time a top-level flood may take, every branch included.
pub const DEFAULT_FLOOD_BUDGET: Duration = Duration::from_secs(30);

/// Held back from each forwarded budget so the reply can travel home before
/// the caller's own deadline.
pub const HOP_MARGIN: Duration = Duration::from_millis(100);
