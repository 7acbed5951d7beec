//! Local storage engine.
//!
//! - [`StorageEngine`] - the namespace, its locks, and the optional mirror
//! - [`VirtualPath`] - parsed, normalized virtual paths
//! - [`LockTable`] - one reader/writer lock per path string
//!
//! ## Design Decisions
//!
//! - **Arena, not pointers**: nodes live in a map keyed by id. Directories
//!   hold child ids, children hold a non-owning parent id.
//! - **Shared payloads**: hard links point at one ref-counted blob.
//! - **Disk first**: when mounted, the physical change happens before the
//!   in-memory commit, so a failed syscall leaves the tree untouched.

mod engine;
mod error;
mod locks;
mod mirror;
mod path;
mod tree;

pub use engine::StorageEngine;
pub use error::{VfsError, VfsResult};
pub use locks::LockTable;
pub use path::{VirtualPath, validate_name};
