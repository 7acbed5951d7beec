//! # meshfs-kernel
//!
//! The parts of a meshfs peer that do not care how bytes travel:
//!
//! - [`vfs`] - the local storage engine (namespace, per-path locks,
//!   write-through mirror)
//! - [`membership`] - who this peer knows, and the join/leave protocol
//! - [`flood`] - visited-set resolution across the acquaintance graph
//! - [`transport`] - the [`PeerTransport`] seam the network layer implements
//!
//! A peer runtime wires one of each together: the engine and the membership
//! directory are the leaves, the resolver sits on top and calls neighbors
//! through whatever transport it was given.

pub mod constants;
pub mod flood;
pub mod membership;
pub mod transport;
pub mod vfs;

pub use flood::FloodResolver;
pub use membership::{Membership, MembershipError};
pub use transport::{PeerTransport, TransportError};
pub use vfs::{LockTable, StorageEngine, VfsError, VfsResult, VirtualPath};
