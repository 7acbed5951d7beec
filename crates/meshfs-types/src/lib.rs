//! Shared types for meshfs.
//!
//! This is the leaf crate every other meshfs crate builds on. It has **no
//! internal meshfs dependencies**: only the vocabulary that crosses the wire
//! between peers.
//!
//! # Key Types
//!
//! |-------------------|----------------------------------------------|
//! | Type              | Purpose                                      |
//! |-------------------|----------------------------------------------|
//! | [`PeerId`]        | Who (a peer's unique name)                   |
//! | [`PeerInfo`]      | Who + where (`name:host:port`)               |
//! | [`Visited`]       | Per-request loop breaker for floods          |
//! | [`Hop`]           | Visited set + time budget of a forwarded op  |
//! | [`FsOp`]          | A filesystem operation, floodable            |
//! | [`FsReply`]       | Successful result of an [`FsOp`]             |
//! | [`NodeAttr`]      | `getattr` result                             |
//! | [`Request`]       | Everything one peer can ask another          |
//! | [`Response`]      | Everything a peer answers with               |
//! | [`RemoteError`]   | Error kind + message, wire-safe              |
//! |-------------------|----------------------------------------------|

pub mod attr;
pub mod error;
pub mod ids;
pub mod protocol;

pub use attr::{NodeAttr, NodeKind, SetAttr};
pub use error::{ErrorKind, RemoteError};
pub use ids::{PeerId, PeerInfo, PeerInfoParseError};
pub use protocol::{FsOp, FsReply, Hop, Request, Response, Visited, WireError, decode, encode};
