//! meshfs client library
//!
//! Framed TCP messaging between peers, a [`PeerTransport`] for the kernel's
//! flood resolver, and a typed [`PeerClient`] for shells and tests.
//!
//! [`PeerTransport`]: meshfs_kernel::PeerTransport

pub mod codec;
pub mod constants;
pub mod rpc;
pub mod shell;

pub use codec::{CodecError, MessageStream};
pub use rpc::{ClientError, Connection, PeerClient, TcpTransport};
pub use shell::{Command, ParseError};
