//! Wire-safe error kinds.
//!
//! Local engine errors never cross the network as Rust types; they are
//! flattened into a [`RemoteError`] carrying one of these kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error taxonomy shared by every peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed path or argument. Rejected before any state change.
    Validation,
    /// Target or an intermediate segment missing, or of the wrong kind.
    NotFound,
    /// A create-style operation hit an existing name.
    AlreadyExists,
    /// `rmdir` on a non-empty directory.
    NotEmpty,
    /// A physical path would escape the mount root.
    TraversalSecurity,
    /// The mirrored disk operation failed. The namespace is unchanged.
    PhysicalIo,
    /// A neighbor could not be reached, or answered garbage.
    Transport,
    /// The open/close gate is already in the requested state.
    State,
}

impl ErrorKind {
    /// Whether a flood should keep looking elsewhere after this error.
    ///
    /// Only misses are forwarded. Every other kind is a definite answer
    /// from the peer that produced it.
    pub fn is_miss(&self) -> bool {
        matches!(self, ErrorKind::NotFound)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::NotEmpty => "not empty",
            ErrorKind::TraversalSecurity => "traversal",
            ErrorKind::PhysicalIo => "physical i/o",
            ErrorKind::Transport => "transport",
            ErrorKind::State => "state",
        };
        f.write_str(s)
    }
}

/// An error as seen from the other side of the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }
}
