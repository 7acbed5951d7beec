//! Node attributes.
//!
//! These are designed to be wire-friendly: plain data, no handles.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Kind of a namespace node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Directory,
    File,
    Symlink,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Directory => "directory",
            NodeKind::File => "file",
            NodeKind::Symlink => "symlink",
        }
    }
}

/// Node attributes (metadata), as returned by `getattr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttr {
    /// Entry name (not full path). The root is named `/`.
    pub name: String,
    pub kind: NodeKind,
    /// Payload length for files, target length for symlinks, child count
    /// for directories.
    pub size: u64,
    /// Number of names sharing this payload. Always 1 for non-files.
    pub nlink: u32,
    pub created: SystemTime,
    pub modified: SystemTime,
    /// State of the single-holder open/close gate.
    pub open: bool,
}

/// A metadata change for `setattr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetAttr {
    /// Rename the entry in place (same parent directory).
    Name(String),
    /// Set the last-modification timestamp.
    Modified(SystemTime),
}
