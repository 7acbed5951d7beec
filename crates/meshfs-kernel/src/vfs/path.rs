//! Virtual paths.
//!
//! A virtual path is `/`-separated and always absolute. Parsing normalizes
//! it lexically: empty and `.` segments vanish, `..` pops the previous
//! segment. A `..` that would climb above `/` is a traversal attempt and is
//! rejected outright, long before anything touches the mirror.

use std::fmt;

use super::error::{VfsError, VfsResult};

/// A normalized, absolute virtual path.
///
/// The normalized string form is also the lock-table key, so two spellings
/// of one path (`/a/./b`, `/a//b`) share a lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualPath {
    segments: Vec<String>,
}

impl VirtualPath {
    /// Parse and normalize a virtual path.
    pub fn parse(raw: &str) -> VfsResult<Self> {
        if !raw.starts_with('/') {
            return Err(VfsError::invalid_path(format!("{raw:?} is not absolute")));
        }
        if raw.contains('\0') {
            return Err(VfsError::invalid_path(format!("{raw:?} contains NUL")));
        }

        let mut segments: Vec<String> = Vec::new();
        for part in raw.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(VfsError::path_escapes_root(raw));
                    }
                }
                name => segments.push(name.to_string()),
            }
        }
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Containing directory. The root is its own parent.
    pub fn parent(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.pop();
        Self { segments }
    }

    /// Append one already-validated name.
    pub fn join(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// Check a single entry name (for in-place renames).
pub fn validate_name(name: &str) -> VfsResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(VfsError::invalid_path(format!("{name:?} is not a valid name")));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(VfsError::invalid_path(format!(
            "{name:?} contains a separator or NUL"
        )));
    }
    Ok(())
}
