//! Storage engine error types.

use std::io;
use std::path::Path;

use meshfs_types::{ErrorKind, RemoteError};
use thiserror::Error;

/// Storage engine error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a regular file.
    #[error("not a file: {0}")]
    NotAFile(String),

    /// Not a symbolic link.
    #[error("not a symbolic link: {0}")]
    NotASymlink(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Path escapes root (security violation).
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Too many symbolic links.
    #[error("too many symbolic links: {0}")]
    TooManySymlinks(String),

    #[error("already open: {0}")]
    AlreadyOpen(String),

    #[error("not open: {0}")]
    NotOpen(String),

    /// Mirrored disk operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create a NotAFile error.
    pub fn not_a_file(path: impl Into<String>) -> Self {
        Self::NotAFile(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Wrap a physical I/O failure with the real path it happened on.
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Where this error sits in the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VfsError::NotFound(_)
            | VfsError::NotADirectory(_)
            | VfsError::NotAFile(_)
            | VfsError::NotASymlink(_)
            | VfsError::TooManySymlinks(_) => ErrorKind::NotFound,
            VfsError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            VfsError::DirectoryNotEmpty(_) => ErrorKind::NotEmpty,
            VfsError::PathEscapesRoot(_) => ErrorKind::TraversalSecurity,
            VfsError::InvalidPath(_) => ErrorKind::Validation,
            VfsError::AlreadyOpen(_) | VfsError::NotOpen(_) => ErrorKind::State,
            VfsError::Io { .. } => ErrorKind::PhysicalIo,
        }
    }

    /// A miss is worth asking a neighbor about.
    pub fn is_miss(&self) -> bool {
        self.kind().is_miss()
    }
}

impl From<VfsError> for RemoteError {
    fn from(e: VfsError) -> Self {
        RemoteError::new(e.kind(), e.to_string())
    }
}

/// Storage engine result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy() {
        assert_eq!(VfsError::not_a_directory("/f").kind(), ErrorKind::NotFound);
        assert_eq!(
            VfsError::TooManySymlinks("/loop".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            VfsError::path_escapes_root("/..").kind(),
            ErrorKind::TraversalSecurity
        );
        assert_eq!(
            VfsError::io(Path::new("/tmp/x"), io::Error::other("disk")).kind(),
            ErrorKind::PhysicalIo
        );
        assert!(VfsError::not_found("/x").is_miss());
        assert!(!VfsError::already_exists("/x").is_miss());
    }

    #[test]
    fn remote_error_keeps_kind_and_message() {
        let remote: RemoteError = VfsError::directory_not_empty("/d").into();
        assert_eq!(remote.kind, ErrorKind::NotEmpty);
        assert_eq!(remote.message, "directory not empty: /d");
    }
}
