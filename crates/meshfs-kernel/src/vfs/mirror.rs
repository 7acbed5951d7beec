//! Write-through mirroring to a real directory tree.
//!
//! Every physical path is computed from the mount root plus the node's
//! position in the virtual tree, and checked to stay under the root before
//! any syscall is made.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use tracing::{debug, warn};

use super::error::{VfsError, VfsResult};
use super::tree::{NewNode, NodeId, Tree};

/// What happened when mirroring a symlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SymlinkMirror {
    Created,
    /// The platform has no usable symlinks; the link lives in memory only.
    InMemoryOnly,
}

/// The real directory bound to a storage engine.
#[derive(Debug, Clone)]
pub(crate) struct Mirror {
    root: PathBuf,
}

impl Mirror {
    /// Bind to an existing directory. The root is canonicalized once here
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub async fn bind(root: &Path) -> VfsResult<Self> {
        let meta = fs::metadata(root)
            .await
            .map_err(|e| VfsError::io(root, e))?;
        if !meta.is_dir() {
            return Err(VfsError::invalid_path(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        let root = fs::canonicalize(root)
            .await
            .map_err(|e| VfsError::io(root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map virtual path segments onto the real tree.
    pub fn physical(&self, segments: &[String]) -> VfsResult<PathBuf> {
        let mut path = self.root.clone();
        for segment in segments {
            if segment.is_empty()
                || segment == "."
                || segment == ".."
                || segment.contains('/')
                || segment.contains(std::path::MAIN_SEPARATOR)
            {
                return Err(VfsError::path_escapes_root(format!("/{}", segments.join("/"))));
            }
            path.push(segment);
        }
        if !path.starts_with(&self.root) {
            return Err(VfsError::path_escapes_root(path.display().to_string()));
        }
        Ok(path)
    }

    pub async fn create_dir(&self, path: &Path) -> VfsResult<()> {
        fs::create_dir(path).await.map_err(|e| VfsError::io(path, e))
    }

    pub async fn create_file(&self, path: &Path) -> VfsResult<()> {
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await
            .map(|_| ())
            .map_err(|e| VfsError::io(path, e))
    }

    #[cfg(unix)]
    pub async fn symlink(&self, target: &str, path: &Path) -> VfsResult<SymlinkMirror> {
        fs::symlink(target, path)
            .await
            .map(|_| SymlinkMirror::Created)
            .map_err(|e| VfsError::io(path, e))
    }

    #[cfg(not(unix))]
    pub async fn symlink(&self, target: &str, path: &Path) -> VfsResult<SymlinkMirror> {
        warn!(
            target,
            path = %path.display(),
            "symlinks not supported on this platform, keeping in memory only"
        );
        Ok(SymlinkMirror::InMemoryOnly)
    }

    pub async fn write_file(&self, path: &Path, data: &[u8]) -> VfsResult<()> {
        fs::write(path, data).await.map_err(|e| VfsError::io(path, e))
    }

    pub async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        fs::rename(from, to).await.map_err(|e| VfsError::io(from, e))
    }

    /// Rename a file or symlink that may never have reached the disk.
    /// Returns whether anything moved.
    pub async fn rename_if_present(&self, from: &Path, to: &Path) -> VfsResult<bool> {
        match fs::symlink_metadata(from).await {
            Ok(_) => self.rename(from, to).await.map(|_| true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %from.display(), "nothing on disk to rename");
                Ok(false)
            }
            Err(e) => Err(VfsError::io(from, e)),
        }
    }

    pub async fn remove_dir(&self, path: &Path) -> VfsResult<()> {
        fs::remove_dir(path).await.map_err(|e| VfsError::io(path, e))
    }

    /// Remove a file or symlink. A name that never reached the disk (a hard
    /// link, an in-memory-only symlink) is not an error.
    pub async fn remove_file(&self, path: &Path) -> VfsResult<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VfsError::io(path, e)),
        }
    }

    /// Set the modification time of a file or directory. As with
    /// [`remove_file`](Self::remove_file), a name that is not on disk is
    /// not an error.
    pub async fn set_modified(&self, path: &Path, when: SystemTime, is_dir: bool) -> VfsResult<()> {
        let target = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || {
            let file = if is_dir {
                std::fs::File::open(&target)?
            } else {
                std::fs::OpenOptions::new().write(true).open(&target)?
            };
            file.set_modified(when)
        })
        .await
        .map_err(|e| VfsError::io(path, io::Error::other(e)))?;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VfsError::io(path, e)),
        }
    }

    /// Best-effort undo of a physical create whose in-memory commit lost a
    /// race. Failures are logged, not returned.
    pub async fn discard(&self, path: &Path, was_dir: bool) {
        let result = if was_dir {
            fs::remove_dir(path).await
        } else {
            fs::remove_file(path).await
        };
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to undo physical create");
        }
    }

    /// Build a tree from the real directory.
    ///
    /// Directories are recursed, regular files loaded fully into memory,
    /// symlinks captured with their raw target. Anything else is skipped, as
    /// is any entry that cannot be read.
    pub async fn scan(&self) -> VfsResult<Tree> {
        let mut tree = Tree::new();
        let mut stack: Vec<(PathBuf, NodeId)> = vec![(self.root.clone(), tree.root())];
        // Applied last: inserting a child bumps its directory's mtime.
        let mut mtimes: Vec<(NodeId, SystemTime)> = Vec::new();

        while let Some((dir, node)) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if dir == self.root => return Err(VfsError::io(&dir, e)),
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "skipping unreadable directory");
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(path = %dir.display(), error = %e, "directory listing cut short");
                        break;
                    }
                };
                let Ok(name) = entry.file_name().into_string() else {
                    warn!(path = %entry.path().display(), "skipping non-UTF-8 name");
                    continue;
                };
                let path = entry.path();

                let file_type = match entry.file_type().await {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping entry");
                        continue;
                    }
                };

                let new = if file_type.is_symlink() {
                    match fs::read_link(&path).await {
                        Ok(target) => NewNode::Symlink(target.to_string_lossy().into_owned()),
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "skipping unreadable symlink");
                            continue;
                        }
                    }
                } else if file_type.is_dir() {
                    NewNode::Directory
                } else if file_type.is_file() {
                    match fs::read(&path).await {
                        Ok(data) => NewNode::File(data),
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "skipping unreadable file");
                            continue;
                        }
                    }
                } else {
                    debug!(path = %path.display(), "skipping special file");
                    continue;
                };

                let is_dir = matches!(new, NewNode::Directory);
                let id = tree.insert(node, &name, new)?;
                if let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) {
                    mtimes.push((id, modified));
                }
                if is_dir {
                    stack.push((path, id));
                }
            }
        }
        for (id, modified) in mtimes {
            tree.set_modified(id, modified);
        }
        Ok(tree)
    }
}
