//! The local storage engine.
//!
//! Every mutation follows the same shape:
//!
//! 1. parse and validate the virtual path (no state touched yet),
//! 2. take the path's writer lock,
//! 3. plan against a read snapshot of the tree and compute physical paths,
//! 4. perform the physical operation, if mounted,
//! 5. commit to the tree under its write lock, re-checking the plan.
//!
//! A physical failure at step 4 returns before step 5, so the namespace is
//! exactly as it was. The tree lock is a `parking_lot` lock and is never
//! held across an `.await`; only the per-path lock is.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use meshfs_types::{NodeAttr, SetAttr};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::error::{VfsError, VfsResult};
use super::locks::LockTable;
use super::mirror::{Mirror, SymlinkMirror};
use super::path::{VirtualPath, validate_name};
use super::tree::{NewNode, NodeData, NodeId, Tree};

/// In-memory namespace with optional write-through to a real directory.
#[derive(Debug)]
pub struct StorageEngine {
    tree: RwLock<Tree>,
    locks: LockTable,
    mirror: Option<Mirror>,
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// An empty, memory-only engine.
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Tree::new()),
            locks: LockTable::new(),
            mirror: None,
        }
    }

    /// Build the namespace from a real directory and bind it as the mirror
    /// target for every later mutation.
    pub async fn mount(root: impl AsRef<Path>) -> VfsResult<Self> {
        let mirror = Mirror::bind(root.as_ref()).await?;
        let tree = mirror.scan().await?;
        info!(
            root = %mirror.root().display(),
            entries = tree.all_paths().len(),
            "mounted storage root"
        );
        Ok(Self {
            tree: RwLock::new(tree),
            locks: LockTable::new(),
            mirror: Some(mirror),
        })
    }

    /// The real directory, if mounted.
    pub fn mount_root(&self) -> Option<&Path> {
        self.mirror.as_ref().map(Mirror::root)
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    fn physical_of(&self, tree: &Tree, id: NodeId) -> VfsResult<Option<PathBuf>> {
        match &self.mirror {
            Some(mirror) => mirror.physical(&tree.segments_of(id)).map(Some),
            None => Ok(None),
        }
    }

    fn physical_child(&self, tree: &Tree, parent: NodeId, name: &str) -> VfsResult<Option<PathBuf>> {
        match &self.mirror {
            Some(mirror) => {
                let mut segments = tree.segments_of(parent);
                segments.push(name.to_string());
                mirror.physical(&segments).map(Some)
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // Creation
    // ========================================================================

    pub async fn mkdir(&self, path: &str) -> VfsResult<()> {
        self.create(path, NewNode::Directory).await
    }

    pub async fn mknod(&self, path: &str) -> VfsResult<()> {
        self.create(path, NewNode::File(Vec::new())).await
    }

    /// Create a symlink at `link` pointing to `target`. The target is stored
    /// verbatim and need not exist.
    pub async fn symlink(&self, target: &str, link: &str) -> VfsResult<()> {
        if target.is_empty() || target.contains('\0') {
            return Err(VfsError::invalid_path(format!("bad symlink target {target:?}")));
        }
        self.create(link, NewNode::Symlink(target.to_string())).await
    }

    async fn create(&self, raw: &str, new: NewNode) -> VfsResult<()> {
        let path = VirtualPath::parse(raw)?;
        let Some(name) = path.file_name().map(str::to_string) else {
            return Err(VfsError::already_exists("/"));
        };
        let parent_path = path.parent();
        let _guard = self.locks.write(&path).await;

        let physical = {
            let tree = self.tree.read();
            let parent = tree.resolve_dir(&parent_path)?;
            if tree.child(parent, &name).is_some() {
                return Err(VfsError::already_exists(path.to_string()));
            }
            self.physical_child(&tree, parent, &name)?
        };

        if let (Some(mirror), Some(real)) = (&self.mirror, &physical) {
            match &new {
                NewNode::Directory => mirror.create_dir(real).await?,
                NewNode::File(_) => mirror.create_file(real).await?,
                NewNode::Symlink(target) => {
                    if mirror.symlink(target, real).await? == SymlinkMirror::InMemoryOnly {
                        debug!(%path, "symlink kept in memory only");
                    }
                }
                NewNode::HardLink(_) => {}
            }
        }

        let is_dir = matches!(new, NewNode::Directory);
        let committed = {
            let mut tree = self.tree.write();
            match tree.resolve_dir(&parent_path) {
                Ok(parent) => tree.insert(parent, &name, new),
                Err(e) => Err(e),
            }
        };
        if let Err(e) = committed {
            if let (Some(mirror), Some(real)) = (&self.mirror, &physical) {
                mirror.discard(real, is_dir).await;
            }
            return Err(e);
        }
        debug!(%path, "created");
        Ok(())
    }

    /// Add `new` as another name for the payload of file `existing`.
    ///
    /// Nothing is created on disk: the mirror only learns about the new name
    /// if it is written through later.
    pub async fn link(&self, existing: &str, new: &str) -> VfsResult<()> {
        let existing = VirtualPath::parse(existing)?;
        let new = VirtualPath::parse(new)?;
        let Some(name) = new.file_name().map(str::to_string) else {
            return Err(VfsError::already_exists("/"));
        };
        let _guard = self.locks.write(&new).await;

        let mut tree = self.tree.write();
        let target = tree.resolve(&existing, false)?;
        let blob = match tree.node(target).map(|n| &n.data) {
            Some(NodeData::File { blob }) => *blob,
            _ => return Err(VfsError::not_a_file(existing.to_string())),
        };
        let parent = tree.resolve_dir(&new.parent())?;
        if tree.child(parent, &name).is_some() {
            return Err(VfsError::already_exists(new.to_string()));
        }
        tree.insert(parent, &name, NewNode::HardLink(blob))?;
        debug!(%existing, %new, "linked");
        Ok(())
    }

    // ========================================================================
    // Payload
    // ========================================================================

    /// Replace a file's whole payload.
    pub async fn write(&self, raw: &str, data: &[u8]) -> VfsResult<()> {
        let path = VirtualPath::parse(raw)?;
        let _guard = self.locks.write(&path).await;

        let (node, physical) = {
            let tree = self.tree.read();
            let id = tree.resolve(&path, true)?;
            if !matches!(tree.node(id).map(|n| &n.data), Some(NodeData::File { .. })) {
                return Err(VfsError::not_a_file(path.to_string()));
            }
            (id, self.physical_of(&tree, id)?)
        };

        if let (Some(mirror), Some(real)) = (&self.mirror, &physical) {
            mirror.write_file(real, data).await?;
        }

        let mut tree = self.tree.write();
        let blob = match tree.node(node).map(|n| &n.data) {
            Some(NodeData::File { blob }) => *blob,
            _ => return Err(VfsError::not_found(path.to_string())),
        };
        let shared = tree
            .blob_mut(blob)
            .ok_or_else(|| VfsError::not_found(path.to_string()))?;
        shared.data = data.to_vec();
        shared.modified = SystemTime::now();
        debug!(%path, bytes = data.len(), "written");
        Ok(())
    }

    /// Read a file's whole payload.
    pub async fn read(&self, raw: &str) -> VfsResult<Vec<u8>> {
        let path = VirtualPath::parse(raw)?;
        let _guard = self.locks.read(&path).await;

        let tree = self.tree.read();
        let id = tree.resolve(&path, true)?;
        match tree.node(id).map(|n| &n.data) {
            Some(NodeData::File { blob }) => tree
                .blob(*blob)
                .map(|b| b.data.clone())
                .ok_or_else(|| VfsError::not_found(path.to_string())),
            _ => Err(VfsError::not_a_file(path.to_string())),
        }
    }

    // ========================================================================
    // Moving and removing
    // ========================================================================

    /// Move a node to a new parent and name.
    ///
    /// The destination name must be free. Moving a directory into its own
    /// subtree is rejected.
    pub async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        let from = VirtualPath::parse(from)?;
        let to = VirtualPath::parse(to)?;
        if from.is_root() || to.is_root() {
            return Err(VfsError::invalid_path("cannot rename the root"));
        }
        let _guards = self.locks.write_pair(&from, &to).await;
        self.rename_locked(&from, &to).await
    }

    async fn rename_locked(&self, from: &VirtualPath, to: &VirtualPath) -> VfsResult<()> {
        let Some(new_name) = to.file_name().map(str::to_string) else {
            return Err(VfsError::invalid_path("cannot rename onto the root"));
        };

        let (node, new_parent, is_dir, physical) = {
            let tree = self.tree.read();
            let node = tree.resolve(from, false)?;
            let is_dir = matches!(
                tree.node(node).map(|n| &n.data),
                Some(NodeData::Directory { .. })
            );
            tree.resolve_dir(&from.parent())?;
            let new_parent = tree.resolve_dir(&to.parent())?;
            if from == to {
                return Ok(());
            }
            if tree.child(new_parent, &new_name).is_some() {
                return Err(VfsError::already_exists(to.to_string()));
            }
            if tree.is_within(new_parent, node) {
                return Err(VfsError::invalid_path(format!(
                    "cannot move {from} inside itself"
                )));
            }
            let physical = match (
                self.physical_of(&tree, node)?,
                self.physical_child(&tree, new_parent, &new_name)?,
            ) {
                (Some(old), Some(new)) => Some((old, new)),
                _ => None,
            };
            (node, new_parent, is_dir, physical)
        };

        // Hard links and in-memory-only symlinks have no file of their own.
        let moved = match (&self.mirror, &physical) {
            (Some(mirror), Some((old, new))) if is_dir => {
                mirror.rename(old, new).await?;
                true
            }
            (Some(mirror), Some((old, new))) => mirror.rename_if_present(old, new).await?,
            _ => false,
        };

        let committed = {
            let mut tree = self.tree.write();
            tree.relocate(node, new_parent, &new_name)
        };
        if let Err(e) = committed {
            if let (Some(mirror), Some((old, new))) = (&self.mirror, &physical) {
                if moved {
                    if let Err(undo) = mirror.rename(new, old).await {
                        warn!(%from, %to, error = %undo, "failed to undo physical rename");
                    }
                }
            }
            return Err(e);
        }
        debug!(%from, %to, "renamed");
        Ok(())
    }

    /// Remove an empty directory.
    pub async fn rmdir(&self, raw: &str) -> VfsResult<()> {
        let path = VirtualPath::parse(raw)?;
        if path.is_root() {
            return Err(VfsError::invalid_path("cannot remove the root"));
        }
        let _guard = self.locks.write(&path).await;

        {
            let tree = self.tree.read();
            let id = tree.resolve(&path, false)?;
            match tree.node(id).map(|n| &n.data) {
                Some(NodeData::Directory { children }) if !children.is_empty() => {
                    return Err(VfsError::directory_not_empty(path.to_string()));
                }
                Some(NodeData::Directory { .. }) => {}
                _ => return Err(VfsError::not_a_directory(path.to_string())),
            }
        }
        self.remove_locked(&path).await
    }

    /// Remove a file or symlink name.
    pub async fn unlink(&self, raw: &str) -> VfsResult<()> {
        let path = VirtualPath::parse(raw)?;
        let _guard = self.locks.write(&path).await;

        {
            let tree = self.tree.read();
            let id = tree.resolve(&path, false)?;
            if matches!(
                tree.node(id).map(|n| &n.data),
                Some(NodeData::Directory { .. })
            ) {
                return Err(VfsError::not_a_file(path.to_string()));
            }
        }
        self.remove_locked(&path).await
    }

    /// Physical delete first, then detach. Caller holds the path lock and
    /// has checked the node's kind.
    async fn remove_locked(&self, path: &VirtualPath) -> VfsResult<()> {
        let Some(name) = path.file_name().map(str::to_string) else {
            return Err(VfsError::invalid_path("cannot remove the root"));
        };

        let (is_dir, physical) = {
            let tree = self.tree.read();
            let parent = tree.resolve_dir(&path.parent())?;
            let id = tree
                .child(parent, &name)
                .ok_or_else(|| VfsError::not_found(path.to_string()))?;
            let is_dir = matches!(
                tree.node(id).map(|n| &n.data),
                Some(NodeData::Directory { .. })
            );
            (is_dir, self.physical_of(&tree, id)?)
        };

        if let (Some(mirror), Some(real)) = (&self.mirror, &physical) {
            if is_dir {
                mirror.remove_dir(real).await?;
            } else {
                mirror.remove_file(real).await?;
            }
        }

        let mut tree = self.tree.write();
        let parent = tree.resolve_dir(&path.parent())?;
        tree.remove(parent, &name)?;
        debug!(%path, "removed");
        Ok(())
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Child names of a directory, sorted.
    pub async fn readdir(&self, raw: &str) -> VfsResult<Vec<String>> {
        let path = VirtualPath::parse(raw)?;
        let _guard = self.locks.read(&path).await;

        let tree = self.tree.read();
        let id = tree.resolve(&path, true)?;
        match tree.node(id).map(|n| &n.data) {
            Some(NodeData::Directory { children }) => Ok(children.keys().cloned().collect()),
            _ => Err(VfsError::not_a_directory(path.to_string())),
        }
    }

    pub async fn readlink(&self, raw: &str) -> VfsResult<String> {
        let path = VirtualPath::parse(raw)?;
        let _guard = self.locks.read(&path).await;

        let tree = self.tree.read();
        let id = tree.resolve(&path, false)?;
        match tree.node(id).map(|n| &n.data) {
            Some(NodeData::Symlink { target }) => Ok(target.clone()),
            _ => Err(VfsError::NotASymlink(path.to_string())),
        }
    }

    pub async fn getattr(&self, raw: &str) -> VfsResult<NodeAttr> {
        let path = VirtualPath::parse(raw)?;
        let _guard = self.locks.read(&path).await;

        let tree = self.tree.read();
        let id = tree.resolve(&path, true)?;
        tree.attr(id)
            .ok_or_else(|| VfsError::not_found(path.to_string()))
    }

    /// Change one attribute.
    ///
    /// `Name` is an in-place rename (same parent), mirrored on disk.
    /// `Modified` sets the modification time of the resolved node.
    pub async fn setattr(&self, raw: &str, change: SetAttr) -> VfsResult<()> {
        let path = VirtualPath::parse(raw)?;
        match change {
            SetAttr::Name(name) => {
                validate_name(&name)?;
                if path.is_root() {
                    return Err(VfsError::invalid_path("cannot rename the root"));
                }
                let to = path.parent().join(&name);
                let _guards = self.locks.write_pair(&path, &to).await;
                self.rename_locked(&path, &to).await
            }
            SetAttr::Modified(when) => {
                let _guard = self.locks.write(&path).await;
                let (id, physical) = {
                    let tree = self.tree.read();
                    let id = tree.resolve(&path, true)?;
                    let is_dir = matches!(
                        tree.node(id).map(|n| &n.data),
                        Some(NodeData::Directory { .. })
                    );
                    (id, self.physical_of(&tree, id)?.map(|p| (p, is_dir)))
                };
                if let (Some(mirror), Some((real, is_dir))) = (&self.mirror, &physical) {
                    mirror.set_modified(real, when, *is_dir).await?;
                }
                self.tree.write().set_modified(id, when);
                Ok(())
            }
        }
    }

    /// Does this path resolve? Symlinks are followed, so a dangling link
    /// does not count.
    pub async fn exists(&self, raw: &str) -> VfsResult<bool> {
        let path = VirtualPath::parse(raw)?;
        let _guard = self.locks.read(&path).await;
        let tree = self.tree.read();
        match tree.resolve(&path, true) {
            Ok(_) => Ok(true),
            Err(e) if e.is_miss() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Every virtual path held locally, sorted. The root is implied.
    pub fn list_all_paths(&self) -> Vec<String> {
        self.tree.read().all_paths()
    }

    // ========================================================================
    // Open/close gate
    // ========================================================================

    /// Mark a node open. Fails if it is already open.
    pub async fn open(&self, raw: &str) -> VfsResult<()> {
        self.set_open(raw, true).await
    }

    /// Mark a node closed. Fails if it is not open.
    pub async fn close(&self, raw: &str) -> VfsResult<()> {
        self.set_open(raw, false).await
    }

    async fn set_open(&self, raw: &str, open: bool) -> VfsResult<()> {
        let path = VirtualPath::parse(raw)?;
        let _guard = self.locks.write(&path).await;
        let mut tree = self.tree.write();
        let id = tree.resolve(&path, true)?;
        let node = tree
            .node_mut(id)
            .ok_or_else(|| VfsError::not_found(path.to_string()))?;
        match (node.open, open) {
            (true, true) => Err(VfsError::AlreadyOpen(path.to_string())),
            (false, false) => Err(VfsError::NotOpen(path.to_string())),
            _ => {
                node.open = open;
                Ok(())
            }
        }
    }
}
