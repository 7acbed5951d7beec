//! The in-memory namespace.
//!
//! Nodes live in an arena keyed by [`NodeId`]. Directories own their
//! children by id; the `parent` field is a non-owning back-reference used
//! only for navigation (`..` in symlink targets, computing a node's path).
//! File payloads live in a second arena of ref-counted [`Blob`]s so that
//! hard links share one buffer and one pair of timestamps.
//!
//! The tree does no locking of its own. [`StorageEngine`] wraps it in a
//! `RwLock` and never holds that lock across an `.await`.
//!
//! [`StorageEngine`]: super::StorageEngine

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::SystemTime;

use meshfs_types::{NodeAttr, NodeKind};

use super::error::{VfsError, VfsResult};
use super::path::VirtualPath;
use crate::constants::MAX_SYMLINK_HOPS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NodeId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BlobId(u64);

/// A shared file payload.
#[derive(Debug)]
pub(crate) struct Blob {
    pub data: Vec<u8>,
    /// Names pointing at this blob. Freed at zero.
    pub links: u32,
    pub created: SystemTime,
    pub modified: SystemTime,
}

#[derive(Debug)]
pub(crate) enum NodeData {
    Directory { children: BTreeMap<String, NodeId> },
    File { blob: BlobId },
    Symlink { target: String },
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::Directory { .. } => NodeKind::Directory,
            NodeData::File { .. } => NodeKind::File,
            NodeData::Symlink { .. } => NodeKind::Symlink,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub created: SystemTime,
    pub modified: SystemTime,
    pub open: bool,
    pub data: NodeData,
}

/// The kind of node to create, before it has an id.
#[derive(Debug, Clone)]
pub(crate) enum NewNode {
    Directory,
    /// A file with an initial payload (empty for `mknod`).
    File(Vec<u8>),
    Symlink(String),
    /// Another name for an existing payload.
    HardLink(BlobId),
}

#[derive(Debug)]
pub(crate) struct Tree {
    nodes: HashMap<NodeId, Node>,
    blobs: HashMap<BlobId, Blob>,
    root: NodeId,
    next_id: u64,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        let now = SystemTime::now();
        let root = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node {
                name: "/".to_string(),
                parent: None,
                created: now,
                modified: now,
                open: false,
                data: NodeData::Directory {
                    children: BTreeMap::new(),
                },
            },
        );
        Self {
            nodes,
            blobs: HashMap::new(),
            root,
            next_id: 1,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn blob(&self, id: BlobId) -> Option<&Blob> {
        self.blobs.get(&id)
    }

    pub fn blob_mut(&mut self, id: BlobId) -> Option<&mut Blob> {
        self.blobs.get_mut(&id)
    }

    fn fresh_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Child of a directory by name. `None` if `dir` is not a directory.
    pub fn child(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        match &self.nodes.get(&dir)?.data {
            NodeData::Directory { children } => children.get(name).copied(),
            _ => None,
        }
    }

    /// Resolve a path to a node id.
    ///
    /// With `follow`, every symlink met on the way (including the final
    /// segment) is replaced by its target and the walk continues from there.
    /// Relative targets are taken relative to the directory holding the
    /// link. More than [`MAX_SYMLINK_HOPS`] hops fails with
    /// [`VfsError::TooManySymlinks`].
    pub fn resolve(&self, path: &VirtualPath, follow: bool) -> VfsResult<NodeId> {
        let mut pending: VecDeque<String> = path.segments().iter().cloned().collect();
        let mut current = self.root;
        let mut hops = 0usize;

        while let Some(segment) = pending.pop_front() {
            match segment.as_str() {
                "" | "." => continue,
                ".." => {
                    current = self
                        .nodes
                        .get(&current)
                        .and_then(|n| n.parent)
                        .unwrap_or(self.root);
                    continue;
                }
                _ => {}
            }

            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| VfsError::not_found(path.to_string()))?;
            let NodeData::Directory { children } = &node.data else {
                return Err(VfsError::not_a_directory(path.to_string()));
            };
            let next = *children
                .get(&segment)
                .ok_or_else(|| VfsError::not_found(path.to_string()))?;

            if follow {
                if let Some(Node {
                    data: NodeData::Symlink { target },
                    ..
                }) = self.nodes.get(&next)
                {
                    hops += 1;
                    if hops > MAX_SYMLINK_HOPS {
                        return Err(VfsError::TooManySymlinks(path.to_string()));
                    }
                    if target.starts_with('/') {
                        current = self.root;
                    }
                    for part in target.split('/').rev() {
                        pending.push_front(part.to_string());
                    }
                    continue;
                }
            }
            current = next;
        }
        Ok(current)
    }

    /// Resolve a path that must name a directory (no symlink following).
    pub fn resolve_dir(&self, path: &VirtualPath) -> VfsResult<NodeId> {
        let id = self.resolve(path, false)?;
        match self.nodes.get(&id).map(|n| &n.data) {
            Some(NodeData::Directory { .. }) => Ok(id),
            _ => Err(VfsError::not_a_directory(path.to_string())),
        }
    }

    /// Path segments of a node, from the root down.
    pub fn segments_of(&self, id: NodeId) -> Vec<String> {
        let mut segments = Vec::new();
        let mut current = id;
        while let Some(node) = self.nodes.get(&current) {
            let Some(parent) = node.parent else { break };
            segments.push(node.name.clone());
            current = parent;
        }
        segments.reverse();
        segments
    }

    /// Add a new child. The caller has checked that `parent` is a
    /// directory and `name` is free.
    pub fn insert(&mut self, parent: NodeId, name: &str, new: NewNode) -> VfsResult<NodeId> {
        match self.nodes.get(&parent).map(|n| &n.data) {
            Some(NodeData::Directory { children }) if children.contains_key(name) => {
                return Err(VfsError::already_exists(name.to_string()));
            }
            Some(NodeData::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(name.to_string())),
            None => return Err(VfsError::not_found(name.to_string())),
        }

        let now = SystemTime::now();
        let data = match new {
            NewNode::Directory => NodeData::Directory {
                children: BTreeMap::new(),
            },
            NewNode::File(data) => {
                let blob = BlobId(self.fresh_id());
                self.blobs.insert(
                    blob,
                    Blob {
                        data,
                        links: 1,
                        created: now,
                        modified: now,
                    },
                );
                NodeData::File { blob }
            }
            NewNode::Symlink(target) => NodeData::Symlink { target },
            NewNode::HardLink(blob) => {
                let shared = self
                    .blobs
                    .get_mut(&blob)
                    .ok_or_else(|| VfsError::not_found(name.to_string()))?;
                shared.links += 1;
                NodeData::File { blob }
            }
        };

        let id = NodeId(self.fresh_id());
        if let Some(Node {
            data: NodeData::Directory { children },
            modified,
            ..
        }) = self.nodes.get_mut(&parent)
        {
            children.insert(name.to_string(), id);
            *modified = now;
        }

        self.nodes.insert(
            id,
            Node {
                name: name.to_string(),
                parent: Some(parent),
                created: now,
                modified: now,
                open: false,
                data,
            },
        );
        Ok(id)
    }

    /// Detach `name` from `parent` and free it. Directories must already be
    /// empty; files drop one reference on their blob.
    pub fn remove(&mut self, parent: NodeId, name: &str) -> VfsResult<()> {
        let id = self
            .child(parent, name)
            .ok_or_else(|| VfsError::not_found(name.to_string()))?;

        if let Some(Node {
            data: NodeData::Directory { children },
            ..
        }) = self.nodes.get(&id)
        {
            if !children.is_empty() {
                return Err(VfsError::directory_not_empty(name.to_string()));
            }
        }

        if let Some(Node {
            data: NodeData::Directory { children },
            modified,
            ..
        }) = self.nodes.get_mut(&parent)
        {
            children.remove(name);
            *modified = SystemTime::now();
        }

        if let Some(node) = self.nodes.remove(&id) {
            if let NodeData::File { blob } = node.data {
                self.release_blob(blob);
            }
        }
        Ok(())
    }

    fn release_blob(&mut self, blob: BlobId) {
        let free = match self.blobs.get_mut(&blob) {
            Some(shared) => {
                shared.links = shared.links.saturating_sub(1);
                shared.links == 0
            }
            None => false,
        };
        if free {
            self.blobs.remove(&blob);
        }
    }

    /// Move a node to a new parent and name. The caller has checked that
    /// the destination is a directory, the name is free, and the move does
    /// not put a directory inside itself.
    pub fn relocate(&mut self, id: NodeId, new_parent: NodeId, new_name: &str) -> VfsResult<()> {
        let (old_parent, old_name) = {
            let node = self
                .nodes
                .get(&id)
                .ok_or_else(|| VfsError::not_found(new_name.to_string()))?;
            let parent = node
                .parent
                .ok_or_else(|| VfsError::invalid_path("cannot move the root"))?;
            (parent, node.name.clone())
        };
        if self.child(new_parent, new_name).is_some() {
            return Err(VfsError::already_exists(new_name.to_string()));
        }

        let now = SystemTime::now();
        if let Some(Node {
            data: NodeData::Directory { children },
            modified,
            ..
        }) = self.nodes.get_mut(&old_parent)
        {
            children.remove(&old_name);
            *modified = now;
        }
        if let Some(Node {
            data: NodeData::Directory { children },
            modified,
            ..
        }) = self.nodes.get_mut(&new_parent)
        {
            children.insert(new_name.to_string(), id);
            *modified = now;
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.name = new_name.to_string();
            node.parent = Some(new_parent);
        }
        Ok(())
    }

    /// Set a node's modification time. A file's lives on its shared payload,
    /// so every hard link sees the change.
    pub fn set_modified(&mut self, id: NodeId, when: SystemTime) {
        let blob = match self.node(id).map(|n| &n.data) {
            Some(NodeData::File { blob }) => Some(*blob),
            _ => None,
        };
        match blob.and_then(|b| self.blob_mut(b)) {
            Some(shared) => shared.modified = when,
            None => {
                if let Some(node) = self.node_mut(id) {
                    node.modified = when;
                }
            }
        }
    }

    /// Is `id` equal to `ancestor` or below it?
    pub fn is_within(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.nodes.get(&c).and_then(|n| n.parent);
        }
        false
    }

    pub fn attr(&self, id: NodeId) -> Option<NodeAttr> {
        let node = self.nodes.get(&id)?;
        let (size, nlink, created, modified) = match &node.data {
            NodeData::Directory { children } => {
                (children.len() as u64, 1, node.created, node.modified)
            }
            NodeData::Symlink { target } => (target.len() as u64, 1, node.created, node.modified),
            NodeData::File { blob } => {
                let shared = self.blobs.get(blob)?;
                (
                    shared.data.len() as u64,
                    shared.links,
                    shared.created,
                    shared.modified,
                )
            }
        };
        Some(NodeAttr {
            name: node.name.clone(),
            kind: node.data.kind(),
            size,
            nlink,
            created,
            modified,
            open: node.open,
        })
    }

    /// Every path in the tree except the root, sorted.
    pub fn all_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![(self.root, String::new())];
        while let Some((id, prefix)) = stack.pop() {
            if let Some(Node {
                data: NodeData::Directory { children },
                ..
            }) = self.nodes.get(&id)
            {
                for (name, child) in children {
                    let path = format!("{prefix}/{name}");
                    out.push(path.clone());
                    stack.push((*child, path));
                }
            }
        }
        out.sort();
        out
    }

    #[cfg(test)]
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }
}
