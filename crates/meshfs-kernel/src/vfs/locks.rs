//! Per-path reader/writer locks.
//!
//! One lock per normalized path string, created on first use and kept for
//! the life of the engine. Insertion goes through `DashMap::entry`, so two
//! workers racing on a fresh path always end up sharing one lock, and
//! unrelated paths never contend on a global mutex.
//!
//! Locks are keyed by *string*, not by node: `/a.txt` and a hard link
//! `/b.txt` to the same payload are not mutually exclusive.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use super::path::VirtualPath;

#[derive(Debug, Default)]
pub struct LockTable {
    locks: DashMap<String, Arc<RwLock<()>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for a path, created if absent.
    pub fn lock_for(&self, path: &VirtualPath) -> Arc<RwLock<()>> {
        self.locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    pub async fn read(&self, path: &VirtualPath) -> OwnedRwLockReadGuard<()> {
        self.lock_for(path).read_owned().await
    }

    pub async fn write(&self, path: &VirtualPath) -> OwnedRwLockWriteGuard<()> {
        self.lock_for(path).write_owned().await
    }

    /// Exclusive locks on two paths, taken in a fixed order so that
    /// `rename(a, b)` and `rename(b, a)` cannot deadlock.
    pub async fn write_pair(
        &self,
        a: &VirtualPath,
        b: &VirtualPath,
    ) -> Vec<OwnedRwLockWriteGuard<()>> {
        let (first, second) = if a.to_string() <= b.to_string() {
            (a, b)
        } else {
            (b, a)
        };
        let mut guards = vec![self.write(first).await];
        if first != second {
            guards.push(self.write(second).await);
        }
        guards
    }

    /// Number of distinct paths that have ever been locked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vp(s: &str) -> VirtualPath {
        VirtualPath::parse(s).unwrap()
    }

    #[test]
    fn test_same_path_same_lock() {
        let table = LockTable::new();
        let a = table.lock_for(&vp("/a/b"));
        let b = table.lock_for(&vp("/a/./b/"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 1);

        let c = table.lock_for(&vp("/a/c"));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_writer_excludes_reader() {
        let table = LockTable::new();
        let path = vp("/x");
        let guard = table.write(&path).await;
        assert!(table.lock_for(&path).try_read().is_err());
        drop(guard);
        assert!(table.lock_for(&path).try_read().is_ok());
    }

    #[tokio::test]
    async fn test_readers_share() {
        let table = LockTable::new();
        let path = vp("/x");
        let _r1 = table.read(&path).await;
        assert!(table.lock_for(&path).try_read().is_ok());
        assert!(table.lock_for(&path).try_write().is_err());
    }

    #[tokio::test]
    async fn test_write_pair_same_path_takes_one_lock() {
        let table = LockTable::new();
        let guards = table.write_pair(&vp("/x"), &vp("/x")).await;
        assert_eq!(guards.len(), 1);
        let guards = table.write_pair(&vp("/b"), &vp("/a")).await;
        assert_eq!(guards.len(), 2);
    }
}
