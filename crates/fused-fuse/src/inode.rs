//! Inode management for the FUSE filesystem.
//!
//! The combined store is addressed by path, the kernel by inode number. This
//! table keeps both directions, with the kernel's lookup count per inode so
//! entries are only dropped once `forget` says the kernel is done with them.

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// An entry in the inode table.
#[derive(Debug)]
pub struct InodeEntry {
    /// Path inside the mount, always absolute.
    pub path: PathBuf,
    /// Lookup count for proper `forget()` handling.
    nlookup: AtomicU64,
}

impl InodeEntry {
    fn new(path: PathBuf, nlookup: u64) -> Self {
        Self {
            path,
            nlookup: AtomicU64::new(nlookup),
        }
    }

    /// Increments the lookup count and returns the new value.
    pub fn inc_nlookup(&self) -> u64 {
        self.nlookup.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrements the lookup count by `count`.
    /// Returns `None` if the count would go negative.
    pub fn dec_nlookup(&self, count: u64) -> Option<u64> {
        let old = self.nlookup.fetch_sub(count, Ordering::AcqRel);
        if old < count {
            self.nlookup.fetch_add(count, Ordering::Relaxed);
            None
        } else {
            Some(old - count)
        }
    }

    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::Relaxed)
    }
}

/// Thread-safe table mapping between inodes and mount paths.
pub struct InodeTable {
    entries: DashMap<u64, InodeEntry>,
    by_path: DashMap<PathBuf, u64>,
    next: AtomicU64,
}

impl InodeTable {
    /// Creates a table holding only the root directory.
    pub fn new() -> Self {
        let root = PathBuf::from("/");
        let entries = DashMap::new();
        entries.insert(ROOT_INODE, InodeEntry::new(root.clone(), 1));
        let by_path = DashMap::new();
        by_path.insert(root, ROOT_INODE);
        Self {
            entries,
            by_path,
            next: AtomicU64::new(ROOT_INODE + 1),
        }
    }

    /// Returns the inode for `path`, allocating one if needed, and counts
    /// one kernel lookup against it.
    pub fn get_or_insert(&self, path: &Path) -> u64 {
        self.insert_with(path, 1)
    }

    /// Like [`get_or_insert`](Self::get_or_insert) but without touching the
    /// lookup count. `readdir` entries must not count as lookups.
    pub fn get_or_insert_no_lookup_inc(&self, path: &Path) -> u64 {
        self.insert_with(path, 0)
    }

    fn insert_with(&self, path: &Path, lookups: u64) -> u64 {
        let ino = *self.by_path.entry(path.to_path_buf()).or_insert_with(|| {
            let ino = self.next.fetch_add(1, Ordering::Relaxed);
            self.entries
                .insert(ino, InodeEntry::new(path.to_path_buf(), 0));
            ino
        });
        if lookups > 0
            && let Some(entry) = self.entries.get(&ino)
        {
            entry.nlookup.fetch_add(lookups, Ordering::Relaxed);
        }
        ino
    }

    /// Path currently bound to `inode`.
    pub fn path(&self, inode: u64) -> Option<PathBuf> {
        self.entries.get(&inode).map(|e| e.path.clone())
    }

    /// Looks up an inode by path.
    pub fn get_inode(&self, path: &Path) -> Option<u64> {
        self.by_path.get(path).map(|ino| *ino)
    }

    /// Current lookup count of `inode`.
    pub fn nlookup(&self, inode: u64) -> Option<u64> {
        self.entries.get(&inode).map(|e| e.nlookup())
    }

    /// Decrements the lookup count for an inode and evicts it at zero.
    /// Returns `true` if the inode was evicted. The root is never evicted.
    pub fn forget(&self, inode: u64, nlookup: u64) -> bool {
        if inode == ROOT_INODE {
            return false;
        }

        let remaining = match self.entries.get(&inode) {
            Some(entry) => entry.dec_nlookup(nlookup),
            None => return false,
        };
        if remaining != Some(0) {
            return false;
        }

        match self.entries.remove(&inode) {
            Some((_, entry)) => {
                self.by_path.remove_if(&entry.path, |_, ino| *ino == inode);
                true
            }
            None => false,
        }
    }

    /// Unbinds `path` after it was deleted.
    ///
    /// The inode entry itself stays until the kernel forgets it, since the
    /// kernel may still pass the number back from its caches.
    pub fn invalidate_path(&self, path: &Path) {
        self.by_path.remove(path);
    }

    /// Moves `from` and everything below it to `to` after a rename.
    ///
    /// Any inode previously bound to `to` is unbound, as the rename replaced it.
    pub fn rename_path(&self, from: &Path, to: &Path) {
        self.by_path.remove(to);

        let moved: Vec<(PathBuf, u64)> = self
            .by_path
            .iter()
            .filter(|e| e.key().starts_with(from))
            .map(|e| (e.key().clone(), *e.value()))
            .collect();

        for (old, ino) in moved {
            let Ok(rest) = old.strip_prefix(from) else {
                continue;
            };
            let new = if rest.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(rest)
            };
            self.by_path.remove(&old);
            self.by_path.insert(new.clone(), ino);
            if let Some(mut entry) = self.entries.get_mut(&ino) {
                entry.path = new;
            }
        }
    }

    /// Number of inodes currently in the table, root included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table only contains the root inode.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
