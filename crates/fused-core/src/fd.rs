//! Descriptor table shared by the virtual store and compositions.
//!
//! Descriptors are small positive integers handed out from a wrapping
//! counter. A slot is reused only after its previous holder was removed,
//! and a bounded probe keeps `insert` from spinning when the table is
//! nearly full.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{FsError, FsResult};
use crate::layer::Fd;

/// Largest descriptor ever issued.
pub const MAX_FD: Fd = (1 << 31) - 1;

/// Candidates probed by one `insert` before giving up.
pub const MAX_PROBES: usize = 1024;

/// Thread-safe map from issued descriptors to values.
///
/// `0` is never issued. The counter wraps from [`MAX_FD`] back to `1`.
#[derive(Debug)]
pub struct FdTable<T> {
    entries: DashMap<Fd, T>,
    next: AtomicU64,
}

impl<T> FdTable<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next: AtomicU64::new(1),
        }
    }

    /// Advances the counter and returns the candidate it pointed at.
    fn next_candidate(&self) -> Fd {
        let prev = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(if current >= MAX_FD { 1 } else { current + 1 })
            });
        // The closure never returns None, both arms carry the previous value.
        match prev {
            Ok(v) | Err(v) => v,
        }
    }

    /// Stores `value` under a fresh descriptor.
    ///
    /// Fails with [`FsError::NoDescriptorsAvailable`] if [`MAX_PROBES`]
    /// consecutive candidates are all in use.
    pub fn insert(&self, value: T) -> FsResult<Fd> {
        for _ in 0..MAX_PROBES {
            let fd = self.next_candidate();
            if fd == 0 {
                continue;
            }
            if let Entry::Vacant(entry) = self.entries.entry(fd) {
                entry.insert(value);
                return Ok(fd);
            }
        }
        Err(FsError::NoDescriptorsAvailable)
    }

    /// Removes the mapping for `fd`, returning the value if it was live.
    pub fn remove(&self, fd: Fd) -> Option<T> {
        self.entries.remove(&fd).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    fn set_next(&self, fd: Fd) {
        self.next.store(fd, Ordering::Relaxed);
    }
}

impl<T: Clone> FdTable<T> {
    /// Returns a copy of the value under `fd`.
    pub fn get(&self, fd: Fd) -> Option<T> {
        self.entries.get(&fd).map(|entry| entry.value().clone())
    }
}

impl<T> Default for FdTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
