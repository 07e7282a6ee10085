//! In-memory state of an open virtual file.
//!
//! A [`VirtualFileRecord`] follows a read-modify-write pattern:
//! 1. On open: provider content is read into the buffer
//! 2. On write: data is copied into the buffer at the offset
//! 3. On flush, fsync or release: if dirty, the first `len()` bytes go back
//!    to the provider

use crate::error::{FsError, FsResult};

/// Largest logical size a virtual file may reach (1 GiB).
///
/// Virtual content lives in memory, so writes and truncations past this
/// fail with `EFBIG` instead of asking the allocator for the whole range.
pub const MAX_VIRTUAL_FILE_SIZE: u64 = 1 << 30;

/// Checks `end` against [`MAX_VIRTUAL_FILE_SIZE`] and converts it to `usize`.
pub fn checked_size(end: u64) -> FsResult<usize> {
    if end > MAX_VIRTUAL_FILE_SIZE {
        return Err(FsError::FileTooLarge(end));
    }
    usize::try_from(end).map_err(|_| FsError::FileTooLarge(end))
}

/// Buffered content of one open virtual file.
///
/// The backing buffer is the record's capacity; only the first `size`
/// bytes are visible. Shrinking never releases memory.
#[derive(Debug, Default)]
pub struct VirtualFileRecord {
    buffer: Vec<u8>,
    size: usize,
    dirty: bool,
}

impl VirtualFileRecord {
    /// Creates a clean record holding `content`.
    pub fn new(content: Vec<u8>) -> Self {
        let size = content.len();
        Self {
            buffer: content,
            size,
            dirty: false,
        }
    }

    /// Creates an empty record that must be committed even if never written.
    pub fn new_truncated() -> Self {
        Self {
            buffer: Vec::new(),
            size: 0,
            dirty: true,
        }
    }

    /// Writes `data` at `offset`, growing the buffer if needed.
    ///
    /// Growth doubles the capacity (or fits the write exactly if that is
    /// larger), preserving existing bytes and zero-filling the rest. The
    /// doubled capacity never exceeds [`MAX_VIRTUAL_FILE_SIZE`].
    pub fn write(&mut self, offset: u64, data: &[u8]) -> FsResult<usize> {
        let end = checked_size(offset.saturating_add(data.len() as u64))?;
        let offset = end - data.len();

        if end > self.buffer.len() {
            #[allow(clippy::cast_possible_truncation)]
            let limit = MAX_VIRTUAL_FILE_SIZE as usize;
            let new_capacity = end.max((self.buffer.len() * 2).min(limit));
            self.buffer.resize(new_capacity, 0);
        }
        // A gap between the old logical end and the write must read as zeros.
        if offset > self.size {
            self.buffer[self.size..offset].fill(0);
        }

        self.buffer[offset..end].copy_from_slice(data);
        self.size = self.size.max(end);
        self.dirty = true;
        Ok(data.len())
    }

    /// Reads up to `len` bytes at `offset`, clamped to the logical size.
    pub fn read(&self, offset: u64, len: usize) -> &[u8] {
        #[allow(clippy::cast_possible_truncation)]
        let offset = offset as usize;
        if offset >= self.size {
            return &[];
        }
        let end = offset.saturating_add(len).min(self.size);
        &self.buffer[offset..end]
    }

    /// Sets the logical size and marks the record dirty.
    pub fn truncate(&mut self, size: u64) -> FsResult<()> {
        let size = checked_size(size)?;
        if size > self.buffer.len() {
            self.buffer.resize(size, 0);
        }
        if size > self.size {
            self.buffer[self.size..size].fill(0);
        }
        self.size = size;
        self.dirty = true;
        Ok(())
    }

    /// Logical size in bytes.
    #[inline]
    pub fn len(&self) -> u64 {
        self.size as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The visible content.
    #[inline]
    pub fn content(&self) -> &[u8] {
        &self.buffer[..self.size]
    }

    /// Mark as clean after a successful commit.
    #[inline]
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
