//! Error handling and mapping for the FUSE filesystem.
//!
//! This is the only place store errors become errno values.

use fused_core::FsError;
use fused_mount::fs_error_to_errno;
use thiserror::Error;

/// Errors raised while serving a FUSE request.
#[derive(Debug, Error)]
pub enum FuseError {
    /// The combined store rejected the operation.
    #[error(transparent)]
    Fs(#[from] FsError),

    /// The kernel referred to an inode this table does not know.
    #[error("Invalid inode: {0}")]
    InvalidInode(u64),

    /// The kernel passed an offset that does not fit the store's range.
    #[error("Invalid offset: {0}")]
    InvalidOffset(i64),

    /// Rename flags (exchange, no-replace, whiteout) are not supported.
    #[error("Unsupported rename flags: {0:#x}")]
    RenameFlags(u32),
}

impl FuseError {
    /// Converts this error to a libc error code for FUSE.
    pub fn to_errno(&self) -> i32 {
        match self {
            FuseError::Fs(e) => fs_error_to_errno(e),
            FuseError::InvalidInode(_) => libc::ENOENT,
            FuseError::InvalidOffset(_) | FuseError::RenameFlags(_) => libc::EINVAL,
        }
    }
}

/// Result type for FUSE operations.
pub type FuseResult<T> = Result<T, FuseError>;
