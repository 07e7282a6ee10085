//! Error type shared by every store.
//!
//! Stores fail with exactly one [`FsError`] per operation. The composition
//! engine only ever inspects [`FsError::is_not_found`]; turning an error into
//! a numeric code is left to the kernel-facing adapter via [`FsError::errno`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::layer::Fd;

/// Errors produced by filesystem layers.
#[derive(Debug, Error)]
pub enum FsError {
    /// The resolved path escapes the source root.
    #[error("Requested path is not in the source folder: {0}")]
    PathNotInSource(PathBuf),

    /// The resolved path lies inside the mount point.
    #[error("Source and mount paths must not overlap: {0}")]
    RecursiveMounting(PathBuf),

    /// No entry exists at the path.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// The descriptor table ran out of free slots.
    #[error("No file descriptors available")]
    NoDescriptorsAvailable,

    /// The descriptor is not open in this layer.
    #[error("Unknown file descriptor: {0}")]
    BadDescriptor(Fd),

    /// A file operation was attempted on a directory.
    #[error("Is a directory: {0}")]
    IsADirectory(PathBuf),

    /// A directory operation was attempted on a file.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The operation is not permitted on this entry.
    #[error("Operation not permitted: {0}")]
    PermissionDenied(String),

    /// The operation does not apply to this kind of entry.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An entry already exists at the path.
    #[error("File already exists: {0}")]
    AlreadyExists(PathBuf),

    /// A virtual file would grow past its size limit.
    #[error("File too large: {0} bytes")]
    FileTooLarge(u64),

    /// The layer deliberately does not implement the operation.
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// Error from the underlying filesystem.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Returns true if this error means "nothing at that path".
    ///
    /// This is the only condition the composition engine recovers from.
    pub fn is_not_found(&self) -> bool {
        match self {
            FsError::NotFound(_) => true,
            FsError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Returns the POSIX error code for this error, if it carries one.
    ///
    /// Path guard errors have no meaningful errno and return `None`; the
    /// adapter decides what to report for those.
    pub fn errno(&self) -> Option<i32> {
        match self {
            FsError::PathNotInSource(_) | FsError::RecursiveMounting(_) => None,
            FsError::NotFound(_) => Some(libc::ENOENT),
            FsError::NoDescriptorsAvailable => Some(libc::ENFILE),
            FsError::BadDescriptor(_) => Some(libc::EBADF),
            FsError::IsADirectory(_) => Some(libc::EISDIR),
            FsError::NotADirectory(_) => Some(libc::ENOTDIR),
            FsError::PermissionDenied(_) => Some(libc::EPERM),
            FsError::InvalidArgument(_) => Some(libc::EINVAL),
            FsError::AlreadyExists(_) => Some(libc::EEXIST),
            FsError::FileTooLarge(_) => Some(libc::EFBIG),
            FsError::Unsupported(_) => Some(libc::ENOSYS),
            FsError::Io(e) => Some(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }
}

/// Result type for layer operations.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        assert!(FsError::NotFound(PathBuf::from("/a")).is_not_found());
        assert!(FsError::Io(io::Error::from_raw_os_error(libc::ENOENT)).is_not_found());
        assert!(!FsError::Io(io::Error::from_raw_os_error(libc::EACCES)).is_not_found());
        assert!(!FsError::PermissionDenied("rmdir".to_string()).is_not_found());
        assert!(!FsError::BadDescriptor(3).is_not_found());
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::NotFound(PathBuf::from("/a")).errno(), Some(libc::ENOENT));
        assert_eq!(FsError::NoDescriptorsAvailable.errno(), Some(libc::ENFILE));
        assert_eq!(FsError::BadDescriptor(1).errno(), Some(libc::EBADF));
        assert_eq!(FsError::IsADirectory(PathBuf::from("/d")).errno(), Some(libc::EISDIR));
        assert_eq!(FsError::NotADirectory(PathBuf::from("/f")).errno(), Some(libc::ENOTDIR));
        assert_eq!(FsError::PermissionDenied(String::new()).errno(), Some(libc::EPERM));
        assert_eq!(FsError::InvalidArgument(String::new()).errno(), Some(libc::EINVAL));
        assert_eq!(FsError::AlreadyExists(PathBuf::from("/f")).errno(), Some(libc::EEXIST));
        assert_eq!(FsError::FileTooLarge(1 << 40).errno(), Some(libc::EFBIG));
        assert_eq!(FsError::Unsupported("rename").errno(), Some(libc::ENOSYS));
    }

    #[test]
    fn test_guard_errors_carry_no_errno() {
        assert_eq!(FsError::PathNotInSource(PathBuf::from("/x")).errno(), None);
        assert_eq!(FsError::RecursiveMounting(PathBuf::from("/x")).errno(), None);
    }

    #[test]
    fn test_io_errno_passthrough() {
        let e = FsError::Io(io::Error::from_raw_os_error(libc::ENOSPC));
        assert_eq!(e.errno(), Some(libc::ENOSPC));

        let e = FsError::Io(io::Error::other("custom error"));
        assert_eq!(e.errno(), Some(libc::EIO));
    }

    #[test]
    fn test_display_includes_path() {
        let e = FsError::NotFound(PathBuf::from("/some/path"));
        assert!(e.to_string().contains("/some/path"));
    }
}
