//! Errors raised while setting up or tearing down a mount.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Error type for mount setup.
#[derive(Debug, Error)]
pub enum MountError {
    /// The source path could not be read.
    #[error("Cannot access source {path}: {source}")]
    SourceInaccessible {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The source exists but is not a directory.
    #[error("Source must be a folder: {0}")]
    SourceNotADirectory(PathBuf),

    /// Source and mount point contain one another.
    #[error("Source and mount paths cannot overlap: {source_path} and {mount_path}")]
    Overlapping {
        source_path: PathBuf,
        mount_path: PathBuf,
    },

    /// Something other than a directory sits at the mount point.
    #[error("Mount point is not a directory: {0}")]
    MountpointNotADirectory(PathBuf),

    /// The mount point does not exist and may not be created.
    #[error("Mount point does not exist: {0}")]
    MountpointMissing(PathBuf),

    /// A previous mount is still attached to the mount point.
    #[error("Mount point is already in use: {0}")]
    MountpointBusy(PathBuf),

    /// Every unmount strategy failed.
    #[error("Failed to unmount {path}: {reason}")]
    UnmountFailed { path: PathBuf, reason: String },

    /// Unmount is not available on this platform.
    #[error("Unmount not supported on this platform for {0}")]
    Unsupported(PathBuf),

    /// Other I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl MountError {
    /// POSIX error code to report for this error.
    pub fn to_errno(&self) -> i32 {
        match self {
            MountError::SourceInaccessible { source, .. } => crate::io_error_to_errno(source),
            MountError::SourceNotADirectory(_) | MountError::MountpointNotADirectory(_) => {
                libc::ENOTDIR
            }
            MountError::Overlapping { .. } => libc::EINVAL,
            MountError::MountpointMissing(_) => libc::ENOENT,
            MountError::MountpointBusy(_) => libc::EBUSY,
            MountError::UnmountFailed { .. } => libc::EIO,
            MountError::Unsupported(_) => libc::ENOSYS,
            MountError::Io(e) => crate::io_error_to_errno(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno() {
        assert_eq!(
            MountError::SourceNotADirectory(PathBuf::from("/f")).to_errno(),
            libc::ENOTDIR
        );
        assert_eq!(
            MountError::Overlapping {
                source_path: PathBuf::from("/a"),
                mount_path: PathBuf::from("/a/b"),
            }
            .to_errno(),
            libc::EINVAL
        );
        assert_eq!(
            MountError::Io(io::Error::from_raw_os_error(libc::EACCES)).to_errno(),
            libc::EACCES
        );
    }

    #[test]
    fn test_display() {
        let err = MountError::Overlapping {
            source_path: PathBuf::from("/data"),
            mount_path: PathBuf::from("/data/mnt"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/data/mnt"));
        assert!(msg.contains("overlap"));
    }
}
