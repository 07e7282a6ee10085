//! Mount setup shared by `fused` backends.
//!
//! - [`MountPaths`] validates a source directory and mount point pair
//! - [`prepare_mountpoint`] detaches stale mounts and creates the directory
//! - [`force_unmount`] detaches a mount using the platform tools
//! - [`UnmountGuard`] makes a shutdown request fire once
//!
//! # Example
//!
//! ```no_run
//! use fused_mount::{MountOptions, MountPaths, prepare_mountpoint, DEFAULT_ACCESS_TIMEOUT};
//!
//! let paths = MountPaths::new("/srv/data", "/mnt/data")?;
//! prepare_mountpoint(paths.mount(), &MountOptions::default(), DEFAULT_ACCESS_TIMEOUT)?;
//! let guard = paths.guard();
//! # Ok::<(), fused_mount::MountError>(())
//! ```

pub mod errno;
pub mod error;
pub mod force_unmount;
pub mod mountpoint;
pub mod paths;
pub mod unmount;

pub use errno::{errno_name, fs_error_to_errno, io_error_to_errno};
pub use error::MountError;
pub use force_unmount::force_unmount;
pub use mountpoint::{
    DEFAULT_ACCESS_TIMEOUT, MountPointStatus, check_mountpoint_status, is_fuse_mountpoint,
    prepare_mountpoint,
};
pub use paths::{MountOptions, MountPaths};
pub use unmount::UnmountGuard;
