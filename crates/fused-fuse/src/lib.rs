//! FUSE front end for `fused` overlay filesystems.
//!
//! [`FusedFs`] serves a combined store (see `fused_core::compose`) to the
//! kernel through `fuser`; [`backend::mount`] attaches it to a mount point.
//!
//! ```no_run
//! use std::sync::Arc;
//! use fused_core::{FsLayer, InMemoryFile, RealFs, VirtualFs, compose};
//! use fused_fuse::{MountConfig, backend};
//! use fused_mount::MountPaths;
//!
//! # fn main() -> anyhow::Result<()> {
//! let paths = MountPaths::new("/srv/data", "/mnt/data")?;
//! let guard = paths.guard();
//! let notes = VirtualFs::new(Arc::new(InMemoryFile::new("/NOTES", "hello")), guard.clone())?;
//! let store = compose(Box::new(RealFs::new(guard)), [Box::new(notes) as Box<dyn FsLayer>]);
//! let handle = backend::mount(store, &paths, &MountConfig::default())?;
//! handle.unmount();
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod inode;

pub use backend::{FusedMountHandle, fuse_available};
pub use config::MountConfig;
pub use error::{FuseError, FuseResult};
pub use filesystem::FusedFs;
pub use inode::{InodeEntry, InodeTable, ROOT_INODE};
