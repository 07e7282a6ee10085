//! Core of the `fused` overlay filesystem.
//!
//! A mounted tree is built from layers that all implement [`FsLayer`]:
//!
//! - [`RealFs`] mirrors a source directory, with every path checked by a
//!   [`PathGuard`]
//! - [`VirtualFs`] serves a [`ContentProvider`] from memory
//! - [`OverlayFs`] stacks one layer on another, routing each call by the
//!   overlay's [`Claim`] on the path
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fused_core::{compose, FsLayer, InMemoryFile, PathGuard, RealFs, VirtualFs};
//!
//! let guard = PathGuard::new("/srv/source", "/mnt/fused");
//! let provider = Arc::new(InMemoryFile::new("/foo/bar", "content"));
//! let overlay = VirtualFs::new(provider, guard.clone())?;
//! let fs = compose(Box::new(RealFs::new(guard)), [Box::new(overlay) as Box<dyn FsLayer>]);
//! fs.init()?;
//! # Ok::<(), fused_core::FsError>(())
//! ```

pub mod buffer;
pub mod error;
pub mod fd;
pub mod layer;
pub mod overlay;
pub mod path;
pub mod provider;
pub mod real;
pub mod virtual_fs;

pub use buffer::VirtualFileRecord;
pub use error::{FsError, FsResult};
pub use fd::FdTable;
pub use layer::{Claim, Fd, FileKind, FileStat, FsLayer};
pub use overlay::{OverlayFs, Side, compose};
pub use path::PathGuard;
pub use provider::{ContentProvider, GeneratedFile, InMemoryFile, MiniStat};
pub use real::RealFs;
pub use virtual_fs::VirtualFs;
