//! Validated source and mount paths, and mount options.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use fused_core::PathGuard;

use crate::error::MountError;

/// Source directory and mount point, both absolute and known not to overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPaths {
    source: PathBuf,
    mount: PathBuf,
}

impl MountPaths {
    /// Validates a source/mount pair.
    ///
    /// The source is canonicalized and must be a directory. The mount point
    /// is canonicalized if it exists, otherwise made absolute. Neither may
    /// be inside the other.
    pub fn new(source: impl AsRef<Path>, mount: impl AsRef<Path>) -> Result<Self, MountError> {
        let source = source.as_ref();
        let source_abs =
            fs::canonicalize(source).map_err(|e| MountError::SourceInaccessible {
                path: source.to_path_buf(),
                source: e,
            })?;
        if !fs::metadata(&source_abs)?.is_dir() {
            return Err(MountError::SourceNotADirectory(source_abs));
        }

        let mount = mount.as_ref();
        let mount_abs = match fs::canonicalize(mount) {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::NotFound => std::path::absolute(mount)?,
            Err(e) => return Err(e.into()),
        };

        if source_abs.starts_with(&mount_abs) || mount_abs.starts_with(&source_abs) {
            return Err(MountError::Overlapping {
                source_path: source_abs,
                mount_path: mount_abs,
            });
        }

        Ok(Self {
            source: source_abs,
            mount: mount_abs,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn mount(&self) -> &Path {
        &self.mount
    }

    /// A path guard confined to this source.
    pub fn guard(&self) -> PathGuard {
        PathGuard::new(&self.source, &self.mount)
    }
}

/// Options for preparing and attaching a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct MountOptions {
    /// Lazily unmount whatever is still attached at the mount point.
    pub force: bool,
    /// Create the mount point if it does not exist.
    pub auto_create: bool,
    /// Ask the kernel to unmount when the process exits.
    pub auto_unmount: bool,
    /// Let the kernel enforce permission bits.
    pub default_permissions: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            force: true,
            auto_create: true,
            auto_unmount: true,
            default_permissions: true,
        }
    }
}
