//! Test mount harness for FUSE integration tests.
//!
//! `TestMount` builds a small source tree, layers an in-memory file over it,
//! mounts the result and unmounts on drop.

// Not all tests use all TestMount methods
#![allow(dead_code)]

use fused_core::{FsLayer, InMemoryFile, RealFs, VirtualFs, compose};
use fused_fuse::{FusedMountHandle, MountConfig, backend};
use fused_mount::MountPaths;
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Path of the in-memory file every test mount carries.
pub const VIRTUAL_PATH: &str = "/foo/bar";

/// Initial content of the in-memory file.
pub const VIRTUAL_CONTENT: &[u8] = b"content";

/// A mounted source tree with one virtual file on top.
///
/// Source tree: `dir/foo = "foo"`, `file = "file"`.
pub struct TestMount {
    /// Unmounts on drop; declared first so it goes before the directories.
    handle: Option<FusedMountHandle>,
    /// In-memory file served at [`VIRTUAL_PATH`].
    pub provider: Arc<InMemoryFile>,
    /// Path where the tree is mounted.
    pub mount_path: PathBuf,
    /// Real directory under the mount.
    pub source_path: PathBuf,
    _temp: TempDir,
}

impl TestMount {
    /// Mount the standard test tree.
    pub fn with_tree() -> Result<Self, String> {
        let temp = TempDir::new().map_err(|e| format!("Failed to create temp dir: {e}"))?;
        let source_path = temp.path().join("src");
        fs::create_dir_all(source_path.join("dir"))
            .map_err(|e| format!("Failed to create source: {e}"))?;
        fs::write(source_path.join("dir/foo"), "foo").map_err(|e| e.to_string())?;
        fs::write(source_path.join("file"), "file").map_err(|e| e.to_string())?;

        let paths = MountPaths::new(&source_path, temp.path().join("mnt"))
            .map_err(|e| format!("Invalid paths: {e}"))?;
        let guard = paths.guard();

        let provider = Arc::new(InMemoryFile::new(VIRTUAL_PATH, VIRTUAL_CONTENT));
        let overlay = VirtualFs::new(provider.clone(), guard.clone())
            .map_err(|e| format!("Failed to create overlay: {e}"))?;
        let store = compose(
            Box::new(RealFs::new(guard)),
            [Box::new(overlay) as Box<dyn FsLayer>],
        );

        // No kernel caching: tests compare the mount against the source right away
        let config = MountConfig::default()
            .fs_name("fused-test")
            .attr_ttl(Duration::ZERO)
            .entry_ttl(Duration::ZERO);

        let handle =
            backend::mount(store, &paths, &config).map_err(|e| format!("Failed to mount: {e}"))?;

        Ok(Self {
            mount_path: handle.mountpoint().to_path_buf(),
            handle: Some(handle),
            provider,
            source_path: paths.source().to_path_buf(),
            _temp: temp,
        })
    }

    // =========================================================================
    // Filesystem convenience methods
    // =========================================================================

    /// Build a full mount path from a mount-relative path.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.mount_path.join(relative.trim_start_matches('/'))
    }

    /// Build a full source path from a mount-relative path.
    pub fn source(&self, relative: &str) -> PathBuf {
        self.source_path.join(relative.trim_start_matches('/'))
    }

    /// Read a file's contents.
    pub fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let mut content = Vec::new();
        File::open(self.path(path))?.read_to_end(&mut content)?;
        Ok(content)
    }

    /// Write content to a file (creates or overwrites).
    pub fn write(&self, path: &str, content: &[u8]) -> io::Result<()> {
        let mut file = File::create(self.path(path))?;
        file.write_all(content)?;
        file.flush()?;
        Ok(())
    }

    /// Append content to an existing file.
    pub fn append(&self, path: &str, content: &[u8]) -> io::Result<()> {
        let mut file = fs::OpenOptions::new().append(true).open(self.path(path))?;
        file.write_all(content)?;
        file.flush()?;
        Ok(())
    }

    /// Truncate a file through an open descriptor.
    pub fn truncate(&self, path: &str, size: u64) -> io::Result<()> {
        let file = fs::OpenOptions::new().write(true).open(self.path(path))?;
        file.set_len(size)?;
        Ok(())
    }

    pub fn mkdir(&self, path: &str) -> io::Result<()> {
        fs::create_dir(self.path(path))
    }

    pub fn rmdir(&self, path: &str) -> io::Result<()> {
        fs::remove_dir(self.path(path))
    }

    pub fn remove(&self, path: &str) -> io::Result<()> {
        fs::remove_file(self.path(path))
    }

    pub fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.path(from), self.path(to))
    }

    pub fn metadata(&self, path: &str) -> io::Result<Metadata> {
        fs::metadata(self.path(path))
    }

    /// List a directory, sorted.
    pub fn list(&self, path: &str) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(self.path(path))?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().to_string()))
            .collect::<io::Result<_>>()?;
        names.sort();
        Ok(names)
    }

    /// Whether the mount point is still served by this mount.
    pub fn is_attached(&self) -> bool {
        self.handle.as_ref().is_some_and(FusedMountHandle::is_attached)
    }

    /// Unmount now rather than on drop.
    pub fn unmount(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.unmount();
        }
    }
}

/// Check if FUSE is available on this system.
pub fn fuse_available() -> bool {
    fused_fuse::fuse_available()
}

/// Asserts that `result` failed with the given errno.
pub fn assert_errno<T: std::fmt::Debug>(result: io::Result<T>, errno: i32) {
    let err = result.expect_err("operation should have failed");
    assert_eq!(err.raw_os_error(), Some(errno), "unexpected error: {err}");
}

/// Source file listing helper for comparisons against the mount.
pub fn read_source(path: &Path) -> Vec<u8> {
    fs::read(path).expect("source file should be readable")
}

/// Skip test if FUSE is not available.
#[macro_export]
macro_rules! skip_if_no_fuse {
    () => {
        if !$crate::common::harness::fuse_available() {
            eprintln!("Skipping test: FUSE not available on this system");
            return;
        }
    };
}

/// Skip test if mounting fails (common in CI environments).
#[macro_export]
macro_rules! require_mount {
    ($mount_result:expr) => {
        match $mount_result {
            Ok(m) => m,
            Err(e) => {
                eprintln!("Skipping test: {}", e);
                return;
            }
        }
    };
}
