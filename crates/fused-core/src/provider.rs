//! Content providers behind a [`VirtualFs`](crate::virtual_fs::VirtualFs).
//!
//! A provider decides which paths it claims and supplies their content and
//! minimal metadata. Everything else about a virtual file (descriptors,
//! buffering, full POSIX attributes) is handled by the virtual store.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{FsError, FsResult};
use crate::layer::Claim;

/// Minimal metadata a provider reports for a claimed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiniStat {
    Folder,
    File {
        writable: bool,
        executable: bool,
        modified: SystemTime,
        size: u64,
    },
}

/// Source of virtual content.
pub trait ContentProvider: Send + Sync {
    /// Which side of a composition should serve `path`.
    fn classify(&self, path: &Path) -> Claim;

    /// Names of the entries this provider contributes to `folder`.
    fn list(&self, folder: &Path) -> FsResult<Vec<String>>;

    fn read(&self, path: &Path) -> FsResult<Vec<u8>>;

    /// Replaces the content of `path`.
    fn write(&self, path: &Path, content: &[u8]) -> FsResult<()>;

    fn stat(&self, path: &Path) -> FsResult<MiniStat>;

    /// Updates the modification time. Providers without timestamps ignore it.
    fn touch(&self, _path: &Path, _mtime: SystemTime) -> FsResult<()> {
        Ok(())
    }
}

/// Claim rules shared by the single-file providers.
///
/// The file itself is owned, every proper ancestor (including `/`) is a
/// folder merged with the base, and nothing else is claimed.
#[derive(Debug, Clone)]
struct SingleFilePath {
    path: PathBuf,
}

impl SingleFilePath {
    fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let path = if path.is_absolute() {
            path
        } else {
            Path::new("/").join(path)
        };
        Self { path }
    }

    fn is_file(&self, path: &Path) -> bool {
        path == self.path
    }

    fn is_ancestor(&self, path: &Path) -> bool {
        path != self.path && self.path.starts_with(path)
    }

    fn classify(&self, path: &Path) -> Claim {
        if self.is_file(path) {
            Claim::Owned
        } else if self.is_ancestor(path) {
            Claim::OtherWithFallback
        } else {
            Claim::Other
        }
    }

    /// The child of `folder` on the way to the file.
    fn list(&self, folder: &Path) -> FsResult<Vec<String>> {
        if !self.is_ancestor(folder) {
            return Err(FsError::NotFound(folder.to_path_buf()));
        }
        let rest = self
            .path
            .strip_prefix(folder)
            .map_err(|_| FsError::NotFound(folder.to_path_buf()))?;
        Ok(rest
            .components()
            .next()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .into_iter()
            .collect())
    }

    fn require_file(&self, path: &Path) -> FsResult<()> {
        if self.is_file(path) {
            Ok(())
        } else {
            Err(FsError::NotFound(path.to_path_buf()))
        }
    }
}

#[derive(Debug)]
struct FileState {
    content: Vec<u8>,
    modified: SystemTime,
}

/// A single writable file held in memory.
#[derive(Debug)]
pub struct InMemoryFile {
    location: SingleFilePath,
    state: RwLock<FileState>,
}

impl InMemoryFile {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            location: SingleFilePath::new(path),
            state: RwLock::new(FileState {
                content: content.into(),
                modified: SystemTime::now(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.location.path
    }

    /// Snapshot of the current content.
    pub fn content(&self) -> Vec<u8> {
        self.state.read().content.clone()
    }
}

impl ContentProvider for InMemoryFile {
    fn classify(&self, path: &Path) -> Claim {
        self.location.classify(path)
    }

    fn list(&self, folder: &Path) -> FsResult<Vec<String>> {
        self.location.list(folder)
    }

    fn read(&self, path: &Path) -> FsResult<Vec<u8>> {
        self.location.require_file(path)?;
        Ok(self.state.read().content.clone())
    }

    fn write(&self, path: &Path, content: &[u8]) -> FsResult<()> {
        self.location.require_file(path)?;
        let mut state = self.state.write();
        state.content = content.to_vec();
        state.modified = SystemTime::now();
        Ok(())
    }

    fn stat(&self, path: &Path) -> FsResult<MiniStat> {
        if self.location.is_ancestor(path) {
            return Ok(MiniStat::Folder);
        }
        self.location.require_file(path)?;
        let state = self.state.read();
        Ok(MiniStat::File {
            writable: true,
            executable: false,
            modified: state.modified,
            size: state.content.len() as u64,
        })
    }

    fn touch(&self, path: &Path, mtime: SystemTime) -> FsResult<()> {
        self.location.require_file(path)?;
        self.state.write().modified = mtime;
        Ok(())
    }
}

type Generator = dyn Fn() -> Vec<u8> + Send + Sync;

/// A read-only file whose content is computed on every read.
pub struct GeneratedFile {
    location: SingleFilePath,
    generate: Box<Generator>,
    created: SystemTime,
}

impl GeneratedFile {
    pub fn new<F>(path: impl Into<PathBuf>, generate: F) -> Self
    where
        F: Fn() -> Vec<u8> + Send + Sync + 'static,
    {
        Self {
            location: SingleFilePath::new(path),
            generate: Box::new(generate),
            created: SystemTime::now(),
        }
    }
}

impl std::fmt::Debug for GeneratedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedFile")
            .field("path", &self.location.path)
            .finish_non_exhaustive()
    }
}

impl ContentProvider for GeneratedFile {
    fn classify(&self, path: &Path) -> Claim {
        self.location.classify(path)
    }

    fn list(&self, folder: &Path) -> FsResult<Vec<String>> {
        self.location.list(folder)
    }

    fn read(&self, path: &Path) -> FsResult<Vec<u8>> {
        self.location.require_file(path)?;
        Ok((self.generate)())
    }

    fn write(&self, path: &Path, _content: &[u8]) -> FsResult<()> {
        self.location.require_file(path)?;
        Err(FsError::PermissionDenied(format!(
            "{} is generated and read-only",
            path.display()
        )))
    }

    fn stat(&self, path: &Path) -> FsResult<MiniStat> {
        if self.location.is_ancestor(path) {
            return Ok(MiniStat::Folder);
        }
        self.location.require_file(path)?;
        Ok(MiniStat::File {
            writable: false,
            executable: false,
            modified: self.created,
            size: (self.generate)().len() as u64,
        })
    }
}
