//! Store that serves a [`ContentProvider`] as files and folders.
//!
//! Open files are buffered in a [`VirtualFileRecord`] and written back to the
//! provider on flush, fsync and release. Metadata is synthesized from the
//! provider's [`MiniStat`].

use parking_lot::Mutex;
use std::fs::{self, DirBuilder};
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, trace};

use crate::buffer::{VirtualFileRecord, checked_size};
use crate::error::{FsError, FsResult};
use crate::fd::FdTable;
use crate::layer::{Claim, Fd, FileKind, FileStat, FsLayer};
use crate::path::PathGuard;
use crate::provider::{ContentProvider, MiniStat};

/// Block size reported for virtual entries.
const BLOCK_SIZE: u32 = 4096;

/// Folder mode: `rwxrwxr-x`.
const FOLDER_PERM: u16 = 0o775;

#[derive(Debug, Clone)]
enum OpenEntry {
    Dir,
    File {
        path: PathBuf,
        record: Arc<Mutex<VirtualFileRecord>>,
    },
}

/// A filesystem layer backed by one content provider.
pub struct VirtualFs {
    provider: Arc<dyn ContentProvider>,
    guard: PathGuard,
    open: FdTable<OpenEntry>,
    uid: u32,
    gid: u32,
    started: SystemTime,
}

impl VirtualFs {
    /// Creates a store whose entries are owned by the owner of the source root.
    pub fn new(provider: Arc<dyn ContentProvider>, guard: PathGuard) -> FsResult<Self> {
        let meta = fs::metadata(guard.source_root())?;
        Ok(Self::with_owner(provider, guard, meta.uid(), meta.gid()))
    }

    pub fn with_owner(
        provider: Arc<dyn ContentProvider>,
        guard: PathGuard,
        uid: u32,
        gid: u32,
    ) -> Self {
        Self {
            provider,
            guard,
            open: FdTable::new(),
            uid,
            gid,
            started: SystemTime::now(),
        }
    }

    /// Number of open files and folders.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    fn expand(&self, stat: MiniStat) -> FileStat {
        match stat {
            MiniStat::Folder => FileStat {
                kind: FileKind::Directory,
                perm: FOLDER_PERM,
                size: 0,
                blocks: 0,
                nlink: 2,
                uid: self.uid,
                gid: self.gid,
                rdev: 0,
                blksize: BLOCK_SIZE,
                atime: self.started,
                mtime: self.started,
                ctime: self.started,
            },
            MiniStat::File {
                writable,
                executable,
                modified,
                size,
            } => {
                // "other" never gets write or execute
                let mut perm = 0o444;
                if writable {
                    perm |= 0o220;
                }
                if executable {
                    perm |= 0o110;
                }
                FileStat {
                    kind: FileKind::RegularFile,
                    perm,
                    size,
                    blocks: size.div_ceil(512),
                    nlink: 1,
                    uid: self.uid,
                    gid: self.gid,
                    rdev: 0,
                    blksize: BLOCK_SIZE,
                    atime: modified,
                    mtime: modified,
                    ctime: self.started,
                }
            }
        }
    }

    fn file_record(&self, path: &Path, fd: Fd) -> FsResult<Arc<Mutex<VirtualFileRecord>>> {
        match self.open.get(fd) {
            Some(OpenEntry::File { record, .. }) => Ok(record),
            Some(OpenEntry::Dir) => Err(FsError::IsADirectory(path.to_path_buf())),
            None => Err(FsError::BadDescriptor(fd)),
        }
    }

    /// Writes a dirty record back to the provider.
    fn commit(&self, path: &Path, record: &Mutex<VirtualFileRecord>) -> FsResult<()> {
        let mut record = record.lock();
        if !record.is_dirty() {
            return Ok(());
        }
        self.provider.write(path, record.content())?;
        record.mark_clean();
        debug!(path = %path.display(), size = record.len(), "Committed virtual file");
        Ok(())
    }

    fn sync(&self, path: &Path, fd: Fd) -> FsResult<()> {
        match self.open.get(fd) {
            Some(OpenEntry::File { path, record }) => self.commit(&path, &record),
            Some(OpenEntry::Dir) => Ok(()),
            None => {
                trace!(path = %path.display(), fd, "Sync on unknown descriptor");
                Err(FsError::BadDescriptor(fd))
            }
        }
    }
}

impl std::fmt::Debug for VirtualFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualFs")
            .field("open", &self.open.len())
            .field("uid", &self.uid)
            .field("gid", &self.gid)
            .finish_non_exhaustive()
    }
}

fn rejected(op: &str, path: &Path) -> FsError {
    FsError::PermissionDenied(format!("{op} on virtual path {}", path.display()))
}

impl FsLayer for VirtualFs {
    fn init(&self) -> FsResult<()> {
        debug!(uid = self.uid, gid = self.gid, "Virtual store ready");
        Ok(())
    }

    fn handles(&self, path: &Path) -> Claim {
        self.provider.classify(path)
    }

    fn getattr(&self, path: &Path) -> FsResult<FileStat> {
        Ok(self.expand(self.provider.stat(path)?))
    }

    fn fgetattr(&self, path: &Path, fd: Fd) -> FsResult<FileStat> {
        match self.open.get(fd) {
            Some(OpenEntry::File { path, record }) => {
                let mut stat = self.getattr(&path)?;
                // unflushed writes are visible through the descriptor
                stat.size = record.lock().len();
                stat.blocks = stat.size.div_ceil(512);
                Ok(stat)
            }
            Some(OpenEntry::Dir) | None => self.getattr(path),
        }
    }

    fn flush(&self, path: &Path, fd: Fd) -> FsResult<()> {
        self.sync(path, fd)
    }

    fn fsync(&self, path: &Path, fd: Fd, _datasync: bool) -> FsResult<()> {
        self.sync(path, fd)
    }

    fn readdir(&self, path: &Path) -> FsResult<Vec<String>> {
        self.provider.list(path)
    }

    fn truncate(&self, path: &Path, size: u64) -> FsResult<()> {
        let size = checked_size(size)?;
        let mut content = self.provider.read(path)?;
        content.resize(size, 0);
        self.provider.write(path, &content)
    }

    fn ftruncate(&self, path: &Path, fd: Fd, size: u64) -> FsResult<()> {
        let record = self.file_record(path, fd)?;
        record.lock().truncate(size)
    }

    fn readlink(&self, path: &Path) -> FsResult<PathBuf> {
        Err(FsError::InvalidArgument(format!(
            "{} is not a symlink",
            path.display()
        )))
    }

    fn chown(&self, path: &Path, _uid: Option<u32>, _gid: Option<u32>) -> FsResult<()> {
        Err(rejected("chown", path))
    }

    fn chmod(&self, path: &Path, _mode: u32) -> FsResult<()> {
        Err(rejected("chmod", path))
    }

    fn mknod(&self, path: &Path, _mode: u32, _rdev: u32) -> FsResult<()> {
        Err(rejected("mknod", path))
    }

    fn open(&self, path: &Path, flags: i32) -> FsResult<Fd> {
        let MiniStat::File { writable, .. } = self.provider.stat(path)? else {
            return Err(FsError::IsADirectory(path.to_path_buf()));
        };
        if !writable && flags & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(rejected("write", path));
        }

        let record = if flags & libc::O_TRUNC != 0 {
            VirtualFileRecord::new_truncated()
        } else {
            VirtualFileRecord::new(self.provider.read(path)?)
        };
        let fd = self.open.insert(OpenEntry::File {
            path: path.to_path_buf(),
            record: Arc::new(Mutex::new(record)),
        })?;
        trace!(path = %path.display(), fd, "Opened virtual file");
        Ok(fd)
    }

    fn opendir(&self, path: &Path, _flags: i32) -> FsResult<Fd> {
        match self.provider.stat(path)? {
            MiniStat::Folder => self.open.insert(OpenEntry::Dir),
            MiniStat::File { .. } => Err(FsError::NotADirectory(path.to_path_buf())),
        }
    }

    fn read(&self, path: &Path, fd: Fd, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        let record = self.file_record(path, fd)?;
        let record = record.lock();
        let data = record.read(offset, buf.len());
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn write(&self, path: &Path, fd: Fd, data: &[u8], offset: u64) -> FsResult<usize> {
        let record = self.file_record(path, fd)?;
        record.lock().write(offset, data)
    }

    fn release(&self, path: &Path, fd: Fd) -> FsResult<()> {
        match self.open.remove(fd) {
            Some(OpenEntry::File { path, record }) => self.commit(&path, &record),
            Some(OpenEntry::Dir) => Err(FsError::IsADirectory(path.to_path_buf())),
            None => Err(FsError::BadDescriptor(fd)),
        }
    }

    fn releasedir(&self, _path: &Path, fd: Fd) -> FsResult<()> {
        match self.open.remove(fd) {
            Some(OpenEntry::Dir) => Ok(()),
            // a file released as a folder still gets its content committed
            Some(OpenEntry::File { path, record }) => self.commit(&path, &record),
            None => Err(FsError::BadDescriptor(fd)),
        }
    }

    fn utimens(&self, path: &Path, _atime: SystemTime, mtime: SystemTime) -> FsResult<()> {
        self.provider.touch(path, mtime)
    }

    fn unlink(&self, path: &Path) -> FsResult<()> {
        Err(rejected("unlink", path))
    }

    fn rename(&self, _from: &Path, _to: &Path) -> FsResult<()> {
        Err(FsError::Unsupported("rename"))
    }

    fn symlink(&self, _target: &Path, _path: &Path) -> FsResult<()> {
        Err(FsError::Unsupported("symlink"))
    }

    fn link(&self, _target: &Path, _path: &Path) -> FsResult<()> {
        Err(FsError::Unsupported("link"))
    }

    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()> {
        let real = self.guard.resolve(path)?;
        if fs::symlink_metadata(&real).is_ok() {
            return Err(FsError::AlreadyExists(path.to_path_buf()));
        }
        // the virtual parent may not exist on disk yet
        if let Some(parent) = real.parent() {
            fs::create_dir_all(parent)?;
        }
        DirBuilder::new().mode(mode & 0o7777).create(&real)?;
        debug!(path = %path.display(), real = %real.display(), "Created real folder under virtual parent");
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> FsResult<()> {
        Err(rejected("rmdir", path))
    }
}
