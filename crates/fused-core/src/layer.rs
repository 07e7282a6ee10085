//! The filesystem contract every store implements.
//!
//! Stores are path-keyed: the adapter translates inodes to paths before
//! calling in. Descriptor-keyed calls still carry the path so a store can
//! fall back to reopening by path when it does not recognize the descriptor.

use std::fs::Metadata;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::FsResult;

/// A file descriptor as seen by callers of a store.
pub type Fd = u64;

/// Which store should serve a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The overlay exclusively owns the path.
    Owned,
    /// The overlay has no claim; the base serves it.
    Other,
    /// Try the base first and consult the overlay when the base has nothing.
    OtherWithFallback,
}

/// Type of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    RegularFile,
    Directory,
    Symlink,
    NamedPipe,
    CharDevice,
    BlockDevice,
    Socket,
}

/// Store-neutral POSIX metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub kind: FileKind,
    /// Permission bits only (no file type bits).
    pub perm: u16,
    pub size: u64,
    pub blocks: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl FileStat {
    /// Builds a stat record from `std` metadata.
    pub fn from_metadata(meta: &Metadata) -> Self {
        let ft = meta.file_type();
        let kind = if ft.is_dir() {
            FileKind::Directory
        } else if ft.is_symlink() {
            FileKind::Symlink
        } else if ft.is_fifo() {
            FileKind::NamedPipe
        } else if ft.is_char_device() {
            FileKind::CharDevice
        } else if ft.is_block_device() {
            FileKind::BlockDevice
        } else if ft.is_socket() {
            FileKind::Socket
        } else {
            FileKind::RegularFile
        };

        #[allow(clippy::cast_possible_truncation)]
        Self {
            kind,
            perm: (meta.mode() & 0o7777) as u16,
            size: meta.size(),
            blocks: meta.blocks(),
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev() as u32,
            blksize: meta.blksize() as u32,
            atime: unix_time(meta.atime(), meta.atime_nsec()),
            mtime: unix_time(meta.mtime(), meta.mtime_nsec()),
            ctime: unix_time(meta.ctime(), meta.ctime_nsec()),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

// `nsecs` always counts forward from `secs`, also before the epoch.
#[allow(clippy::cast_sign_loss)]
fn unix_time(secs: i64, nsecs: i64) -> SystemTime {
    let nanos = Duration::from_nanos(nsecs.clamp(0, 999_999_999) as u64);
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + nanos
    }
}

/// Operations a store must provide.
///
/// There are no default bodies: a store that cannot perform an operation
/// says so with a typed error.
pub trait FsLayer: Send + Sync {
    /// Called once before the first request.
    fn init(&self) -> FsResult<()>;

    /// Tells a composition which side should serve `path`.
    fn handles(&self, path: &Path) -> Claim;

    fn getattr(&self, path: &Path) -> FsResult<FileStat>;
    fn fgetattr(&self, path: &Path, fd: Fd) -> FsResult<FileStat>;
    fn flush(&self, path: &Path, fd: Fd) -> FsResult<()>;
    fn fsync(&self, path: &Path, fd: Fd, datasync: bool) -> FsResult<()>;

    /// Lists entry names in a directory, without `.` and `..`.
    fn readdir(&self, path: &Path) -> FsResult<Vec<String>>;

    fn truncate(&self, path: &Path, size: u64) -> FsResult<()>;
    fn ftruncate(&self, path: &Path, fd: Fd, size: u64) -> FsResult<()>;
    fn readlink(&self, path: &Path) -> FsResult<PathBuf>;
    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()>;
    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()>;
    fn mknod(&self, path: &Path, mode: u32, rdev: u32) -> FsResult<()>;

    fn open(&self, path: &Path, flags: i32) -> FsResult<Fd>;
    fn opendir(&self, path: &Path, flags: i32) -> FsResult<Fd>;

    /// Reads into `buf` starting at `offset`, returning the byte count.
    fn read(&self, path: &Path, fd: Fd, buf: &mut [u8], offset: u64) -> FsResult<usize>;

    /// Writes `data` at `offset`, returning the byte count.
    fn write(&self, path: &Path, fd: Fd, data: &[u8], offset: u64) -> FsResult<usize>;

    fn release(&self, path: &Path, fd: Fd) -> FsResult<()>;
    fn releasedir(&self, path: &Path, fd: Fd) -> FsResult<()>;

    fn utimens(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> FsResult<()>;
    fn unlink(&self, path: &Path) -> FsResult<()>;
    fn rename(&self, from: &Path, to: &Path) -> FsResult<()>;

    /// Creates `path` as a symlink whose content is `target`, verbatim.
    fn symlink(&self, target: &Path, path: &Path) -> FsResult<()>;

    /// Creates `path` as a hard link to `target`.
    fn link(&self, target: &Path, path: &Path) -> FsResult<()>;

    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()>;
    fn rmdir(&self, path: &Path) -> FsResult<()>;
}

impl<T: FsLayer + ?Sized> FsLayer for Box<T> {
    fn init(&self) -> FsResult<()> {
        (**self).init()
    }
    fn handles(&self, path: &Path) -> Claim {
        (**self).handles(path)
    }
    fn getattr(&self, path: &Path) -> FsResult<FileStat> {
        (**self).getattr(path)
    }
    fn fgetattr(&self, path: &Path, fd: Fd) -> FsResult<FileStat> {
        (**self).fgetattr(path, fd)
    }
    fn flush(&self, path: &Path, fd: Fd) -> FsResult<()> {
        (**self).flush(path, fd)
    }
    fn fsync(&self, path: &Path, fd: Fd, datasync: bool) -> FsResult<()> {
        (**self).fsync(path, fd, datasync)
    }
    fn readdir(&self, path: &Path) -> FsResult<Vec<String>> {
        (**self).readdir(path)
    }
    fn truncate(&self, path: &Path, size: u64) -> FsResult<()> {
        (**self).truncate(path, size)
    }
    fn ftruncate(&self, path: &Path, fd: Fd, size: u64) -> FsResult<()> {
        (**self).ftruncate(path, fd, size)
    }
    fn readlink(&self, path: &Path) -> FsResult<PathBuf> {
        (**self).readlink(path)
    }
    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        (**self).chown(path, uid, gid)
    }
    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()> {
        (**self).chmod(path, mode)
    }
    fn mknod(&self, path: &Path, mode: u32, rdev: u32) -> FsResult<()> {
        (**self).mknod(path, mode, rdev)
    }
    fn open(&self, path: &Path, flags: i32) -> FsResult<Fd> {
        (**self).open(path, flags)
    }
    fn opendir(&self, path: &Path, flags: i32) -> FsResult<Fd> {
        (**self).opendir(path, flags)
    }
    fn read(&self, path: &Path, fd: Fd, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        (**self).read(path, fd, buf, offset)
    }
    fn write(&self, path: &Path, fd: Fd, data: &[u8], offset: u64) -> FsResult<usize> {
        (**self).write(path, fd, data, offset)
    }
    fn release(&self, path: &Path, fd: Fd) -> FsResult<()> {
        (**self).release(path, fd)
    }
    fn releasedir(&self, path: &Path, fd: Fd) -> FsResult<()> {
        (**self).releasedir(path, fd)
    }
    fn utimens(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> FsResult<()> {
        (**self).utimens(path, atime, mtime)
    }
    fn unlink(&self, path: &Path) -> FsResult<()> {
        (**self).unlink(path)
    }
    fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        (**self).rename(from, to)
    }
    fn symlink(&self, target: &Path, path: &Path) -> FsResult<()> {
        (**self).symlink(target, path)
    }
    fn link(&self, target: &Path, path: &Path) -> FsResult<()> {
        (**self).link(target, path)
    }
    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()> {
        (**self).mkdir(path, mode)
    }
    fn rmdir(&self, path: &Path) -> FsResult<()> {
        (**self).rmdir(path)
    }
}
