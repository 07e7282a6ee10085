//! Passthrough store over a real source directory.

use dashmap::DashMap;
use std::fs::{self, DirBuilder, File, OpenOptions, Permissions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{DirBuilderExt, FileExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use filetime::FileTime;
use nix::sys::stat::{Mode, SFlag};
use tracing::{debug, warn};

use crate::error::{FsError, FsResult};
use crate::layer::{Claim, Fd, FileStat, FsLayer};
use crate::path::PathGuard;

/// First directory handle. OS descriptors are `c_int`, so directory
/// handles counted from here never collide with an open file's number.
pub const FIRST_DIR_HANDLE: Fd = 1 << 32;

/// Mirrors a source directory through a [`PathGuard`].
///
/// Files opened through [`FsLayer::open`] are keyed by their OS descriptor.
/// Files reopened for a descriptor we never issued live in their own table
/// under the caller's number. Directory handles count up from
/// [`FIRST_DIR_HANDLE`].
#[derive(Debug)]
pub struct RealFs {
    guard: PathGuard,
    files: DashMap<Fd, Arc<File>>,
    reopened: DashMap<Fd, Arc<File>>,
    dirs: DashMap<Fd, File>,
    next_dir: AtomicU64,
}

impl RealFs {
    pub fn new(guard: PathGuard) -> Self {
        Self {
            guard,
            files: DashMap::new(),
            reopened: DashMap::new(),
            dirs: DashMap::new(),
            next_dir: AtomicU64::new(FIRST_DIR_HANDLE),
        }
    }

    fn resolve(&self, path: &Path) -> FsResult<PathBuf> {
        self.guard.resolve(path)
    }

    fn open_file(&self, path: &Path, flags: i32) -> FsResult<File> {
        let real = self.resolve(path)?;
        Ok(open_options(flags).open(real)?)
    }

    /// Returns the file open under `fd`, reopening `path` if there is none.
    ///
    /// A reopened file is remembered under `fd` so that a later `release`
    /// closes it. With `fd == 0` it is remembered under its OS descriptor.
    fn get_or_open_file(&self, path: &Path, fd: Fd, flags: i32) -> FsResult<Arc<File>> {
        if let Some(file) = self.files.get(&fd) {
            return Ok(Arc::clone(file.value()));
        }
        if let Some(file) = self.reopened.get(&fd) {
            return Ok(Arc::clone(file.value()));
        }
        warn!(path = %path.display(), fd, "No file open for descriptor, reopening");
        let file = Arc::new(self.open_file(path, flags)?);
        let key = if fd == 0 {
            raw_fd(&file)
        } else {
            fd
        };
        self.reopened.insert(key, Arc::clone(&file));
        Ok(file)
    }

    /// Number of files currently held open.
    pub fn open_file_count(&self) -> usize {
        self.files.len() + self.reopened.len()
    }

    pub fn open_dir_count(&self) -> usize {
        self.dirs.len()
    }
}

#[allow(clippy::cast_sign_loss)]
fn raw_fd(file: &File) -> Fd {
    file.as_raw_fd() as Fd
}

/// Translates `open(2)` flags into `OpenOptions`.
///
/// Creation flags are dropped (creation goes through `mknod`) and so is
/// `O_APPEND`, since the kernel already supplies the append offset.
fn open_options(flags: i32) -> OpenOptions {
    let mut opts = OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => opts.write(true),
        libc::O_RDWR => opts.read(true).write(true),
        _ => opts.read(true),
    };
    opts.custom_flags(flags & !(libc::O_ACCMODE | libc::O_CREAT | libc::O_EXCL | libc::O_APPEND));
    opts
}

impl FsLayer for RealFs {
    fn init(&self) -> FsResult<()> {
        debug!(source = %self.guard.source_root().display(), "Real store ready");
        Ok(())
    }

    fn handles(&self, _path: &Path) -> Claim {
        Claim::Owned
    }

    fn getattr(&self, path: &Path) -> FsResult<FileStat> {
        let meta = fs::symlink_metadata(self.resolve(path)?)?;
        Ok(FileStat::from_metadata(&meta))
    }

    fn fgetattr(&self, path: &Path, fd: Fd) -> FsResult<FileStat> {
        if !self.files.contains_key(&fd) && self.dirs.contains_key(&fd) {
            return self.getattr(path);
        }
        let file = self.get_or_open_file(path, fd, libc::O_RDONLY)?;
        Ok(FileStat::from_metadata(&file.metadata()?))
    }

    fn flush(&self, _path: &Path, _fd: Fd) -> FsResult<()> {
        // Nothing is buffered on our side.
        Ok(())
    }

    fn fsync(&self, path: &Path, fd: Fd, datasync: bool) -> FsResult<()> {
        let file = self.get_or_open_file(path, fd, libc::O_RDWR)?;
        if datasync {
            file.sync_data()?;
        } else {
            file.sync_all()?;
        }
        Ok(())
    }

    fn readdir(&self, path: &Path) -> FsResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.resolve(path)?)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn truncate(&self, path: &Path, size: u64) -> FsResult<()> {
        let real = self.resolve(path)?;
        #[allow(clippy::cast_possible_wrap)]
        let size = size as libc::off_t;
        nix::unistd::truncate(&real, size).map_err(io::Error::from)?;
        Ok(())
    }

    fn ftruncate(&self, path: &Path, fd: Fd, size: u64) -> FsResult<()> {
        let file = self.get_or_open_file(path, fd, libc::O_WRONLY)?;
        file.set_len(size)?;
        Ok(())
    }

    fn readlink(&self, path: &Path) -> FsResult<PathBuf> {
        Ok(fs::read_link(self.resolve(path)?)?)
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        std::os::unix::fs::chown(self.resolve(path)?, uid, gid)?;
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()> {
        fs::set_permissions(self.resolve(path)?, Permissions::from_mode(mode & 0o7777))?;
        Ok(())
    }

    fn mknod(&self, path: &Path, mode: u32, rdev: u32) -> FsResult<()> {
        let real = self.resolve(path)?;
        match fs::symlink_metadata(&real) {
            Ok(_) => return Err(FsError::AlreadyExists(path.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        #[allow(clippy::cast_possible_truncation, clippy::unnecessary_cast)]
        let kind = SFlag::from_bits_truncate((mode & libc::S_IFMT as u32) as libc::mode_t);
        if kind.is_empty() || kind == SFlag::S_IFREG {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(mode & 0o7777)
                .open(&real)?;
        } else {
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_possible_wrap,
                clippy::unnecessary_cast
            )]
            let (perm, dev) = (
                Mode::from_bits_truncate((mode & 0o7777) as libc::mode_t),
                rdev as libc::dev_t,
            );
            nix::sys::stat::mknod(&real, kind, perm, dev)
                .map_err(io::Error::from)?;
        }
        Ok(())
    }

    fn open(&self, path: &Path, flags: i32) -> FsResult<Fd> {
        let file = self.open_file(path, flags)?;
        let fd = raw_fd(&file);
        // The number is ours now; a stale reopen filed under it is not.
        if self.reopened.remove(&fd).is_some() {
            debug!(fd, "Dropped reopened file shadowed by a new descriptor");
        }
        self.files.insert(fd, Arc::new(file));
        Ok(fd)
    }

    fn opendir(&self, path: &Path, _flags: i32) -> FsResult<Fd> {
        let real = self.resolve(path)?;
        let dir = File::open(&real)?;
        if !dir.metadata()?.is_dir() {
            return Err(FsError::NotADirectory(path.to_path_buf()));
        }
        let fd = self.next_dir.fetch_add(1, Ordering::Relaxed);
        self.dirs.insert(fd, dir);
        Ok(fd)
    }

    fn read(&self, path: &Path, fd: Fd, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        let file = self.get_or_open_file(path, fd, libc::O_RDONLY)?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn write(&self, path: &Path, fd: Fd, data: &[u8], offset: u64) -> FsResult<usize> {
        let file = self.get_or_open_file(path, fd, libc::O_WRONLY)?;
        file.write_all_at(data, offset)?;
        Ok(data.len())
    }

    fn release(&self, _path: &Path, fd: Fd) -> FsResult<()> {
        // Dropping the last Arc closes the file.
        self.files.remove(&fd);
        self.reopened.remove(&fd);
        Ok(())
    }

    fn releasedir(&self, _path: &Path, fd: Fd) -> FsResult<()> {
        self.dirs.remove(&fd);
        Ok(())
    }

    fn utimens(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> FsResult<()> {
        filetime::set_file_times(
            self.resolve(path)?,
            FileTime::from_system_time(atime),
            FileTime::from_system_time(mtime),
        )?;
        Ok(())
    }

    fn unlink(&self, path: &Path) -> FsResult<()> {
        fs::remove_file(self.resolve(path)?)?;
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        fs::rename(self.resolve(from)?, self.resolve(to)?)?;
        Ok(())
    }

    fn symlink(&self, target: &Path, path: &Path) -> FsResult<()> {
        // The target is link content, not a path we serve.
        std::os::unix::fs::symlink(target, self.resolve(path)?)?;
        Ok(())
    }

    fn link(&self, target: &Path, path: &Path) -> FsResult<()> {
        fs::hard_link(self.resolve(target)?, self.resolve(path)?)?;
        Ok(())
    }

    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()> {
        DirBuilder::new()
            .mode(mode & 0o7777)
            .create(self.resolve(path)?)?;
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> FsResult<()> {
        fs::remove_dir(self.resolve(path)?)?;
        Ok(())
    }
}
