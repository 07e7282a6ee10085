//! FUSE filesystem on top of a combined store.
//!
//! Translates kernel requests (inode numbers, offsets, reply objects) into
//! path-based calls on a [`FsLayer`] and the results back into replies.
//!
//! | Operation | Store call |
//! |-----------|------------|
//! | lookup | `getattr(parent/name)` |
//! | getattr | `fgetattr` with a handle, else `getattr` |
//! | setattr | `chmod`, `chown`, `truncate`/`ftruncate`, `utimens`, then re-stat |
//! | mknod/mkdir/symlink/link | operation, then `getattr` for the entry |
//! | readdir | `.`, `..`, then `readdir` |
//! | statfs | `statvfs` of the source root |
//!
//! `create` and `access` are left to the kernel: without `create` it falls
//! back to `mknod` + `open`, and permission bits are enforced by the kernel
//! when mounted with `default_permissions`.

use crate::config::MountConfig;
use crate::error::{FuseError, FuseResult};
use crate::inode::{InodeTable, ROOT_INODE};
use fused_core::{FileKind, FileStat, FsLayer};
use fused_mount::errno_name;
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, trace, warn};

/// Block size reported by `statfs` when the source cannot be queried.
const BLOCK_SIZE: u32 = 4096;

/// Converts a store stat to the attribute record the kernel expects.
pub fn to_file_attr(ino: u64, stat: &FileStat) -> FileAttr {
    FileAttr {
        ino,
        size: stat.size,
        blocks: stat.blocks,
        atime: stat.atime,
        mtime: stat.mtime,
        ctime: stat.ctime,
        crtime: stat.ctime,
        kind: to_file_type(stat.kind),
        perm: stat.perm,
        nlink: stat.nlink,
        uid: stat.uid,
        gid: stat.gid,
        rdev: stat.rdev,
        blksize: stat.blksize,
        flags: 0,
    }
}

pub fn to_file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::RegularFile => FileType::RegularFile,
        FileKind::Directory => FileType::Directory,
        FileKind::Symlink => FileType::Symlink,
        FileKind::NamedPipe => FileType::NamedPipe,
        FileKind::CharDevice => FileType::CharDevice,
        FileKind::BlockDevice => FileType::BlockDevice,
        FileKind::Socket => FileType::Socket,
    }
}

fn offset_of(offset: i64) -> FuseResult<u64> {
    u64::try_from(offset).map_err(|_| FuseError::InvalidOffset(offset))
}

fn time_of(t: TimeOrNow) -> SystemTime {
    match t {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

/// A mounted combination of stores.
pub struct FusedFs {
    store: Box<dyn FsLayer>,
    inodes: InodeTable,
    source_root: PathBuf,
    config: MountConfig,
}

impl FusedFs {
    /// Wraps a combined store. `source_root` is queried for `statfs`.
    pub fn new(store: Box<dyn FsLayer>, source_root: impl Into<PathBuf>, config: MountConfig) -> Self {
        Self {
            store,
            inodes: InodeTable::new(),
            source_root: source_root.into(),
            config,
        }
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    fn path_of(&self, ino: u64) -> FuseResult<PathBuf> {
        self.inodes.path(ino).ok_or(FuseError::InvalidInode(ino))
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> FuseResult<PathBuf> {
        Ok(self.path_of(parent)?.join(name))
    }

    /// Stats `path` and binds it to an inode, counting one lookup.
    fn entry_for(&self, path: &Path) -> FuseResult<FileAttr> {
        let stat = self.store.getattr(path)?;
        let ino = self.inodes.get_or_insert(path);
        Ok(to_file_attr(ino, &stat))
    }

    fn attr_of(&self, ino: u64, fh: Option<u64>) -> FuseResult<FileAttr> {
        let path = self.path_of(ino)?;
        let stat = match fh {
            Some(fd) => self.store.fgetattr(&path, fd)?,
            None => self.store.getattr(&path)?,
        };
        Ok(to_file_attr(ino, &stat))
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_setattr(
        &self,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        fh: Option<u64>,
    ) -> FuseResult<FileAttr> {
        let path = self.path_of(ino)?;

        if let Some(mode) = mode {
            self.store.chmod(&path, mode)?;
        }
        if uid.is_some() || gid.is_some() {
            self.store.chown(&path, uid, gid)?;
        }
        if let Some(size) = size {
            match fh {
                Some(fd) => self.store.ftruncate(&path, fd, size)?,
                None => self.store.truncate(&path, size)?,
            }
        }
        if atime.is_some() || mtime.is_some() {
            // Only one side may be given; keep the other as it is
            let current = self.store.getattr(&path)?;
            let atime = atime.map_or(current.atime, time_of);
            let mtime = mtime.map_or(current.mtime, time_of);
            self.store.utimens(&path, atime, mtime)?;
        }

        self.attr_of(ino, fh)
    }

    fn rename_entry(
        &self,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
    ) -> FuseResult<()> {
        if flags != 0 {
            return Err(FuseError::RenameFlags(flags));
        }
        let from = self.child_of(parent, name)?;
        let to = self.child_of(newparent, newname)?;
        self.store.rename(&from, &to)?;
        self.inodes.rename_path(&from, &to);
        Ok(())
    }

    fn link_entry(&self, ino: u64, newparent: u64, newname: &OsStr) -> FuseResult<FileAttr> {
        let target = self.path_of(ino)?;
        let path = self.child_of(newparent, newname)?;
        self.store.link(&target, &path)?;
        self.entry_for(&path)
    }

    fn read_at(&self, ino: u64, fh: u64, offset: i64, size: u32) -> FuseResult<Vec<u8>> {
        let path = self.path_of(ino)?;
        let offset = offset_of(offset)?;
        let mut buf = vec![0u8; size as usize];
        let n = self.store.read(&path, fh, &mut buf, offset)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn write_at(&self, ino: u64, fh: u64, offset: i64, data: &[u8]) -> FuseResult<usize> {
        let path = self.path_of(ino)?;
        let offset = offset_of(offset)?;
        Ok(self.store.write(&path, fh, data, offset)?)
    }

    fn listing(&self, ino: u64) -> FuseResult<Vec<(u64, FileType, PathBuf)>> {
        let path = self.path_of(ino)?;
        let names = self.store.readdir(&path)?;

        let parent_ino = path
            .parent()
            .and_then(|p| self.inodes.get_inode(p))
            .unwrap_or(ROOT_INODE);

        let mut entries = Vec::with_capacity(names.len() + 2);
        entries.push((ino, FileType::Directory, PathBuf::from(".")));
        entries.push((parent_ino, FileType::Directory, PathBuf::from("..")));

        for name in names {
            let child = path.join(&name);
            let kind = match self.store.getattr(&child) {
                Ok(stat) => to_file_type(stat.kind),
                Err(e) => {
                    debug!(path = %child.display(), error = %e, "readdir: entry vanished while listing");
                    continue;
                }
            };
            let child_ino = self.inodes.get_or_insert_no_lookup_inc(&child);
            entries.push((child_ino, kind, PathBuf::from(name)));
        }
        Ok(entries)
    }

    #[allow(clippy::useless_conversion)]
    fn statfs_of_source(&self) -> (u64, u64, u64, u64, u64, u32, u32, u32) {
        match nix::sys::statvfs::statvfs(&self.source_root) {
            Ok(stat) => {
                #[allow(clippy::cast_possible_truncation)]
                let name_max = stat.name_max() as u32;
                #[allow(clippy::cast_possible_truncation)]
                let block_size = stat.block_size() as u32;
                #[allow(clippy::cast_possible_truncation)]
                let fragment_size = stat.fragment_size() as u32;
                (
                    u64::from(stat.blocks()),
                    u64::from(stat.blocks_free()),
                    u64::from(stat.blocks_available()),
                    u64::from(stat.files()),
                    u64::from(stat.files_free()),
                    block_size,
                    name_max,
                    fragment_size,
                )
            }
            Err(e) => {
                debug!(error = %e, "Failed to get statfs, using defaults");
                (1_000_000, 500_000, 500_000, 1_000_000, 500_000, BLOCK_SIZE, 255, BLOCK_SIZE)
            }
        }
    }
}

impl Filesystem for FusedFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        self.store.init().map_err(|e| {
            warn!(error = %e, "Store initialization failed");
            fused_mount::fs_error_to_errno(&e)
        })?;
        info!(source = %self.source_root.display(), "FUSE filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        info!("FUSE filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace!(parent, name = ?name, "lookup");
        match self.child_of(parent, name).and_then(|p| self.entry_for(&p)) {
            Ok(attr) => reply.entry(&self.config.entry_ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(inode = ino, nlookup, "forget");
        self.inodes.forget(ino, nlookup);
    }

    fn batch_forget(&mut self, _req: &Request<'_>, nodes: &[fuser::fuse_forget_one]) {
        trace!(count = nodes.len(), "batch_forget");
        for node in nodes {
            self.inodes.forget(node.nodeid, node.nlookup);
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        trace!(inode = ino, fh = ?fh, "getattr");
        match self.attr_of(ino, fh) {
            Ok(attr) => reply.attr(&self.config.attr_ttl, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        trace!(inode = ino, mode = ?mode, uid = ?uid, gid = ?gid, size = ?size, fh = ?fh, "setattr");
        match self.apply_setattr(ino, mode, uid, gid, size, atime, mtime, fh) {
            Ok(attr) => reply.attr(&self.config.attr_ttl, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        trace!(inode = ino, "readlink");
        let result = self
            .path_of(ino)
            .and_then(|p| Ok(self.store.readlink(&p)?));
        match result {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        trace!(parent, name = ?name, mode = format_args!("{mode:o}"), "mknod");
        let result = self.child_of(parent, name).and_then(|path| {
            self.store.mknod(&path, mode, rdev)?;
            self.entry_for(&path)
        });
        match result {
            Ok(attr) => reply.entry(&self.config.entry_ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        trace!(parent, name = ?name, "mkdir");
        let result = self.child_of(parent, name).and_then(|path| {
            self.store.mkdir(&path, mode)?;
            self.entry_for(&path)
        });
        match result {
            Ok(attr) => reply.entry(&self.config.entry_ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, name = ?name, "unlink");
        let result = self.child_of(parent, name).and_then(|path| {
            self.store.unlink(&path)?;
            self.inodes.invalidate_path(&path);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        trace!(parent, name = ?name, "rmdir");
        let result = self.child_of(parent, name).and_then(|path| {
            self.store.rmdir(&path)?;
            self.inodes.invalidate_path(&path);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        trace!(parent, name = ?link_name, target = %target.display(), "symlink");
        let result = self.child_of(parent, link_name).and_then(|path| {
            self.store.symlink(target, &path)?;
            self.entry_for(&path)
        });
        match result {
            Ok(attr) => reply.entry(&self.config.entry_ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        trace!(parent, name = ?name, newparent, newname = ?newname, flags, "rename");
        match self.rename_entry(parent, name, newparent, newname, flags) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        trace!(inode = ino, newparent, newname = ?newname, "link");
        match self.link_entry(ino, newparent, newname) {
            Ok(attr) => reply.entry(&self.config.entry_ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, flags, "open");
        let result = self
            .path_of(ino)
            .and_then(|p| Ok(self.store.open(&p, flags)?));
        match result {
            Ok(fd) => reply.opened(fd, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(inode = ino, fh, offset, size, "read");
        match self.read_at(ino, fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => {
                // The read reply carries a byte count, not an error
                warn!(
                    inode = ino,
                    fh,
                    errno = errno_name(e.to_errno()),
                    error = %e,
                    "read failed, returning no data"
                );
                reply.data(&[]);
            }
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(inode = ino, fh, offset, len = data.len(), "write");
        match self.write_at(ino, fh, offset, data) {
            #[allow(clippy::cast_possible_truncation)]
            Ok(written) => reply.written(written as u32),
            Err(e) => {
                warn!(
                    inode = ino,
                    fh,
                    errno = errno_name(e.to_errno()),
                    error = %e,
                    "write failed, reporting zero bytes"
                );
                reply.written(0);
            }
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        trace!(inode = ino, fh, "flush");
        let result = self
            .path_of(ino)
            .and_then(|p| Ok(self.store.flush(&p, fh)?));
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(inode = ino, fh, "release");
        let result = self
            .path_of(ino)
            .and_then(|p| Ok(self.store.release(&p, fh)?));
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        trace!(inode = ino, fh, datasync, "fsync");
        let result = self
            .path_of(ino)
            .and_then(|p| Ok(self.store.fsync(&p, fh, datasync)?));
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, flags, "opendir");
        let result = self
            .path_of(ino)
            .and_then(|p| Ok(self.store.opendir(&p, flags)?));
        match result {
            Ok(fd) => reply.opened(fd, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(inode = ino, offset, "readdir");
        let entries = match self.listing(ino) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, (entry_ino, kind, name)) in entries.iter().enumerate().skip(skip) {
            #[allow(clippy::cast_possible_wrap)]
            let next_offset = (i + 1) as i64;
            if reply.add(*entry_ino, next_offset, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        trace!(inode = ino, fh, "releasedir");
        let result = self
            .path_of(ino)
            .and_then(|p| Ok(self.store.releasedir(&p, fh)?));
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let (blocks, bfree, bavail, files, ffree, bsize, namelen, frsize) = self.statfs_of_source();
        reply.statfs(blocks, bfree, bavail, files, ffree, bsize, namelen, frsize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fused_core::{PathGuard, RealFs};
    use std::time::Duration;

    fn stat(kind: FileKind) -> FileStat {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        FileStat {
            kind,
            perm: 0o640,
            size: 1234,
            blocks: 3,
            nlink: 1,
            uid: 1000,
            gid: 100,
            rdev: 0,
            blksize: 4096,
            atime: t,
            mtime: t,
            ctime: t,
        }
    }

    #[test]
    fn test_to_file_attr() {
        let attr = to_file_attr(7, &stat(FileKind::RegularFile));
        assert_eq!(attr.ino, 7);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.perm, 0o640);
        assert_eq!(attr.size, 1234);
        assert_eq!((attr.uid, attr.gid), (1000, 100));
        assert_eq!(attr.crtime, attr.ctime);
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(to_file_type(FileKind::Directory), FileType::Directory);
        assert_eq!(to_file_type(FileKind::Symlink), FileType::Symlink);
        assert_eq!(to_file_type(FileKind::NamedPipe), FileType::NamedPipe);
        assert_eq!(to_file_type(FileKind::Socket), FileType::Socket);
    }

    #[test]
    fn test_negative_offset_is_rejected() {
        assert!(matches!(offset_of(-1), Err(FuseError::InvalidOffset(-1))));
        assert_eq!(offset_of(42).unwrap(), 42);
    }

    #[test]
    fn test_listing_includes_dot_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("dir")).unwrap();
        std::fs::write(src.join("file"), "x").unwrap();
        let guard = PathGuard::new(&src, tmp.path().join("mnt"));
        let fs = FusedFs::new(Box::new(RealFs::new(guard)), &src, MountConfig::default());

        let entries = fs.listing(ROOT_INODE).unwrap();
        let names: Vec<_> = entries.iter().map(|(_, _, n)| n.clone()).collect();
        assert_eq!(names[0], PathBuf::from("."));
        assert_eq!(names[1], PathBuf::from(".."));
        assert!(names.contains(&PathBuf::from("dir")));
        assert!(names.contains(&PathBuf::from("file")));

        let (dir_ino, kind, _) = entries
            .iter()
            .find(|(_, _, n)| n == Path::new("dir"))
            .unwrap();
        assert_eq!(*kind, FileType::Directory);
        assert_eq!(fs.inodes().nlookup(*dir_ino), Some(0));
    }

    #[test]
    fn test_unknown_inode() {
        let tmp = tempfile::tempdir().unwrap();
        let guard = PathGuard::new(tmp.path(), tmp.path().join("../mnt"));
        let fs = FusedFs::new(Box::new(RealFs::new(guard)), tmp.path(), MountConfig::default());
        assert!(matches!(fs.attr_of(999, None), Err(FuseError::InvalidInode(999))));
    }

    #[test]
    fn test_setattr_truncates_and_restats() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("file"), "file").unwrap();
        let guard = PathGuard::new(&src, tmp.path().join("mnt"));
        let fs = FusedFs::new(Box::new(RealFs::new(guard)), &src, MountConfig::default());

        let ino = fs.entry_for(Path::new("/file")).unwrap().ino;
        let attr = fs
            .apply_setattr(ino, Some(0o600), None, None, Some(2), None, None, None)
            .unwrap();
        assert_eq!(attr.size, 2);
        assert_eq!(attr.perm, 0o600);
        assert_eq!(std::fs::read(src.join("file")).unwrap(), b"fi");
    }
}
