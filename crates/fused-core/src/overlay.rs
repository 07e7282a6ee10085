//! Composition of two layers into one.
//!
//! Path-keyed calls are routed by the overlay's [`Claim`] on the path.
//! Descriptors are re-issued from the composition's own table, so both
//! sides may hand out overlapping numbers without clashing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, trace};

use crate::error::FsResult;
use crate::fd::FdTable;
use crate::layer::{Claim, Fd, FileStat, FsLayer};

/// Which layer of a composition owns a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Base,
    Overlay,
}

/// A layer that serves `overlay` on top of `base`.
#[derive(Debug)]
pub struct OverlayFs<B, O> {
    base: B,
    overlay: O,
    fds: FdTable<(Side, Fd)>,
}

/// Stacks `overlays` on `base`, left to right.
///
/// The last overlay is consulted first.
pub fn compose(
    base: Box<dyn FsLayer>,
    overlays: impl IntoIterator<Item = Box<dyn FsLayer>>,
) -> Box<dyn FsLayer> {
    overlays
        .into_iter()
        .fold(base, |acc, overlay| Box::new(OverlayFs::new(acc, overlay)))
}

fn parent_of(path: &Path) -> &Path {
    path.parent().unwrap_or(path)
}

impl<B: FsLayer, O: FsLayer> OverlayFs<B, O> {
    pub fn new(base: B, overlay: O) -> Self {
        Self {
            base,
            overlay,
            fds: FdTable::new(),
        }
    }

    /// Number of descriptors currently issued by this composition.
    pub fn open_count(&self) -> usize {
        self.fds.len()
    }

    fn layer(&self, side: Side) -> &dyn FsLayer {
        match side {
            Side::Base => &self.base,
            Side::Overlay => &self.overlay,
        }
    }

    /// Runs `op` on the side picked by `claim`, reporting which side answered.
    ///
    /// Under [`Claim::OtherWithFallback`] a not-found error from the base
    /// gives the overlay exactly one try.
    fn dispatch<T>(
        &self,
        claim: Claim,
        path: &Path,
        mut op: impl FnMut(&dyn FsLayer) -> FsResult<T>,
    ) -> FsResult<(Side, T)> {
        match claim {
            Claim::Owned => op(&self.overlay).map(|v| (Side::Overlay, v)),
            Claim::Other => op(&self.base).map(|v| (Side::Base, v)),
            Claim::OtherWithFallback => match op(&self.base) {
                Ok(v) => Ok((Side::Base, v)),
                Err(e) if e.is_not_found() => {
                    debug!(path = %path.display(), "Base has nothing, falling back to overlay");
                    op(&self.overlay).map(|v| (Side::Overlay, v))
                }
                Err(e) => Err(e),
            },
        }
    }

    fn on_path<T>(&self, path: &Path, op: impl FnMut(&dyn FsLayer) -> FsResult<T>) -> FsResult<T> {
        let claim = self.overlay.handles(path);
        self.dispatch(claim, path, op).map(|(_, v)| v)
    }

    /// Registers a descriptor opened on `side` and returns the public one.
    fn register(&self, side: Side, local: Fd) -> FsResult<Fd> {
        let fd = self.fds.insert((side, local))?;
        trace!(?side, local, fd, "Issued descriptor");
        Ok(fd)
    }

    /// Runs `op` on the side owning `fd` with that side's descriptor.
    ///
    /// Unknown descriptors are routed by path and passed through as-is.
    fn on_fd<T>(
        &self,
        path: &Path,
        fd: Fd,
        mut op: impl FnMut(&dyn FsLayer, Fd) -> FsResult<T>,
    ) -> FsResult<T> {
        match self.fds.get(fd) {
            Some((side, local)) => op(self.layer(side), local),
            None => {
                trace!(path = %path.display(), fd, "Unknown descriptor, routing by path");
                self.on_path(path, |layer| op(layer, fd))
            }
        }
    }

    fn merged_listing(&self, path: &Path) -> FsResult<Vec<String>> {
        let base = self.base.readdir(path);
        let overlay = self.overlay.readdir(path);

        let (base, overlay) = match (base, overlay) {
            (Err(_), Err(e)) => return Err(e),
            (base, overlay) => (listing_or_empty(base)?, listing_or_empty(overlay)?),
        };

        let mut seen: HashSet<String> = base.iter().cloned().collect();
        let mut names = base;
        names.extend(overlay.into_iter().filter(|name| seen.insert(name.clone())));
        Ok(names)
    }
}

fn listing_or_empty(result: FsResult<Vec<String>>) -> FsResult<Vec<String>> {
    match result {
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        other => other,
    }
}

impl<B: FsLayer, O: FsLayer> FsLayer for OverlayFs<B, O> {
    fn init(&self) -> FsResult<()> {
        self.base.init()?;
        self.overlay.init()
    }

    fn handles(&self, path: &Path) -> Claim {
        match self.overlay.handles(path) {
            Claim::Owned => Claim::Owned,
            Claim::Other => self.base.handles(path),
            Claim::OtherWithFallback => match self.base.handles(path) {
                Claim::Other => Claim::OtherWithFallback,
                claim => claim,
            },
        }
    }

    fn getattr(&self, path: &Path) -> FsResult<FileStat> {
        self.on_path(path, |l| l.getattr(path))
    }

    fn fgetattr(&self, path: &Path, fd: Fd) -> FsResult<FileStat> {
        self.on_fd(path, fd, |l, fd| l.fgetattr(path, fd))
    }

    fn flush(&self, path: &Path, fd: Fd) -> FsResult<()> {
        self.on_fd(path, fd, |l, fd| l.flush(path, fd))
    }

    fn fsync(&self, path: &Path, fd: Fd, datasync: bool) -> FsResult<()> {
        self.on_fd(path, fd, |l, fd| l.fsync(path, fd, datasync))
    }

    fn readdir(&self, path: &Path) -> FsResult<Vec<String>> {
        match self.overlay.handles(path) {
            Claim::Owned => self.overlay.readdir(path),
            Claim::Other => self.base.readdir(path),
            Claim::OtherWithFallback => self.merged_listing(path),
        }
    }

    fn truncate(&self, path: &Path, size: u64) -> FsResult<()> {
        self.on_path(path, |l| l.truncate(path, size))
    }

    fn ftruncate(&self, path: &Path, fd: Fd, size: u64) -> FsResult<()> {
        self.on_fd(path, fd, |l, fd| l.ftruncate(path, fd, size))
    }

    fn readlink(&self, path: &Path) -> FsResult<PathBuf> {
        self.on_path(path, |l| l.readlink(path))
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        self.on_path(path, |l| l.chown(path, uid, gid))
    }

    fn chmod(&self, path: &Path, mode: u32) -> FsResult<()> {
        self.on_path(path, |l| l.chmod(path, mode))
    }

    fn mknod(&self, path: &Path, mode: u32, rdev: u32) -> FsResult<()> {
        self.on_path(path, |l| l.mknod(path, mode, rdev))
    }

    fn open(&self, path: &Path, flags: i32) -> FsResult<Fd> {
        let claim = self.overlay.handles(path);
        let (side, local) = self.dispatch(claim, path, |l| l.open(path, flags))?;
        self.register(side, local).inspect_err(|_| {
            // the side must not keep a descriptor nobody can release
            let _ = self.layer(side).release(path, local);
        })
    }

    fn opendir(&self, path: &Path, flags: i32) -> FsResult<Fd> {
        let claim = self.overlay.handles(path);
        let (side, local) = self.dispatch(claim, path, |l| l.opendir(path, flags))?;
        self.register(side, local).inspect_err(|_| {
            let _ = self.layer(side).releasedir(path, local);
        })
    }

    fn read(&self, path: &Path, fd: Fd, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        self.on_fd(path, fd, |l, fd| l.read(path, fd, buf, offset))
    }

    fn write(&self, path: &Path, fd: Fd, data: &[u8], offset: u64) -> FsResult<usize> {
        self.on_fd(path, fd, |l, fd| l.write(path, fd, data, offset))
    }

    fn release(&self, path: &Path, fd: Fd) -> FsResult<()> {
        let result = self.on_fd(path, fd, |l, fd| l.release(path, fd));
        self.fds.remove(fd);
        result
    }

    fn releasedir(&self, path: &Path, fd: Fd) -> FsResult<()> {
        let result = self.on_fd(path, fd, |l, fd| l.releasedir(path, fd));
        self.fds.remove(fd);
        result
    }

    fn utimens(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> FsResult<()> {
        self.on_path(path, |l| l.utimens(path, atime, mtime))
    }

    fn unlink(&self, path: &Path) -> FsResult<()> {
        self.on_path(path, |l| l.unlink(path))
    }

    fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        // The destination may not exist yet, so its parent decides too.
        let claims = [
            self.overlay.handles(from),
            self.overlay.handles(parent_of(to)),
            self.overlay.handles(to),
        ];
        let claim = if claims.contains(&Claim::Owned) {
            Claim::Owned
        } else if claims.contains(&Claim::OtherWithFallback) {
            Claim::OtherWithFallback
        } else {
            Claim::Other
        };
        self.dispatch(claim, from, |l| l.rename(from, to)).map(|_| ())
    }

    fn symlink(&self, target: &Path, path: &Path) -> FsResult<()> {
        self.on_path(path, |l| l.symlink(target, path))
    }

    fn link(&self, target: &Path, path: &Path) -> FsResult<()> {
        self.on_path(path, |l| l.link(target, path))
    }

    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()> {
        let claim = self.overlay.handles(parent_of(path));
        self.dispatch(claim, path, |l| l.mkdir(path, mode)).map(|_| ())
    }

    fn rmdir(&self, path: &Path) -> FsResult<()> {
        self.on_path(path, |l| l.rmdir(path))
    }
}
