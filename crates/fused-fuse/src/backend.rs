//! Attaching a [`FusedFs`] to a mount point and detaching it again.

use crate::{FusedFs, MountConfig};
use fused_core::FsLayer;
use fused_mount::{
    DEFAULT_ACCESS_TIMEOUT, MountError, MountPaths, force_unmount, prepare_mountpoint,
};
use fuser::BackgroundSession;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// How long to wait for the kernel to report the mount as active.
const MOUNT_TIMEOUT: Duration = Duration::from_secs(10);

/// Polling interval while waiting for the mount.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Timeout for a graceful `session.join()` before forcing the unmount.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Returns true if this system can mount FUSE filesystems.
pub fn fuse_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        false
    }
}

/// Handle to a mounted filesystem. Dropping it unmounts.
pub struct FusedMountHandle {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
}

impl FusedMountHandle {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Returns false once the mount point no longer sits on our filesystem,
    /// e.g. after an external `fusermount -u`.
    pub fn is_attached(&self) -> bool {
        is_mounted(&self.mountpoint)
    }

    /// Unmounts and waits for the session to finish.
    pub fn unmount(mut self) {
        tracing::info!(mountpoint = %self.mountpoint.display(), "Unmounting FUSE filesystem");
        if let Some(session) = self.session.take() {
            session.join();
        }
        tracing::info!(mountpoint = %self.mountpoint.display(), "FUSE unmount successful");
    }
}

impl Drop for FusedMountHandle {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        tracing::debug!("Unmounting FUSE filesystem at {}", self.mountpoint.display());

        // join() blocks while files are held open, so bound it
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            session.join();
            let _ = tx.send(());
        });

        if rx.recv_timeout(JOIN_TIMEOUT).is_err() {
            tracing::warn!(
                "session.join() timed out after {:?} for {}, forcing unmount",
                JOIN_TIMEOUT,
                self.mountpoint.display()
            );
            if let Err(e) = force_unmount(&self.mountpoint) {
                tracing::warn!(error = %e, "Force unmount failed");
            }
        }
    }
}

/// Prepares the mount point, mounts `store` on it and waits until the
/// kernel reports the mount as active.
pub fn mount(
    store: Box<dyn FsLayer>,
    paths: &MountPaths,
    config: &MountConfig,
) -> Result<FusedMountHandle, MountError> {
    let mountpoint = paths.mount();
    tracing::info!(
        source = %paths.source().display(),
        mountpoint = %mountpoint.display(),
        "Starting FUSE mount"
    );

    prepare_mountpoint(mountpoint, &config.options, DEFAULT_ACCESS_TIMEOUT)?;

    let fs = FusedFs::new(store, paths.source(), config.clone());
    let session = spawn_mount_with_timeout(fs, mountpoint, config)?;
    let handle = FusedMountHandle {
        session: Some(session),
        mountpoint: mountpoint.to_path_buf(),
    };

    wait_for_mount(mountpoint)?;
    tracing::info!(mountpoint = %mountpoint.display(), "Filesystem mounted");
    Ok(handle)
}

// The mount syscall itself can block on a stale mount, so it runs on its own thread.
fn spawn_mount_with_timeout(
    fs: FusedFs,
    mountpoint: &Path,
    config: &MountConfig,
) -> Result<BackgroundSession, MountError> {
    let target = mountpoint.to_path_buf();
    let options = config.mount_options();
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let _ = tx.send(fuser::spawn_mount2(fs, &target, &options));
    });

    match rx.recv_timeout(MOUNT_TIMEOUT) {
        Ok(Ok(session)) => Ok(session),
        Ok(Err(e)) => Err(MountError::Io(e)),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(MountError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "Mount operation timed out - the mountpoint may be on a stale FUSE mount",
        ))),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(MountError::Io(std::io::Error::other(
            "Mount thread terminated unexpectedly",
        ))),
    }
}

/// Returns true if `mountpoint` sits on a different device than its parent.
fn is_mounted(mountpoint: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let parent = mountpoint.parent().unwrap_or(Path::new("/"));
    match (std::fs::metadata(mountpoint), std::fs::metadata(parent)) {
        (Ok(path_meta), Ok(parent_meta)) => path_meta.dev() != parent_meta.dev(),
        _ => false,
    }
}

/// Waits until `mountpoint` sits on a different device than its parent.
fn wait_for_mount(mountpoint: &Path) -> Result<(), MountError> {
    let deadline = Instant::now() + MOUNT_TIMEOUT;

    while Instant::now() < deadline {
        if is_mounted(mountpoint) {
            tracing::debug!("FUSE mount confirmed active at {}", mountpoint.display());
            return Ok(());
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    Err(MountError::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("FUSE mount did not become ready within {MOUNT_TIMEOUT:?}"),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_directory_is_not_mounted() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!is_mounted(tmp.path()));
        assert!(!is_mounted(&tmp.path().join("missing")));
    }
}
