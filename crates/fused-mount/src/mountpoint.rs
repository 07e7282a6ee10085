//! Mount point inspection and preparation.
//!
//! A FUSE daemon that died without unmounting leaves a mount behind where
//! every operation blocks. All checks here run on a helper thread with a
//! timeout so they cannot hang the caller.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

use crate::error::MountError;
use crate::force_unmount::force_unmount;
use crate::paths::MountOptions;

/// Default timeout for filesystem accessibility checks.
pub const DEFAULT_ACCESS_TIMEOUT: Duration = Duration::from_millis(500);

/// State of a mount point candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountPointStatus {
    /// Directory exists and answers.
    Available,
    /// Path exists but does not answer in time, or refuses to be listed.
    StaleMountDetected,
    /// Nothing at the path.
    DoesNotExist,
    /// A non-directory sits at the path.
    NotADirectory,
    /// Any other failure.
    Error(String),
}

/// Checks a mount point without risking a hang on a dead mount.
pub fn check_mountpoint_status(path: &Path, timeout: Duration) -> MountPointStatus {
    let path_buf = path.to_path_buf();
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let status = match std::fs::metadata(&path_buf) {
            Ok(meta) if meta.is_dir() => match std::fs::read_dir(&path_buf) {
                Ok(mut entries) => {
                    let _ = entries.next();
                    MountPointStatus::Available
                }
                Err(_) => MountPointStatus::StaleMountDetected,
            },
            Ok(_) => MountPointStatus::NotADirectory,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MountPointStatus::DoesNotExist,
            // ENOTCONN is what a dead FUSE endpoint answers with
            Err(e) if e.raw_os_error() == Some(libc::ENOTCONN) => {
                MountPointStatus::StaleMountDetected
            }
            Err(e) => MountPointStatus::Error(e.to_string()),
        };
        let _ = tx.send(status);
    });

    match rx.recv_timeout(timeout) {
        Ok(status) => status,
        Err(mpsc::RecvTimeoutError::Timeout) => MountPointStatus::StaleMountDetected,
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            MountPointStatus::Error("Check thread panicked".to_string())
        }
    }
}

/// Returns true if `path` is itself a FUSE mount point.
#[cfg(target_os = "linux")]
pub fn is_fuse_mountpoint(path: &Path) -> bool {
    std::fs::File::open("/proc/mounts").is_ok_and(|f| fuse_mount_listed(f, path))
}

/// Returns true if `path` is itself a FUSE mount point.
#[cfg(not(target_os = "linux"))]
pub fn is_fuse_mountpoint(path: &Path) -> bool {
    let Ok(output) = std::process::Command::new("mount").output() else {
        return false;
    };
    let stdout = String::from_utf8_lossy(&output.stdout);
    let needle = format!(" on {} (", path.display());
    stdout
        .lines()
        .any(|line| line.contains(&needle) && line.contains("fuse"))
}

/// Scans a `/proc/mounts` formatted table for a FUSE entry at `path`.
pub(crate) fn fuse_mount_listed(table: impl Read, path: &Path) -> bool {
    let wanted = path.to_string_lossy();
    BufReader::new(table)
        .lines()
        .map_while(Result::ok)
        .any(|line| {
            let mut parts = line.split_whitespace();
            let (Some(_), Some(mount_point), Some(fs_type)) =
                (parts.next(), parts.next(), parts.next())
            else {
                return false;
            };
            fs_type.starts_with("fuse") && unescape_mount_field(mount_point) == wanted
        })
}

// /proc/mounts encodes whitespace and backslashes as three digit octal escapes.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = bytes.get(i + 1..i + 4).and_then(|digits| {
            let digits = std::str::from_utf8(digits).ok()?;
            u8::from_str_radix(digits, 8).ok()
        });
        match escaped {
            Some(code) if bytes[i] == b'\\' => {
                out.push(code);
                i += 4;
            }
            _ => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Makes `path` ready to be mounted on.
///
/// With `force`, whatever FUSE mount is still attached (live or stale) is
/// detached first. With `auto_create`, a missing directory is created.
pub fn prepare_mountpoint(
    path: &Path,
    options: &MountOptions,
    timeout: Duration,
) -> Result<(), MountError> {
    let mut status = check_mountpoint_status(path, timeout);

    let attached = status == MountPointStatus::StaleMountDetected || is_fuse_mountpoint(path);
    if attached {
        if !options.force {
            return Err(MountError::MountpointBusy(path.to_path_buf()));
        }
        tracing::warn!("Detaching previous mount at {}", path.display());
        force_unmount(path)?;
        status = check_mountpoint_status(path, timeout);
    }

    match status {
        MountPointStatus::Available => Ok(()),
        MountPointStatus::DoesNotExist if options.auto_create => {
            tracing::debug!("Creating mount point {}", path.display());
            std::fs::create_dir_all(path)?;
            Ok(())
        }
        MountPointStatus::DoesNotExist => Err(MountError::MountpointMissing(path.to_path_buf())),
        MountPointStatus::NotADirectory => {
            Err(MountError::MountpointNotADirectory(path.to_path_buf()))
        }
        MountPointStatus::StaleMountDetected => Err(MountError::MountpointBusy(path.to_path_buf())),
        MountPointStatus::Error(reason) => Err(MountError::Io(std::io::Error::other(reason))),
    }
}
