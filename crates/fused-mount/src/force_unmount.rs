//! Platform-specific force unmount.
//!
//! - **Linux**: `fusermount -uz` (lazy), then `umount -l`, then `umount -f`
//! - **macOS**: `diskutil unmount force`, then `umount -f`
//!
//! Callers must only point this at a mount point they own.

use std::path::Path;
use std::process::{Command, Output};
use std::sync::mpsc;
use std::time::Duration;

use crate::error::MountError;

/// How long a single unmount command may take before it is abandoned.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// Detaches whatever is mounted at `mountpoint`.
///
/// # Errors
///
/// Returns [`MountError::UnmountFailed`] if every strategy fails.
pub fn force_unmount(mountpoint: &Path) -> Result<(), MountError> {
    #[cfg(target_os = "linux")]
    let attempts: &[(&str, &[&str])] = &[
        ("fusermount", &["-uz"]),
        ("umount", &["-l"]),
        ("umount", &["-f"]),
    ];

    #[cfg(target_os = "macos")]
    let attempts: &[(&str, &[&str])] = &[("diskutil", &["unmount", "force"]), ("umount", &["-f"])];

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    let attempts: &[(&str, &[&str])] = &[];

    if attempts.is_empty() {
        return Err(MountError::Unsupported(mountpoint.to_path_buf()));
    }

    let mut last_reason = String::new();
    for (program, args) in attempts {
        match run_with_timeout(program, args, mountpoint) {
            Some(Ok(output)) if output.status.success() => {
                tracing::debug!(
                    "Force unmount via {} {} succeeded for {}",
                    program,
                    args.join(" "),
                    mountpoint.display()
                );
                return Ok(());
            }
            Some(Ok(output)) => {
                last_reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
                tracing::debug!(
                    "{} failed for {}: {}",
                    program,
                    mountpoint.display(),
                    last_reason
                );
            }
            Some(Err(e)) => {
                last_reason = format!("{program} not available: {e}");
                tracing::debug!("{}", last_reason);
            }
            None => {
                last_reason = format!("{program} timed out (possible stale mount)");
                tracing::warn!("{} for {}", last_reason, mountpoint.display());
            }
        }
    }

    Err(MountError::UnmountFailed {
        path: mountpoint.to_path_buf(),
        reason: last_reason,
    })
}

// Unmount commands can block on a dead FUSE endpoint, so each runs on its own thread.
fn run_with_timeout(
    program: &str,
    args: &[&str],
    mountpoint: &Path,
) -> Option<std::io::Result<Output>> {
    let (tx, rx) = mpsc::channel();
    let mut command = Command::new(program);
    command.args(args).arg(mountpoint);

    std::thread::spawn(move || {
        let _ = tx.send(command.output());
    });

    rx.recv_timeout(COMMAND_TIMEOUT).ok()
}
