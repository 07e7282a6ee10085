//! One-shot unmount request shared between signal handlers and the mount loop.
//!
//! The first request wins and wakes every waiter. Later requests (a second
//! Ctrl+C while the filesystem is still being detached) are reported as
//! duplicates so the caller can log and ignore them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Tracks whether an unmount has been requested.
#[derive(Debug, Default)]
pub struct UnmountGuard {
    requested: AtomicBool,
    signalled: Mutex<bool>,
    cvar: Condvar,
}

impl UnmountGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests an unmount.
    ///
    /// Returns `true` for the first request only.
    pub fn request(&self) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.cvar.notify_all();
        true
    }

    /// Blocks until an unmount is requested or `timeout` expires.
    ///
    /// Returns `true` if an unmount was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signalled = self.signalled.lock();
        if !*signalled {
            self.cvar.wait_for(&mut signalled, timeout);
        }
        *signalled
    }
}
