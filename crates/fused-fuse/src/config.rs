//! Mount configuration for the FUSE filesystem.

use fuser::MountOption;
use fused_mount::MountOptions;
use std::time::Duration;

/// Default time-to-live for attributes and entries handed to the kernel.
///
/// Kept short: the source tree can change underneath the mount and the
/// virtual files change on every write.
pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

/// Filesystem subtype shown in the mount table.
pub const SUBTYPE: &str = "fused";

/// Configuration options for the FUSE filesystem.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Time-to-live for attributes returned by `getattr`/`setattr`.
    pub attr_ttl: Duration,

    /// Time-to-live for name lookups.
    pub entry_ttl: Duration,

    /// Name shown as the mount's source in the mount table.
    pub fs_name: String,

    /// Mount behaviour flags.
    pub options: MountOptions,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            attr_ttl: DEFAULT_TTL,
            entry_ttl: DEFAULT_TTL,
            fs_name: SUBTYPE.to_string(),
            options: MountOptions::default(),
        }
    }
}

impl MountConfig {
    /// Sets the cache TTL for file attributes.
    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    /// Sets the cache TTL for name lookups.
    #[must_use]
    pub fn entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    /// Sets the name shown in the mount table.
    #[must_use]
    pub fn fs_name(mut self, name: impl Into<String>) -> Self {
        self.fs_name = name.into();
        self
    }

    /// Sets the mount behaviour flags.
    #[must_use]
    pub fn options(mut self, options: MountOptions) -> Self {
        self.options = options;
        self
    }

    /// fuser mount options for this configuration.
    pub fn mount_options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName(self.fs_name.clone()),
            MountOption::Subtype(SUBTYPE.to_string()),
            MountOption::RW,
        ];
        if self.options.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        if self.options.default_permissions {
            options.push(MountOption::DefaultPermissions);
        }
        options
    }
}
