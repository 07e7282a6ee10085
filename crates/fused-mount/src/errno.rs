//! Converting failures into POSIX error codes.

use std::io;

use fused_core::FsError;

/// Converts an I/O error to an errno, `EIO` when it carries none.
pub fn io_error_to_errno(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}

/// Converts a layer error to the errno reported to the kernel.
///
/// Errors without a code of their own (path guard rejections) are reported
/// as `ENOENT`: a path outside the source simply does not exist for callers.
pub fn fs_error_to_errno(e: &FsError) -> i32 {
    e.errno().unwrap_or(libc::ENOENT)
}

/// Short symbolic name for an errno, for log output.
pub fn errno_name(errno: i32) -> &'static str {
    match errno {
        0 => "OK",
        libc::EPERM => "EPERM",
        libc::ENOENT => "ENOENT",
        libc::EIO => "EIO",
        libc::EBADF => "EBADF",
        libc::EACCES => "EACCES",
        libc::EBUSY => "EBUSY",
        libc::EEXIST => "EEXIST",
        libc::ENOTDIR => "ENOTDIR",
        libc::EISDIR => "EISDIR",
        libc::EINVAL => "EINVAL",
        libc::ENFILE => "ENFILE",
        libc::EFBIG => "EFBIG",
        libc::ENOSPC => "ENOSPC",
        libc::ENOSYS => "ENOSYS",
        libc::ENOTEMPTY => "ENOTEMPTY",
        _ => "E?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_io_error_to_errno() {
        assert_eq!(io_error_to_errno(&io::Error::from_raw_os_error(libc::ENOSPC)), libc::ENOSPC);
        assert_eq!(io_error_to_errno(&io::Error::other("custom")), libc::EIO);
    }

    #[test]
    fn test_guard_errors_look_missing() {
        let e = FsError::PathNotInSource(PathBuf::from("/etc"));
        assert_eq!(fs_error_to_errno(&e), libc::ENOENT);
        let e = FsError::RecursiveMounting(PathBuf::from("/mnt"));
        assert_eq!(fs_error_to_errno(&e), libc::ENOENT);
    }

    #[test]
    fn test_coded_errors_pass_through() {
        assert_eq!(fs_error_to_errno(&FsError::NoDescriptorsAvailable), libc::ENFILE);
        assert_eq!(fs_error_to_errno(&FsError::Unsupported("link")), libc::ENOSYS);
    }

    #[test]
    fn test_errno_name() {
        assert_eq!(errno_name(libc::ENOENT), "ENOENT");
        assert_eq!(errno_name(libc::ENFILE), "ENFILE");
        assert_eq!(errno_name(-1), "E?");
    }
}
