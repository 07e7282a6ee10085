//! Mapping mount-relative paths onto the real source tree.
//!
//! Every path the kernel hands us is relative to the mount point. Before the
//! real store touches disk, [`PathGuard::resolve`] turns it into an absolute
//! path below the source root and rejects anything that would escape the
//! source or reach back into the mount itself.

use std::path::{Component, Path, PathBuf};

use crate::error::{FsError, FsResult};

/// Resolves mount-relative segments against a fixed source root.
#[derive(Debug, Clone)]
pub struct PathGuard {
    source_root: PathBuf,
    mount_root: PathBuf,
}

impl PathGuard {
    /// Creates a guard for the given source and mount roots.
    ///
    /// Both roots are expected to be absolute; they are normalized lexically
    /// but never canonicalized.
    pub fn new(source_root: impl AsRef<Path>, mount_root: impl AsRef<Path>) -> Self {
        Self {
            source_root: normalize(Path::new("/"), source_root.as_ref()),
            mount_root: normalize(Path::new("/"), mount_root.as_ref()),
        }
    }

    /// The normalized source root.
    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// The normalized mount root.
    pub fn mount_root(&self) -> &Path {
        &self.mount_root
    }

    /// Resolves a mount-relative segment to an absolute source path.
    ///
    /// Leading slashes are ignored, so `/foo`, `foo`, `./foo` and `///foo`
    /// all resolve to `<source>/foo`.
    ///
    /// # Errors
    ///
    /// - [`FsError::PathNotInSource`] if the result is outside the source root
    /// - [`FsError::RecursiveMounting`] if the result is inside the mount root
    pub fn resolve(&self, segment: impl AsRef<Path>) -> FsResult<PathBuf> {
        let resolved = normalize(&self.source_root, segment.as_ref());
        if !resolved.starts_with(&self.source_root) {
            return Err(FsError::PathNotInSource(resolved));
        }
        if resolved.starts_with(&self.mount_root) {
            return Err(FsError::RecursiveMounting(resolved));
        }
        Ok(resolved)
    }
}

/// Lexically joins `segment` onto `base`, treating the segment as relative.
///
/// `..` pops a component (never above `/`), `.` and root markers are dropped.
fn normalize(base: &Path, segment: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in base.components().chain(segment.components()) {
        match component {
            Component::Normal(name) => out.push(name),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn guard() -> PathGuard {
        PathGuard::new("/my/src", "/their/mount")
    }

    #[test]
    fn test_resolves_relative_to_source() {
        let res = guard();
        assert_eq!(res.resolve("foo").unwrap(), PathBuf::from("/my/src/foo"));
        assert_eq!(res.resolve("/foo").unwrap(), PathBuf::from("/my/src/foo"));
        assert_eq!(res.resolve("./foo").unwrap(), PathBuf::from("/my/src/foo"));
        assert_eq!(res.resolve("///foo").unwrap(), PathBuf::from("/my/src/foo"));
        assert_eq!(res.resolve("foo/bar").unwrap(), PathBuf::from("/my/src/foo/bar"));
    }

    #[test]
    fn test_root_resolves_to_source() {
        assert_eq!(guard().resolve("/").unwrap(), PathBuf::from("/my/src"));
        assert_eq!(guard().resolve("").unwrap(), PathBuf::from("/my/src"));
    }

    #[test]
    fn test_inner_parent_dirs_stay_inside() {
        assert_eq!(
            guard().resolve("foo/../bar").unwrap(),
            PathBuf::from("/my/src/bar")
        );
    }

    #[test]
    fn test_escape_is_rejected() {
        assert!(matches!(
            guard().resolve("../foo"),
            Err(FsError::PathNotInSource(_))
        ));
        assert!(matches!(
            guard().resolve("/foo/../../../etc/passwd"),
            Err(FsError::PathNotInSource(_))
        ));
    }

    #[test]
    fn test_sibling_with_common_prefix_is_rejected() {
        // "/my/src2" shares a string prefix with "/my/src" but is not inside it
        assert!(matches!(
            guard().resolve("../src2/file"),
            Err(FsError::PathNotInSource(_))
        ));
    }

    #[test]
    fn test_same_source_and_mount_is_recursive() {
        let res = PathGuard::new("/my/src", "/my/src");
        assert!(matches!(
            res.resolve("./foo"),
            Err(FsError::RecursiveMounting(_))
        ));
    }

    #[test]
    fn test_mount_inside_source() {
        let res = PathGuard::new("/data", "/data/mnt");
        assert_eq!(res.resolve("other").unwrap(), PathBuf::from("/data/other"));
        assert!(matches!(
            res.resolve("mnt/inner"),
            Err(FsError::RecursiveMounting(_))
        ));
        // "mnt2" is a sibling of the mount, not inside it
        assert!(res.resolve("mnt2").is_ok());
    }

    proptest! {
        #[test]
        fn prop_resolved_paths_are_contained(
            parts in proptest::collection::vec(
                prop_oneof![
                    Just("..".to_string()),
                    Just(".".to_string()),
                    Just("mount".to_string()),
                    "[a-z]{1,6}",
                ],
                0..8,
            )
        ) {
            let res = PathGuard::new("/srv/source", "/srv/source/mount");
            let segment = parts.join("/");
            match res.resolve(&segment) {
                Ok(path) => {
                    prop_assert!(path.starts_with("/srv/source"));
                    prop_assert!(!path.starts_with("/srv/source/mount"));
                }
                Err(FsError::PathNotInSource(_) | FsError::RecursiveMounting(_)) => {}
                Err(e) => prop_assert!(false, "unexpected error: {e}"),
            }
        }

        #[test]
        fn prop_leading_parent_always_escapes(name in "[a-z]{1,8}") {
            let res = guard();
            let result = res.resolve(format!("../{name}"));
            prop_assert!(matches!(result, Err(FsError::PathNotInSource(_))));
        }
    }
}
