//! End-to-end behaviour of a real tree with one in-memory file on top.
//!
//! Source tree: `dir/foo = "foo"`, `file = "file"`; virtual `/foo/bar = "content"`.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use fused_core::{
    Claim, FileKind, FsError, FsLayer, InMemoryFile, OverlayFs, PathGuard, RealFs, VirtualFs,
    compose,
};
use tempfile::TempDir;

struct Tree {
    tmp: TempDir,
    provider: Arc<InMemoryFile>,
    fs: Box<dyn FsLayer>,
}

impl Tree {
    fn source(&self, rel: &str) -> std::path::PathBuf {
        self.tmp.path().join("src").join(rel)
    }

    fn read(&self, path: &str) -> Vec<u8> {
        let path = Path::new(path);
        let fd = self.fs.open(path, libc::O_RDONLY).unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = self
                .fs
                .read(path, fd, &mut buf, out.len() as u64)
                .unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        self.fs.release(path, fd).unwrap();
        out
    }

    fn append(&self, path: &str, data: &[u8]) {
        let path = Path::new(path);
        let size = self.fs.getattr(path).unwrap().size;
        let fd = self.fs.open(path, libc::O_WRONLY | libc::O_APPEND).unwrap();
        assert_eq!(self.fs.write(path, fd, data, size).unwrap(), data.len());
        self.fs.flush(path, fd).unwrap();
        self.fs.release(path, fd).unwrap();
    }

    fn list(&self, path: &str) -> Vec<String> {
        let mut names = self.fs.readdir(Path::new(path)).unwrap();
        names.sort();
        names
    }
}

fn setup() -> Tree {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    fs::create_dir_all(src.join("dir")).unwrap();
    fs::write(src.join("dir/foo"), "foo").unwrap();
    fs::write(src.join("file"), "file").unwrap();

    let guard = PathGuard::new(&src, tmp.path().join("mnt"));
    let provider = Arc::new(InMemoryFile::new("/foo/bar", "content"));
    let overlay = VirtualFs::new(provider.clone(), guard.clone()).unwrap();
    let fs = compose(
        Box::new(RealFs::new(guard)),
        [Box::new(overlay) as Box<dyn FsLayer>],
    );
    fs.init().unwrap();
    Tree { tmp, provider, fs }
}

#[test]
fn test_listing_merges_virtual_entries() {
    let tree = setup();
    assert_eq!(tree.list("/"), vec!["dir", "file", "foo"]);
    assert_eq!(tree.list("/foo"), vec!["bar"]);
    assert_eq!(tree.list("/dir"), vec!["foo"]);
}

#[test]
fn test_append_to_real_file_reaches_source() {
    let tree = setup();
    tree.append("/file", b"data");
    assert_eq!(tree.read("/file"), b"filedata");
    assert_eq!(fs::read(tree.source("file")).unwrap(), b"filedata");
}

#[test]
fn test_append_to_virtual_file_stays_in_memory() {
    let tree = setup();
    tree.append("/foo/bar", b"data");
    assert_eq!(tree.read("/foo/bar"), b"contentdata");
    assert_eq!(tree.provider.content(), b"contentdata");
    assert!(!tree.source("foo/bar").exists());
    assert!(!tree.source("foo").exists());
}

#[test]
fn test_truncate_virtual_file() {
    let tree = setup();
    tree.fs.truncate(Path::new("/foo/bar"), 2).unwrap();
    assert_eq!(tree.read("/foo/bar"), b"co");

    tree.fs.truncate(Path::new("/foo/bar"), 0).unwrap();
    assert_eq!(tree.read("/foo/bar"), b"");
}

#[test]
fn test_ftruncate_virtual_file_through_descriptor() {
    let tree = setup();
    let path = Path::new("/foo/bar");
    let fd = tree.fs.open(path, libc::O_RDWR).unwrap();
    tree.fs.ftruncate(path, fd, 2).unwrap();
    assert_eq!(tree.fs.fgetattr(path, fd).unwrap().size, 2);
    tree.fs.release(path, fd).unwrap();
    assert_eq!(tree.read("/foo/bar"), b"co");
}

#[test]
fn test_virtual_file_stat() {
    let tree = setup();
    let root = tree.fs.getattr(Path::new("/")).unwrap();
    let stat = tree.fs.getattr(Path::new("/foo/bar")).unwrap();
    assert_eq!(stat.kind, FileKind::RegularFile);
    assert_eq!(stat.size, 7);
    assert_eq!(stat.perm, 0o664);
    assert_eq!((stat.uid, stat.gid), (root.uid, root.gid));

    let folder = tree.fs.getattr(Path::new("/foo")).unwrap();
    assert_eq!(folder.kind, FileKind::Directory);
    assert_eq!(folder.perm, 0o775);
}

#[test]
fn test_real_file_stat_matches_source() {
    let tree = setup();
    let meta = fs::symlink_metadata(tree.source("file")).unwrap();
    let stat = tree.fs.getattr(Path::new("/file")).unwrap();
    assert_eq!(stat, fused_core::FileStat::from_metadata(&meta));
}

#[test]
fn test_mkdir_and_rmdir_through_virtual_folder() {
    let tree = setup();
    for folder in ["/bla", "/foo/foo"] {
        let path = Path::new(folder);
        tree.fs.mkdir(path, 0o755).unwrap();
        let rel = folder.trim_start_matches('/');
        assert!(tree.source(rel).is_dir());
        assert!(tree.fs.getattr(path).unwrap().kind == FileKind::Directory);

        tree.fs.rmdir(path).unwrap();
        assert!(tree.fs.getattr(path).unwrap_err().is_not_found());
        assert!(!tree.source(rel).exists());
    }
}

#[test]
fn test_virtual_folder_cannot_be_removed() {
    let tree = setup();
    let err = tree.fs.rmdir(Path::new("/foo")).unwrap_err();
    assert!(matches!(err, FsError::PermissionDenied(_)));
    assert!(tree.fs.getattr(Path::new("/foo")).is_ok());
}

#[test]
fn test_mutating_virtual_file_identity_is_rejected() {
    let tree = setup();
    let bar = Path::new("/foo/bar");
    assert_eq!(tree.fs.unlink(bar).unwrap_err().errno(), Some(libc::EPERM));
    assert_eq!(tree.fs.chmod(bar, 0o600).unwrap_err().errno(), Some(libc::EPERM));
    assert_eq!(
        tree.fs.rename(bar, Path::new("/elsewhere")).unwrap_err().errno(),
        Some(libc::ENOSYS)
    );
    assert_eq!(
        tree.fs.symlink(Path::new("file"), bar).unwrap_err().errno(),
        Some(libc::ENOSYS)
    );
    assert_eq!(tree.fs.readlink(bar).unwrap_err().errno(), Some(libc::EINVAL));
}

#[test]
fn test_new_files_land_in_source() {
    let tree = setup();
    let path = Path::new("/dir/new.txt");
    tree.fs.mknod(path, libc::S_IFREG as u32 | 0o644, 0).unwrap();
    let fd = tree.fs.open(path, libc::O_WRONLY).unwrap();
    tree.fs.write(path, fd, b"hello", 0).unwrap();
    tree.fs.release(path, fd).unwrap();
    assert_eq!(fs::read(tree.source("dir/new.txt")).unwrap(), b"hello");
}

#[test]
fn test_many_open_descriptors_are_distinct() {
    let tree = setup();
    let mut fds = Vec::new();
    for _ in 0..50 {
        fds.push(tree.fs.open(Path::new("/file"), libc::O_RDONLY).unwrap());
        fds.push(tree.fs.open(Path::new("/foo/bar"), libc::O_RDONLY).unwrap());
    }
    let mut unique = fds.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), fds.len());

    for (i, fd) in fds.into_iter().enumerate() {
        let path = if i % 2 == 0 { "/file" } else { "/foo/bar" };
        tree.fs.release(Path::new(path), fd).unwrap();
    }
}

#[test]
fn test_concurrent_readers_and_writers() {
    let tree = Arc::new(setup());
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let tree = Arc::clone(&tree);
            std::thread::spawn(move || {
                for _ in 0..25 {
                    if i % 2 == 0 {
                        assert!(tree.read("/foo/bar").starts_with(b"content"));
                    } else {
                        assert_eq!(tree.read("/file"), b"file");
                    }
                    tree.fs.getattr(Path::new("/foo")).unwrap();
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
}

#[test]
fn test_two_overlays_stack() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    fs::create_dir(&src).unwrap();
    let guard = PathGuard::new(&src, tmp.path().join("mnt"));

    let a = VirtualFs::new(Arc::new(InMemoryFile::new("/shared/a", "A")), guard.clone()).unwrap();
    let b = VirtualFs::new(Arc::new(InMemoryFile::new("/shared/b", "B")), guard.clone()).unwrap();
    let stacked = OverlayFs::new(OverlayFs::new(RealFs::new(guard), a), b);

    assert_eq!(stacked.handles(Path::new("/shared")), Claim::Owned);
    let mut names = stacked.readdir(Path::new("/shared")).unwrap();
    names.sort();
    assert_eq!(names, vec!["a", "b"]);
}
