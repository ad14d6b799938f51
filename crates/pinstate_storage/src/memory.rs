//! In-memory filesystem service for testing.

use crate::error::{StorageError, StorageResult};
use crate::fs::{FileLock, FileSystem};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Tree {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
}

impl Tree {
    fn parent_exists(&self, path: &Path) -> bool {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => self.dirs.contains(parent),
            _ => true,
        }
    }

    fn has_children(&self, dir: &Path) -> bool {
        let under = |p: &&PathBuf| p.starts_with(dir) && p.as_path() != dir;
        self.files.keys().any(|p| under(&p)) || self.dirs.iter().any(|p| under(&p))
    }
}

/// An in-memory filesystem service.
///
/// Mirrors the POSIX behaviour the engine depends on: writes need an
/// existing parent directory, file renames replace their target, directory
/// renames move the subtree, and `remove_dir` refuses non-empty directories.
///
/// Cloning shares the underlying tree, so a test can keep a handle while
/// the engine owns another.
///
/// # Example
///
/// ```rust
/// use pinstate_storage::{FileSystem, InMemoryFileSystem};
/// use std::path::Path;
///
/// let fs = InMemoryFileSystem::new();
/// assert!(fs.write(Path::new("/missing/a"), b"x").is_err());
/// fs.create_dir_all(Path::new("/missing")).unwrap();
/// fs.write(Path::new("/missing/a"), b"x").unwrap();
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryFileSystem {
    tree: Arc<RwLock<Tree>>,
    locks: Arc<Mutex<HashSet<PathBuf>>>,
}

struct MemoryLockGuard {
    path: PathBuf,
    locks: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Drop for MemoryLockGuard {
    fn drop(&mut self) {
        self.locks.lock().remove(&self.path);
    }
}

impl InMemoryFileSystem {
    /// Creates an empty in-memory filesystem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every file under `root` with its contents.
    #[must_use]
    pub fn snapshot(&self, root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        self.tree
            .read()
            .files
            .iter()
            .filter(|(p, _)| p.starts_with(root))
            .map(|(p, d)| (p.clone(), d.clone()))
            .collect()
    }
}

impl FileSystem for InMemoryFileSystem {
    fn read(&self, path: &Path) -> StorageResult<Vec<u8>> {
        self.tree
            .read()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))
    }

    fn open_read(&self, path: &Path) -> StorageResult<Box<dyn Read + Send>> {
        let data = self.read(path)?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn write(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        let mut tree = self.tree.write();
        if !tree.parent_exists(path) {
            return Err(StorageError::NotFound(
                path.parent().unwrap_or(path).to_path_buf(),
            ));
        }
        if tree.dirs.contains(path) {
            return Err(StorageError::AlreadyExists(path.to_path_buf()));
        }
        tree.files.insert(path.to_path_buf(), data.to_vec());
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> StorageResult<()> {
        let mut tree = self.tree.write();
        if !tree.parent_exists(to) {
            return Err(StorageError::NotFound(
                to.parent().unwrap_or(to).to_path_buf(),
            ));
        }

        if let Some(data) = tree.files.remove(from) {
            if tree.dirs.contains(to) {
                tree.files.insert(from.to_path_buf(), data);
                return Err(StorageError::AlreadyExists(to.to_path_buf()));
            }
            tree.files.insert(to.to_path_buf(), data);
            return Ok(());
        }

        if !tree.dirs.contains(from) {
            return Err(StorageError::NotFound(from.to_path_buf()));
        }
        if tree.files.contains_key(to) || (tree.dirs.contains(to) && tree.has_children(to)) {
            return Err(StorageError::AlreadyExists(to.to_path_buf()));
        }

        let moved_dirs: Vec<PathBuf> = tree
            .dirs
            .iter()
            .filter(|p| p.starts_with(from))
            .cloned()
            .collect();
        for dir in moved_dirs {
            tree.dirs.remove(&dir);
            if let Ok(rest) = dir.strip_prefix(from) {
                if rest.as_os_str().is_empty() {
                    tree.dirs.insert(to.to_path_buf());
                } else {
                    tree.dirs.insert(to.join(rest));
                }
            }
        }

        let moved_files: Vec<PathBuf> = tree
            .files
            .keys()
            .filter(|p| p.starts_with(from))
            .cloned()
            .collect();
        for file in moved_files {
            if let (Some(data), Ok(rest)) = (tree.files.remove(&file), file.strip_prefix(from)) {
                tree.files.insert(to.join(rest), data);
            }
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> StorageResult<()> {
        self.tree
            .write()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))
    }

    fn create_dir_all(&self, path: &Path) -> StorageResult<()> {
        let mut tree = self.tree.write();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            if tree.files.contains_key(ancestor) {
                return Err(StorageError::AlreadyExists(ancestor.to_path_buf()));
            }
            tree.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> StorageResult<()> {
        let mut tree = self.tree.write();
        if !tree.dirs.contains(path) {
            return Err(StorageError::NotFound(path.to_path_buf()));
        }
        if tree.has_children(path) {
            return Err(StorageError::DirectoryNotEmpty(path.to_path_buf()));
        }
        tree.dirs.remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let tree = self.tree.read();
        tree.files.contains_key(path) || tree.dirs.contains(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.tree.read().dirs.contains(path)
    }

    fn list_dir(&self, path: &Path) -> StorageResult<Vec<String>> {
        let tree = self.tree.read();
        if !tree.dirs.contains(path) {
            return Err(StorageError::NotFound(path.to_path_buf()));
        }
        let child_name = |p: &PathBuf| {
            (p.parent() == Some(path))
                .then(|| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .flatten()
        };
        let mut names: Vec<String> = tree
            .files
            .keys()
            .filter_map(child_name)
            .chain(tree.dirs.iter().filter_map(child_name))
            .collect();
        names.sort();
        Ok(names)
    }

    fn sync_dir(&self, _path: &Path) -> StorageResult<()> {
        // Nothing is buffered.
        Ok(())
    }

    fn lock_exclusive(&self, path: &Path) -> StorageResult<FileLock> {
        let mut locks = self.locks.lock();
        if !locks.insert(path.to_path_buf()) {
            return Err(StorageError::Locked(path.to_path_buf()));
        }
        let guard = MemoryLockGuard {
            path: path.to_path_buf(),
            locks: Arc::clone(&self.locks),
        };
        Ok(FileLock::new(path.to_path_buf(), Box::new(guard)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs_with_root() -> InMemoryFileSystem {
        let fs = InMemoryFileSystem::new();
        fs.create_dir_all(Path::new("/root")).unwrap();
        fs
    }

    #[test]
    fn write_requires_parent() {
        let fs = InMemoryFileSystem::new();
        let result = fs.write(Path::new("/nope/file"), b"x");
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn write_and_read() {
        let fs = fs_with_root();
        fs.write(Path::new("/root/f"), b"data").unwrap();
        assert_eq!(fs.read(Path::new("/root/f")).unwrap(), b"data");
    }

    #[test]
    fn open_read_streams_contents() {
        let fs = fs_with_root();
        fs.write(Path::new("/root/f"), b"stream").unwrap();

        let mut reader = fs.open_read(Path::new("/root/f")).unwrap();
        let mut buf = String::new();
        reader.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "stream");
    }

    #[test]
    fn rename_file_replaces_target() {
        let fs = fs_with_root();
        fs.write(Path::new("/root/a"), b"new").unwrap();
        fs.write(Path::new("/root/b"), b"old").unwrap();

        fs.rename(Path::new("/root/a"), Path::new("/root/b")).unwrap();

        assert!(!fs.exists(Path::new("/root/a")));
        assert_eq!(fs.read(Path::new("/root/b")).unwrap(), b"new");
    }

    #[test]
    fn rename_missing_source_fails() {
        let fs = fs_with_root();
        let result = fs.rename(Path::new("/root/a"), Path::new("/root/b"));
        assert!(result.unwrap_err().is_not_found());
    }

    #[test]
    fn rename_directory_moves_subtree() {
        let fs = fs_with_root();
        fs.create_dir_all(Path::new("/root/snap/inner")).unwrap();
        fs.write(Path::new("/root/snap/m"), b"m").unwrap();
        fs.write(Path::new("/root/snap/inner/p"), b"p").unwrap();

        fs.rename(Path::new("/root/snap"), Path::new("/root/moved"))
            .unwrap();

        assert!(!fs.exists(Path::new("/root/snap")));
        assert!(fs.is_dir(Path::new("/root/moved/inner")));
        assert_eq!(fs.read(Path::new("/root/moved/m")).unwrap(), b"m");
        assert_eq!(fs.read(Path::new("/root/moved/inner/p")).unwrap(), b"p");
    }

    #[test]
    fn remove_dir_requires_empty() {
        let fs = fs_with_root();
        fs.create_dir_all(Path::new("/root/d")).unwrap();
        fs.write(Path::new("/root/d/f"), b"").unwrap();

        assert!(matches!(
            fs.remove_dir(Path::new("/root/d")),
            Err(StorageError::DirectoryNotEmpty(_))
        ));

        fs.remove_file(Path::new("/root/d/f")).unwrap();
        fs.remove_dir(Path::new("/root/d")).unwrap();
        assert!(!fs.exists(Path::new("/root/d")));
    }

    #[test]
    fn list_dir_returns_direct_children() {
        let fs = fs_with_root();
        fs.create_dir_all(Path::new("/root/sub/deep")).unwrap();
        fs.write(Path::new("/root/b"), b"").unwrap();
        fs.write(Path::new("/root/sub/x"), b"").unwrap();

        assert_eq!(fs.list_dir(Path::new("/root")).unwrap(), vec!["b", "sub"]);
    }

    #[test]
    fn clones_share_state() {
        let fs = fs_with_root();
        let other = fs.clone();
        fs.write(Path::new("/root/shared"), b"1").unwrap();
        assert!(other.exists(Path::new("/root/shared")));
    }

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let fs = fs_with_root();
        let lock = fs.lock_exclusive(Path::new("/root/LOCK")).unwrap();
        assert!(matches!(
            fs.lock_exclusive(Path::new("/root/LOCK")),
            Err(StorageError::Locked(_))
        ));
        drop(lock);
        assert!(fs.lock_exclusive(Path::new("/root/LOCK")).is_ok());
    }
}
