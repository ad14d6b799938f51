//! Filesystem service backed by the operating system.

use crate::error::{StorageError, StorageResult};
use crate::fs::{FileLock, FileSystem};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

/// A filesystem service over `std::fs`.
///
/// # Durability
///
/// - `write()` calls `File::sync_all()` before returning
/// - `sync_dir()` fsyncs the directory so renames and deletions persist
///
/// Renames are only atomic within a single volume. The state root and all
/// of its subdirectories must live on the same filesystem.
///
/// # Example
///
/// ```no_run
/// use pinstate_storage::{FileSystem, OsFileSystem};
/// use std::path::Path;
///
/// let fs = OsFileSystem::new();
/// fs.create_dir_all(Path::new("state/instances/demo")).unwrap();
/// fs.write(Path::new("state/instances/demo/manifest.tlv"), b"").unwrap();
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileSystem;

impl OsFileSystem {
    /// Creates the OS filesystem service.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for OsFileSystem {
    fn read(&self, path: &Path) -> StorageResult<Vec<u8>> {
        fs::read(path).map_err(|e| StorageError::from_io(e, path))
    }

    fn open_read(&self, path: &Path) -> StorageResult<Box<dyn Read + Send>> {
        let file = File::open(path).map_err(|e| StorageError::from_io(e, path))?;
        Ok(Box::new(file))
    }

    fn write(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        let mut file = File::create(path).map_err(|e| StorageError::from_io(e, path))?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> StorageResult<()> {
        fs::rename(from, to).map_err(|e| StorageError::from_io(e, from))
    }

    fn remove_file(&self, path: &Path) -> StorageResult<()> {
        fs::remove_file(path).map_err(|e| StorageError::from_io(e, path))
    }

    fn create_dir_all(&self, path: &Path) -> StorageResult<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> StorageResult<()> {
        if fs::read_dir(path)
            .map_err(|e| StorageError::from_io(e, path))?
            .next()
            .is_some()
        {
            return Err(StorageError::DirectoryNotEmpty(path.to_path_buf()));
        }
        fs::remove_dir(path).map_err(|e| StorageError::from_io(e, path))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn list_dir(&self, path: &Path) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path).map_err(|e| StorageError::from_io(e, path))? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    /// On Windows, NTFS journaling already makes metadata updates durable,
    /// so directory fsync is skipped there.
    #[cfg(unix)]
    fn sync_dir(&self, path: &Path) -> StorageResult<()> {
        let dir = File::open(path).map_err(|e| StorageError::from_io(e, path))?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(&self, _path: &Path) -> StorageResult<()> {
        Ok(())
    }

    fn lock_exclusive(&self, path: &Path) -> StorageResult<FileLock> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StorageError::from_io(e, path))?;

        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.to_path_buf()));
        }

        // Closing the file releases the lock.
        Ok(FileLock::new(path.to_path_buf(), Box::new(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bin");
        let fs = OsFileSystem::new();

        fs.write(&path, b"payload").unwrap();
        assert_eq!(fs.read(&path).unwrap(), b"payload");
    }

    #[test]
    fn read_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let fs = OsFileSystem::new();

        let err = fs.read(&dir.path().join("missing")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn rename_replaces_target() {
        let dir = tempdir().unwrap();
        let fs = OsFileSystem::new();
        let a = dir.path().join("a");
        let b = dir.path().join("b");

        fs.write(&a, b"new").unwrap();
        fs.write(&b, b"old").unwrap();
        fs.rename(&a, &b).unwrap();

        assert!(!fs.exists(&a));
        assert_eq!(fs.read(&b).unwrap(), b"new");
    }

    #[test]
    fn rename_moves_directory() {
        let dir = tempdir().unwrap();
        let fs = OsFileSystem::new();
        let src = dir.path().join("snap");
        fs.create_dir_all(&src).unwrap();
        fs.write(&src.join("m.tlv"), b"m").unwrap();

        let dst = dir.path().join("archive");
        fs.rename(&src, &dst).unwrap();

        assert!(!fs.exists(&src));
        assert_eq!(fs.read(&dst.join("m.tlv")).unwrap(), b"m");
    }

    #[test]
    fn remove_dir_refuses_non_empty() {
        let dir = tempdir().unwrap();
        let fs = OsFileSystem::new();
        let sub = dir.path().join("sub");
        fs.create_dir_all(&sub).unwrap();
        fs.write(&sub.join("f"), b"x").unwrap();

        assert!(matches!(
            fs.remove_dir(&sub),
            Err(StorageError::DirectoryNotEmpty(_))
        ));
        fs.remove_file(&sub.join("f")).unwrap();
        fs.remove_dir(&sub).unwrap();
        assert!(!fs.exists(&sub));
    }

    #[test]
    fn list_dir_is_sorted() {
        let dir = tempdir().unwrap();
        let fs = OsFileSystem::new();
        fs.write(&dir.path().join("b"), b"").unwrap();
        fs.write(&dir.path().join("a"), b"").unwrap();

        assert_eq!(fs.list_dir(dir.path()).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let fs = OsFileSystem::new();
        let path = dir.path().join("LOCK");

        {
            let _lock = fs.lock_exclusive(&path).unwrap();
        }
        let lock = fs.lock_exclusive(&path).unwrap();
        assert_eq!(lock.path(), path);
    }
}
