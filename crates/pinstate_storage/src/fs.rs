//! Filesystem service trait definition.

use crate::error::StorageResult;
use std::any::Any;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

/// The filesystem service consumed by the transaction engine.
///
/// Implementations are **plain file stores**. They know nothing about
/// manifests or transaction phases; the engine owns all layout and format
/// interpretation.
///
/// # Invariants
///
/// - `write` replaces the whole file and returns only once the bytes are durable
/// - `rename` is atomic per path and replaces an existing target file
/// - `rename` of a directory moves its whole subtree
/// - `remove_dir` only removes empty directories
/// - Implementations must be `Send + Sync`
///
/// # Implementors
///
/// - [`super::OsFileSystem`] - For persistent state
/// - [`super::InMemoryFileSystem`] - For testing
pub trait FileSystem: Send + Sync {
    /// Reads the whole file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NotFound`] if the file does not exist,
    /// or an I/O error.
    fn read(&self, path: &Path) -> StorageResult<Vec<u8>>;

    /// Opens `path` for streaming reads.
    ///
    /// Used to re-hash large payloads without loading them whole.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NotFound`] if the file does not exist.
    fn open_read(&self, path: &Path) -> StorageResult<Box<dyn Read + Send>>;

    /// Creates or truncates `path` and writes `data` to it.
    ///
    /// The parent directory must already exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent is missing or the write fails.
    fn write(&self, path: &Path, data: &[u8]) -> StorageResult<()>;

    /// Renames `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns an error if `from` is missing, the parent of `to` is
    /// missing, or `to` is a non-empty directory.
    fn rename(&self, from: &Path, to: &Path) -> StorageResult<()>;

    /// Removes the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NotFound`] if it does not exist.
    fn remove_file(&self, path: &Path) -> StorageResult<()>;

    /// Creates `path` and all missing ancestors. Existing directories are fine.
    ///
    /// # Errors
    ///
    /// Returns an error if a component exists as a file or creation fails.
    fn create_dir_all(&self, path: &Path) -> StorageResult<()>;

    /// Removes the empty directory at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::DirectoryNotEmpty`] if it has entries.
    fn remove_dir(&self, path: &Path) -> StorageResult<()>;

    /// Returns true if a file or directory exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Returns true if `path` is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Lists the entry names of the directory at `path`, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NotFound`] if it does not exist.
    fn list_dir(&self, path: &Path) -> StorageResult<Vec<String>>;

    /// Makes directory entry changes under `path` durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be synced.
    fn sync_dir(&self, path: &Path) -> StorageResult<()>;

    /// Takes an exclusive advisory lock on `path`, creating it if needed.
    ///
    /// The lock is released when the returned [`FileLock`] is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Locked`] if another holder owns it.
    fn lock_exclusive(&self, path: &Path) -> StorageResult<FileLock>;
}

/// An advisory lock held until dropped.
pub struct FileLock {
    path: PathBuf,
    _guard: Box<dyn Any + Send + Sync>,
}

impl FileLock {
    /// Wraps an implementation-specific guard.
    pub fn new(path: PathBuf, guard: Box<dyn Any + Send + Sync>) -> Self {
        Self {
            path,
            _guard: guard,
        }
    }

    /// Returns the locked path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for FileLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileLock").field("path", &self.path).finish()
    }
}
