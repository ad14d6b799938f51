//! # pinstate storage
//!
//! Service abstractions the transaction engine is injected with.
//!
//! The engine never touches `std::fs` directly. Every read, write, rename
//! and directory operation goes through a [`FileSystem`], and every
//! transaction id is minted from a [`Clock`]. This keeps the engine
//! testable without a disk and lets tests inject failures at precise
//! points of the commit choreography.
//!
//! ## Design Principles
//!
//! - Services are dumb: no knowledge of manifests, TLV records or phases
//! - Renames follow POSIX semantics (atomic per file, replace target)
//! - Must be `Send + Sync` so one engine can be shared behind an `Arc`
//!
//! ## Available Services
//!
//! - [`OsFileSystem`] - The real filesystem via `std::fs`
//! - [`InMemoryFileSystem`] - For tests and dry runs
//! - [`SystemClock`] / [`ManualClock`] - Wall clock and test clock
//!
//! ## Example
//!
//! ```rust
//! use pinstate_storage::{FileSystem, InMemoryFileSystem};
//! use std::path::Path;
//!
//! let fs = InMemoryFileSystem::new();
//! fs.create_dir_all(Path::new("/state")).unwrap();
//! fs.write(Path::new("/state/a.tlv"), b"hello").unwrap();
//! fs.rename(Path::new("/state/a.tlv"), Path::new("/state/b.tlv")).unwrap();
//! assert_eq!(fs.read(Path::new("/state/b.tlv")).unwrap(), b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod error;
mod fs;
mod memory;
mod os;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StorageError, StorageResult};
pub use fs::{FileLock, FileSystem};
pub use memory::InMemoryFileSystem;
pub use os::OsFileSystem;
