//! # pinstate testkit
//!
//! Test utilities for pinstate.
//!
//! This crate provides:
//! - Instance fixtures over the in-memory and real filesystems
//! - A fault-injecting filesystem for commit failure and crash tests
//! - Property-based generators for manifests and content entries
//! - Cross-implementation encoding vectors
//! - Whole-transaction helpers shared by the integration tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pinstate_testkit::prelude::*;
//!
//! #[test]
//! fn pins_a_pack() {
//!     let instance = TestInstance::memory();
//!     let entry = instance.ingest_pack("pack.core", b"payload");
//!     instance.pin(entry).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::vectors::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use vectors::*;
