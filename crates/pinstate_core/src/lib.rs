//! # pinstate core
//!
//! Crash-safe transactional mutation of instance manifests.
//!
//! This crate provides:
//! - The instance manifest and its deterministic encoding and hash
//! - A content-addressed artifact store with full re-hash verification
//! - The `prepare → stage → verify → commit` transaction engine, with
//!   rollback and crash recovery
//! - Schema version checks and manifest migrations
//! - Audit lines for every engine operation
//!
//! All I/O goes through the [`pinstate_storage::FileSystem`] the engine is
//! built with. Live files change only by rename during commit.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod artifact;
mod audit;
mod config;
mod error;
mod layout;
mod manifest;
mod refs;
mod schema;
mod transaction;
mod types;

pub use artifact::{
    hash_payload, ArtifactError, ArtifactMetadata, ArtifactPaths, ArtifactResult, ArtifactStore,
    VerificationStatus, ARTIFACT_ALGORITHM, ARTIFACT_SCHEMA_VERSION,
};
pub use audit::{AuditEvent, AuditSink, MemoryAuditLog, TracingAuditSink};
pub use config::EngineConfig;
pub use error::{CoreError, CoreResult};
pub use layout::{validate_instance_id, InstanceLayout};
pub use manifest::{ContentEntry, InstanceManifest, MANIFEST_SCHEMA_VERSION};
pub use refs::{
    KnownGoodPointer, PayloadRef, PayloadRefs, KNOWN_GOOD_SCHEMA_VERSION,
    PAYLOAD_REFS_SCHEMA_VERSION,
};
pub use schema::{ManifestMigration, RecordKind, SchemaRange, SchemaRegistry};
pub use transaction::{
    CommitStep, EngineBuilder, Phase, Recovery, TransactionEngine, TransactionRecord,
    TRANSACTION_SCHEMA_VERSION,
};
pub use types::{ContentType, ManifestHash, TxId};
