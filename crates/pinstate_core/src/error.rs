//! Error types for pinstate core.

use crate::artifact::ArtifactError;
use crate::schema::RecordKind;
use crate::transaction::{CommitStep, Phase};
use crate::types::{ManifestHash, TxId};
use pinstate_codec::CodecError;
use pinstate_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in pinstate core operations.
///
/// Every variant maps to a stable taxonomy name via [`CoreError::code`],
/// which is what audit lines carry.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required input was empty or inconsistent.
    #[error("invalid arguments: {message}")]
    InvalidArgs {
        /// Description of the problem.
        message: String,
    },

    /// The instance id is not a safe single path component.
    #[error("unsafe instance id: {id:?}")]
    UnsafeInstanceId {
        /// The rejected id.
        id: String,
    },

    /// The engine was built without a required service.
    #[error("missing service: {service}")]
    MissingServices {
        /// Name of the absent service.
        service: &'static str,
    },

    /// The state root path is empty.
    #[error("state root unavailable")]
    StateRootUnavailable,

    /// An operation was called out of phase order.
    #[error("{op} requires phase {expected}, transaction is in {actual}")]
    BadPhase {
        /// The operation attempted.
        op: &'static str,
        /// Phase the operation requires.
        expected: Phase,
        /// Phase the transaction is in.
        actual: Phase,
    },

    /// Reading a file failed.
    #[error("read failed for {}: {source}", file.display())]
    ReadFailed {
        /// The file being read.
        file: PathBuf,
        /// Underlying storage error.
        source: StorageError,
    },

    /// Writing a file or creating a directory failed.
    #[error("write failed for {}: {source}", file.display())]
    WriteFailed {
        /// The file being written.
        file: PathBuf,
        /// Underlying storage error.
        source: StorageError,
    },

    /// Encoding a record failed.
    #[error("encode failed for {}: {source}", file.display())]
    EncodeFailed {
        /// The file the record was destined for.
        file: PathBuf,
        /// Underlying codec error.
        source: CodecError,
    },

    /// Decoding a record failed.
    #[error("decode failed for {}: {source}", file.display())]
    DecodeFailed {
        /// The file that failed to decode.
        file: PathBuf,
        /// Underlying codec error.
        source: CodecError,
    },

    /// An artifact referenced by the staged manifest failed verification.
    #[error("verify failed for entry {entry}: {source}")]
    VerifyFailed {
        /// Id of the failing content entry.
        entry: String,
        /// The specific verification condition.
        source: ArtifactError,
    },

    /// A staged file commit depends on is absent.
    #[error("staged file missing: {}", file.display())]
    MissingStagedFile {
        /// The missing staged file.
        file: PathBuf,
    },

    /// The staging area no longer belongs to this transaction.
    ///
    /// A later `prepare` replaced the marker, or recovery discarded it.
    #[error("transaction {tx_id} on {instance_id} is stale (staged: {})", staged_display(.staged))]
    StaleTransaction {
        /// The instance.
        instance_id: String,
        /// The transaction the handle names.
        tx_id: TxId,
        /// The transaction the marker names, if any.
        staged: Option<TxId>,
    },

    /// The staged manifest is not the one this transaction staged.
    #[error("staged manifest hash {found} does not match {expected}")]
    StagedManifestMismatch {
        /// Hash recorded by `stage`.
        expected: ManifestHash,
        /// Hash of the staged bytes.
        found: ManifestHash,
    },

    /// A commit rename failed.
    ///
    /// `restored` reports whether every completed step was undone.
    #[error("commit failed at {step}: {source} (live state restored: {restored})")]
    CommitFailed {
        /// The step whose rename failed.
        step: CommitStep,
        /// Underlying storage error.
        source: StorageError,
        /// True if the pre-commit live layout was restored.
        restored: bool,
    },

    /// Another transaction holds the instance's advisory lock.
    #[error("instance busy: {instance_id}")]
    InstanceBusy {
        /// The locked instance.
        instance_id: String,
    },

    /// The instance already has a live manifest.
    #[error("instance already initialized: {instance_id}")]
    InstanceExists {
        /// The instance id.
        instance_id: String,
    },

    /// A record carries a schema version the registry does not accept.
    #[error("{kind} schema version {version} not accepted")]
    SchemaRejected {
        /// Record kind.
        kind: RecordKind,
        /// Version found.
        version: u32,
    },
}

fn staged_display(staged: &Option<TxId>) -> String {
    staged.map_or_else(|| "none".to_string(), |tx| tx.to_string())
}

impl CoreError {
    /// Creates an invalid arguments error.
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::InvalidArgs {
            message: message.into(),
        }
    }

    /// Creates a read failure for `file`.
    pub fn read_failed(file: impl Into<PathBuf>, source: StorageError) -> Self {
        Self::ReadFailed {
            file: file.into(),
            source,
        }
    }

    /// Creates a write failure for `file`.
    pub fn write_failed(file: impl Into<PathBuf>, source: StorageError) -> Self {
        Self::WriteFailed {
            file: file.into(),
            source,
        }
    }

    /// Creates an encode failure for `file`.
    pub fn encode_failed(file: impl Into<PathBuf>, source: CodecError) -> Self {
        Self::EncodeFailed {
            file: file.into(),
            source,
        }
    }

    /// Creates a decode failure for `file`.
    pub fn decode_failed(file: impl Into<PathBuf>, source: CodecError) -> Self {
        Self::DecodeFailed {
            file: file.into(),
            source,
        }
    }

    /// Returns the stable taxonomy name of this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgs { .. } => "invalid_args",
            Self::UnsafeInstanceId { .. } => "unsafe_instance_id",
            Self::MissingServices { .. } => "missing_services",
            Self::StateRootUnavailable => "state_root_unavailable",
            Self::BadPhase { .. } => "bad_phase",
            Self::ReadFailed { .. } => "read_failed",
            Self::WriteFailed { .. } => "write_failed",
            Self::EncodeFailed { .. } => "encode_failed",
            Self::DecodeFailed { .. } => "decode_failed",
            Self::VerifyFailed { .. } => "verify_failed",
            Self::StaleTransaction { .. } => "stale_transaction",
            Self::MissingStagedFile { .. } => "commit_missing_staged",
            Self::StagedManifestMismatch { .. } => "commit_staged_mismatch",
            Self::CommitFailed { step, .. } => step.code(),
            Self::InstanceBusy { .. } => "instance_busy",
            Self::InstanceExists { .. } => "instance_exists",
            Self::SchemaRejected { .. } => "schema_rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_name_the_taxonomy() {
        assert_eq!(CoreError::StateRootUnavailable.code(), "state_root_unavailable");
        assert_eq!(
            CoreError::BadPhase {
                op: "stage",
                expected: Phase::Prepare,
                actual: Phase::Stage,
            }
            .code(),
            "bad_phase"
        );
        assert_eq!(
            CoreError::CommitFailed {
                step: CommitStep::PromoteManifest,
                source: StorageError::NotFound(PathBuf::from("x")),
                restored: true,
            }
            .code(),
            "commit_promote_manifest"
        );
    }

    #[test]
    fn stale_transaction_names_both_ids() {
        let err = CoreError::StaleTransaction {
            instance_id: "demo".into(),
            tx_id: TxId::new(5),
            staged: Some(TxId::new(6)),
        };
        assert_eq!(err.code(), "stale_transaction");
        assert_eq!(err.to_string(), "transaction 5 on demo is stale (staged: 6)");

        let err = CoreError::StaleTransaction {
            instance_id: "demo".into(),
            tx_id: TxId::new(5),
            staged: None,
        };
        assert!(err.to_string().ends_with("(staged: none)"));
    }

    #[test]
    fn messages_name_the_file() {
        let err = CoreError::read_failed(
            "/s/instances/demo/manifest.tlv",
            StorageError::NotFound(PathBuf::from("/s/instances/demo/manifest.tlv")),
        );
        assert!(err.to_string().contains("manifest.tlv"));
    }
}
