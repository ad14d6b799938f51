//! Content-addressed artifact store.
//!
//! Each artifact lives in a directory derived entirely from the hash of its
//! payload:
//!
//! ```text
//! <state_root>/artifacts/sha256/<hex(hash)>/artifact.tlv
//! <state_root>/artifacts/sha256/<hex(hash)>/payload/payload.bin
//! ```
//!
//! Verification trusts nothing cached. [`ArtifactStore::verify`] checks the
//! metadata against the expected hash, then re-hashes the payload bytes from
//! scratch, so a payload modified after ingestion is always caught even
//! though its metadata still claims the original hash.

use crate::types::ContentType;
use pinstate_codec::{CodecError, CodecResult, Decode, Encode, TlvReader, TlvWriter, UnknownFields};
use pinstate_storage::{FileSystem, StorageError};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Name of the hash algorithm, used as the `<algo>` path component.
pub const ARTIFACT_ALGORITHM: &str = "sha256";
/// Current artifact metadata schema version.
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

const ARTIFACTS_DIR: &str = "artifacts";
const METADATA_FILE: &str = "artifact.tlv";
const PAYLOAD_DIR: &str = "payload";
const PAYLOAD_FILE: &str = "payload.bin";

/// Result type for artifact operations.
pub type ArtifactResult<T> = Result<T, ArtifactError>;

/// Distinct artifact failure conditions.
///
/// Hash mismatches (tampering or corruption), missing files and stale
/// metadata are reported separately so audit trails can tell them apart.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// State root or hash was empty.
    #[error("invalid artifact arguments: {0}")]
    InvalidArgs(&'static str),

    /// The metadata record is absent.
    #[error("artifact metadata missing: {}", path.display())]
    MetadataMissing {
        /// Expected metadata path.
        path: PathBuf,
    },

    /// The metadata record failed to decode.
    #[error("artifact metadata undecodable at {}: {source}", path.display())]
    MetadataDecode {
        /// Metadata path.
        path: PathBuf,
        /// Codec error.
        source: CodecError,
    },

    /// The metadata claims a different hash than requested.
    #[error("metadata hash mismatch: expected {expected}, metadata has {found}")]
    MetadataHashMismatch {
        /// Requested hash (hex).
        expected: String,
        /// Hash in metadata (hex).
        found: String,
    },

    /// The stored content type differs from the requested one.
    #[error("content type mismatch: expected {expected}, found {found}")]
    ContentTypeMismatch {
        /// Requested type.
        expected: ContentType,
        /// Stored type.
        found: ContentType,
    },

    /// The payload file is absent.
    #[error("artifact payload missing: {}", path.display())]
    PayloadMissing {
        /// Expected payload path.
        path: PathBuf,
    },

    /// The payload bytes hash to something other than requested.
    #[error("payload hash mismatch: expected {expected}, computed {actual}")]
    PayloadHashMismatch {
        /// Requested hash (hex).
        expected: String,
        /// Hash recomputed from the bytes (hex).
        actual: String,
    },

    /// The payload size differs from the size recorded in metadata.
    #[error("payload size mismatch: metadata says {expected} bytes, payload has {actual}")]
    SizeMismatch {
        /// Size in metadata.
        expected: u64,
        /// Actual payload size.
        actual: u64,
    },

    /// Encoding metadata failed.
    #[error("artifact metadata encode failed: {0}")]
    Encode(CodecError),

    /// Any other storage failure.
    #[error("artifact storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ArtifactError {
    /// Returns true for either hash mismatch condition.
    #[must_use]
    pub fn is_hash_mismatch(&self) -> bool {
        matches!(
            self,
            Self::MetadataHashMismatch { .. } | Self::PayloadHashMismatch { .. }
        )
    }

    /// Returns the stable name of this condition.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgs(_) => "invalid_args",
            Self::MetadataMissing { .. } => "metadata_missing",
            Self::MetadataDecode { .. } => "metadata_decode_failed",
            Self::MetadataHashMismatch { .. } => "metadata_hash_mismatch",
            Self::ContentTypeMismatch { .. } => "content_type_mismatch",
            Self::PayloadMissing { .. } => "payload_missing",
            Self::PayloadHashMismatch { .. } => "payload_hash_mismatch",
            Self::SizeMismatch { .. } => "size_mismatch",
            Self::Encode(_) => "encode_failed",
            Self::Storage(_) => "storage_failed",
        }
    }
}

/// Whether an artifact has been checked since ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    /// Never verified.
    Unverified,
    /// Verified at ingestion.
    Verified,
    /// Last verification failed.
    Failed,
}

impl VerificationStatus {
    fn from_u32(value: u32) -> CodecResult<Self> {
        match value {
            0 => Ok(Self::Unverified),
            1 => Ok(Self::Verified),
            2 => Ok(Self::Failed),
            other => Err(CodecError::UnknownValue {
                tag: meta_tags::VERIFICATION_STATUS,
                value: other,
            }),
        }
    }

    const fn as_u32(self) -> u32 {
        match self {
            Self::Unverified => 0,
            Self::Verified => 1,
            Self::Failed => 2,
        }
    }
}

mod meta_tags {
    pub const SCHEMA_VERSION: u32 = 1;
    pub const HASH: u32 = 2;
    pub const SIZE: u32 = 3;
    pub const CONTENT_TYPE: u32 = 4;
    pub const TIMESTAMP_US: u32 = 5;
    pub const VERIFICATION_STATUS: u32 = 6;
    pub const SOURCE: u32 = 7;
}

/// Metadata stored next to each artifact payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMetadata {
    /// Schema version of this record.
    pub schema_version: u32,
    /// Hash of the payload.
    pub hash_bytes: Vec<u8>,
    /// Payload size in bytes; 0 means unknown.
    pub size_bytes: u64,
    /// Kind of content.
    pub content_type: ContentType,
    /// Ingestion time in microseconds.
    pub timestamp_us: u64,
    /// Verification state at ingestion.
    pub verification_status: VerificationStatus,
    /// Free-form origin description.
    pub source: String,
    /// Fields this build does not recognise.
    pub unknown: UnknownFields,
}

impl Encode for ArtifactMetadata {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut writer = TlvWriter::with_capacity(128);
        writer.put_u32(meta_tags::SCHEMA_VERSION, self.schema_version);
        writer.put_bytes(meta_tags::HASH, &self.hash_bytes)?;
        writer.put_u64(meta_tags::SIZE, self.size_bytes);
        writer.put_u32(meta_tags::CONTENT_TYPE, self.content_type.as_u32());
        writer.put_u64(meta_tags::TIMESTAMP_US, self.timestamp_us);
        writer.put_u32(
            meta_tags::VERIFICATION_STATUS,
            self.verification_status.as_u32(),
        );
        writer.put_str(meta_tags::SOURCE, &self.source)?;
        writer.put_unknown(&self.unknown)?;
        Ok(writer.finish())
    }
}

impl Decode for ArtifactMetadata {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let mut meta = Self {
            schema_version: 0,
            hash_bytes: Vec::new(),
            size_bytes: 0,
            content_type: ContentType::Any,
            timestamp_us: 0,
            verification_status: VerificationStatus::Unverified,
            source: String::new(),
            unknown: UnknownFields::default(),
        };
        let mut seen_hash = false;

        for field in TlvReader::new(bytes) {
            let field = field?;
            match field.tag {
                meta_tags::SCHEMA_VERSION => meta.schema_version = field.as_u32()?,
                meta_tags::HASH => {
                    meta.hash_bytes = field.value.to_vec();
                    seen_hash = true;
                }
                meta_tags::SIZE => meta.size_bytes = field.as_u64()?,
                meta_tags::CONTENT_TYPE => {
                    meta.content_type = ContentType::from_u32(field.as_u32()?);
                }
                meta_tags::TIMESTAMP_US => meta.timestamp_us = field.as_u64()?,
                meta_tags::VERIFICATION_STATUS => {
                    meta.verification_status = VerificationStatus::from_u32(field.as_u32()?)?;
                }
                meta_tags::SOURCE => meta.source = field.to_string_value()?,
                _ => meta.unknown.capture(&field),
            }
        }

        if !seen_hash {
            return Err(CodecError::MissingField {
                tag: meta_tags::HASH,
            });
        }
        Ok(meta)
    }
}

/// Paths derived from an artifact hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// `artifacts/<algo>/<hex>`.
    pub artifact_dir: PathBuf,
    /// `.../artifact.tlv`.
    pub metadata_path: PathBuf,
    /// `.../payload/payload.bin`.
    pub payload_path: PathBuf,
}

/// Computes the artifact hash of `payload`.
#[must_use]
pub fn hash_payload(payload: &[u8]) -> Vec<u8> {
    Sha256::digest(payload).to_vec()
}

/// Read-mostly view over the content-addressed artifact directory.
#[derive(Clone)]
pub struct ArtifactStore {
    fs: Arc<dyn FileSystem>,
    hash_buffer_size: usize,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("hash_buffer_size", &self.hash_buffer_size)
            .finish_non_exhaustive()
    }
}

impl ArtifactStore {
    /// Creates a store reading through `fs`, hashing with a buffer of
    /// `hash_buffer_size` bytes.
    pub fn new(fs: Arc<dyn FileSystem>, hash_buffer_size: usize) -> Self {
        Self {
            fs,
            hash_buffer_size: hash_buffer_size.max(1),
        }
    }

    /// Derives the directory, metadata and payload paths for `hash_bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::InvalidArgs`] if either input is empty.
    pub fn paths(&self, state_root: &Path, hash_bytes: &[u8]) -> ArtifactResult<ArtifactPaths> {
        if state_root.as_os_str().is_empty() {
            return Err(ArtifactError::InvalidArgs("empty state root"));
        }
        if hash_bytes.is_empty() {
            return Err(ArtifactError::InvalidArgs("empty hash"));
        }
        let artifact_dir = state_root
            .join(ARTIFACTS_DIR)
            .join(ARTIFACT_ALGORITHM)
            .join(hex::encode(hash_bytes));
        Ok(ArtifactPaths {
            metadata_path: artifact_dir.join(METADATA_FILE),
            payload_path: artifact_dir.join(PAYLOAD_DIR).join(PAYLOAD_FILE),
            artifact_dir,
        })
    }

    /// Reads and decodes the metadata record for `hash_bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::MetadataMissing`] or
    /// [`ArtifactError::MetadataDecode`].
    pub fn read_metadata(
        &self,
        state_root: &Path,
        hash_bytes: &[u8],
    ) -> ArtifactResult<ArtifactMetadata> {
        let paths = self.paths(state_root, hash_bytes)?;
        let bytes = self.fs.read(&paths.metadata_path).map_err(|e| {
            if e.is_not_found() {
                ArtifactError::MetadataMissing {
                    path: paths.metadata_path.clone(),
                }
            } else {
                ArtifactError::Storage(e)
            }
        })?;
        ArtifactMetadata::decode(&bytes).map_err(|source| ArtifactError::MetadataDecode {
            path: paths.metadata_path,
            source,
        })
    }

    /// Fully verifies the artifact for `expected_hash`.
    ///
    /// Checks, in order: metadata is present and decodes; metadata hash
    /// equals `expected_hash`; content type matches unless
    /// `expected_type` is [`ContentType::Any`]; the payload re-hashes to
    /// `expected_hash`; the payload size equals the metadata size when that
    /// is nonzero.
    ///
    /// # Errors
    ///
    /// Returns the first failing condition.
    pub fn verify(
        &self,
        state_root: &Path,
        expected_hash: &[u8],
        expected_type: ContentType,
    ) -> ArtifactResult<ArtifactMetadata> {
        let paths = self.paths(state_root, expected_hash)?;
        let meta = self.read_metadata(state_root, expected_hash)?;

        if meta.hash_bytes != expected_hash {
            return Err(ArtifactError::MetadataHashMismatch {
                expected: hex::encode(expected_hash),
                found: hex::encode(&meta.hash_bytes),
            });
        }

        if !expected_type.is_wildcard() && meta.content_type != expected_type {
            return Err(ArtifactError::ContentTypeMismatch {
                expected: expected_type,
                found: meta.content_type,
            });
        }

        let (actual_hash, actual_size) = self.hash_file(&paths.payload_path)?;
        if actual_hash != expected_hash {
            return Err(ArtifactError::PayloadHashMismatch {
                expected: hex::encode(expected_hash),
                actual: hex::encode(&actual_hash),
            });
        }

        if meta.size_bytes != 0 && meta.size_bytes != actual_size {
            return Err(ArtifactError::SizeMismatch {
                expected: meta.size_bytes,
                actual: actual_size,
            });
        }

        Ok(ArtifactMetadata {
            size_bytes: actual_size,
            ..meta
        })
    }

    /// Stores `payload` under its hash and writes its metadata.
    ///
    /// Ingesting identical bytes twice rewrites the same paths with the
    /// same payload.
    ///
    /// # Errors
    ///
    /// Returns a storage or encode error.
    pub fn ingest(
        &self,
        state_root: &Path,
        payload: &[u8],
        content_type: ContentType,
        source: &str,
        timestamp_us: u64,
    ) -> ArtifactResult<ArtifactMetadata> {
        let hash_bytes = hash_payload(payload);
        let paths = self.paths(state_root, &hash_bytes)?;

        let payload_dir = paths.artifact_dir.join(PAYLOAD_DIR);
        self.fs.create_dir_all(&payload_dir)?;
        self.fs.write(&paths.payload_path, payload)?;

        let meta = ArtifactMetadata {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            hash_bytes,
            size_bytes: payload.len() as u64,
            content_type,
            timestamp_us,
            verification_status: VerificationStatus::Verified,
            source: source.to_string(),
            unknown: UnknownFields::default(),
        };
        let encoded = meta.encode().map_err(ArtifactError::Encode)?;
        self.fs.write(&paths.metadata_path, &encoded)?;

        tracing::debug!(
            hash = %hex::encode(&meta.hash_bytes),
            size = meta.size_bytes,
            "artifact ingested"
        );
        Ok(meta)
    }

    /// Streams the file at `path` through SHA-256.
    fn hash_file(&self, path: &Path) -> ArtifactResult<(Vec<u8>, u64)> {
        let mut reader = self.fs.open_read(path).map_err(|e| {
            if e.is_not_found() {
                ArtifactError::PayloadMissing {
                    path: path.to_path_buf(),
                }
            } else {
                ArtifactError::Storage(e)
            }
        })?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; self.hash_buffer_size];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buffer).map_err(StorageError::from)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            total += n as u64;
        }
        Ok((hasher.finalize().to_vec(), total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinstate_storage::InMemoryFileSystem;

    const ROOT: &str = "/state";

    fn store() -> (InMemoryFileSystem, ArtifactStore) {
        let fs = InMemoryFileSystem::new();
        fs.create_dir_all(Path::new(ROOT)).unwrap();
        let store = ArtifactStore::new(Arc::new(fs.clone()), 4);
        (fs, store)
    }

    #[test]
    fn paths_follow_layout() {
        let (_, store) = store();
        let paths = store.paths(Path::new(ROOT), &[0xab, 0x01]).unwrap();
        assert_eq!(
            paths.artifact_dir,
            Path::new("/state/artifacts/sha256/ab01")
        );
        assert_eq!(
            paths.metadata_path,
            Path::new("/state/artifacts/sha256/ab01/artifact.tlv")
        );
        assert_eq!(
            paths.payload_path,
            Path::new("/state/artifacts/sha256/ab01/payload/payload.bin")
        );
    }

    #[test]
    fn paths_reject_empty_inputs() {
        let (_, store) = store();
        assert!(matches!(
            store.paths(Path::new(""), &[1]),
            Err(ArtifactError::InvalidArgs(_))
        ));
        assert!(matches!(
            store.paths(Path::new(ROOT), &[]),
            Err(ArtifactError::InvalidArgs(_))
        ));
    }

    #[test]
    fn ingest_then_verify() {
        let (_, store) = store();
        let meta = store
            .ingest(Path::new(ROOT), b"pack bytes", ContentType::Pack, "test", 10)
            .unwrap();

        let verified = store
            .verify(Path::new(ROOT), &meta.hash_bytes, ContentType::Pack)
            .unwrap();
        assert_eq!(verified.size_bytes, 10);
        assert_eq!(verified.source, "test");
    }

    #[test]
    fn wildcard_type_skips_type_check() {
        let (_, store) = store();
        let meta = store
            .ingest(Path::new(ROOT), b"x", ContentType::Mod, "test", 0)
            .unwrap();
        assert!(store
            .verify(Path::new(ROOT), &meta.hash_bytes, ContentType::Any)
            .is_ok());
        let err = store
            .verify(Path::new(ROOT), &meta.hash_bytes, ContentType::Pack)
            .unwrap_err();
        assert!(matches!(err, ArtifactError::ContentTypeMismatch { .. }));
    }

    #[test]
    fn missing_metadata_reported() {
        let (_, store) = store();
        let err = store
            .verify(Path::new(ROOT), &hash_payload(b"nothing"), ContentType::Any)
            .unwrap_err();
        assert!(matches!(err, ArtifactError::MetadataMissing { .. }));
    }

    #[test]
    fn missing_payload_reported() {
        let (fs, store) = store();
        let meta = store
            .ingest(Path::new(ROOT), b"data", ContentType::Pack, "test", 0)
            .unwrap();
        let paths = store.paths(Path::new(ROOT), &meta.hash_bytes).unwrap();
        fs.remove_file(&paths.payload_path).unwrap();

        let err = store
            .verify(Path::new(ROOT), &meta.hash_bytes, ContentType::Pack)
            .unwrap_err();
        assert!(matches!(err, ArtifactError::PayloadMissing { .. }));
    }

    #[test]
    fn tampered_payload_is_hash_mismatch() {
        let (fs, store) = store();
        let meta = store
            .ingest(Path::new(ROOT), b"original", ContentType::Pack, "test", 0)
            .unwrap();
        let paths = store.paths(Path::new(ROOT), &meta.hash_bytes).unwrap();
        fs.write(&paths.payload_path, b"0riginal").unwrap();

        let err = store
            .verify(Path::new(ROOT), &meta.hash_bytes, ContentType::Pack)
            .unwrap_err();
        assert!(matches!(err, ArtifactError::PayloadHashMismatch { .. }));
        assert!(err.is_hash_mismatch());
    }

    #[test]
    fn stale_metadata_hash_reported() {
        let (fs, store) = store();
        let meta = store
            .ingest(Path::new(ROOT), b"data", ContentType::Pack, "test", 0)
            .unwrap();
        let paths = store.paths(Path::new(ROOT), &meta.hash_bytes).unwrap();

        let mut stale = meta.clone();
        stale.hash_bytes = hash_payload(b"other");
        fs.write(&paths.metadata_path, &stale.encode().unwrap())
            .unwrap();

        let err = store
            .verify(Path::new(ROOT), &meta.hash_bytes, ContentType::Pack)
            .unwrap_err();
        assert_eq!(err.code(), "metadata_hash_mismatch");
    }

    #[test]
    fn size_mismatch_reported() {
        let (fs, store) = store();
        let meta = store
            .ingest(Path::new(ROOT), b"data", ContentType::Pack, "test", 0)
            .unwrap();
        let paths = store.paths(Path::new(ROOT), &meta.hash_bytes).unwrap();

        let mut wrong = meta.clone();
        wrong.size_bytes = 99;
        fs.write(&paths.metadata_path, &wrong.encode().unwrap())
            .unwrap();

        let err = store
            .verify(Path::new(ROOT), &meta.hash_bytes, ContentType::Pack)
            .unwrap_err();
        assert!(matches!(
            err,
            ArtifactError::SizeMismatch {
                expected: 99,
                actual: 4
            }
        ));
    }

    #[test]
    fn zero_size_metadata_skips_size_check() {
        let (fs, store) = store();
        let meta = store
            .ingest(Path::new(ROOT), b"data", ContentType::Pack, "test", 0)
            .unwrap();
        let paths = store.paths(Path::new(ROOT), &meta.hash_bytes).unwrap();

        let mut unsized_meta = meta.clone();
        unsized_meta.size_bytes = 0;
        fs.write(&paths.metadata_path, &unsized_meta.encode().unwrap())
            .unwrap();

        let verified = store
            .verify(Path::new(ROOT), &meta.hash_bytes, ContentType::Pack)
            .unwrap();
        assert_eq!(verified.size_bytes, 4);
    }

    #[test]
    fn corrupt_metadata_reported() {
        let (fs, store) = store();
        let meta = store
            .ingest(Path::new(ROOT), b"data", ContentType::Pack, "test", 0)
            .unwrap();
        let paths = store.paths(Path::new(ROOT), &meta.hash_bytes).unwrap();
        fs.write(&paths.metadata_path, &[1, 0, 0]).unwrap();

        let err = store
            .read_metadata(Path::new(ROOT), &meta.hash_bytes)
            .unwrap_err();
        assert!(matches!(err, ArtifactError::MetadataDecode { .. }));
    }

    #[test]
    fn metadata_roundtrip_with_unknown_tag() {
        let meta = ArtifactMetadata {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            hash_bytes: hash_payload(b"abc"),
            size_bytes: 3,
            content_type: ContentType::Runtime,
            timestamp_us: 1_700_000_000_000_000,
            verification_status: VerificationStatus::Verified,
            source: "ingest".into(),
            unknown: UnknownFields::default(),
        };
        let mut bytes = meta.encode().unwrap();
        let mut extra = TlvWriter::new();
        extra.put_u32(50, 1);
        bytes.extend_from_slice(&extra.finish());

        let decoded = ArtifactMetadata::decode(&bytes).unwrap();
        assert_eq!(decoded.unknown.len(), 1);
        assert_eq!(decoded.encode().unwrap(), bytes);
        assert_eq!(ArtifactMetadata { unknown: UnknownFields::default(), ..decoded }, meta);
    }
}
