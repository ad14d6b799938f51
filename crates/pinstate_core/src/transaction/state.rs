//! Transaction record and phases.

use crate::manifest::InstanceManifest;
use crate::types::{ManifestHash, TxId};
use pinstate_codec::{CodecError, CodecResult, Decode, Encode, TlvReader, TlvWriter, UnknownFields};
use std::fmt;
use std::path::PathBuf;

/// Current transaction marker schema version.
pub const TRANSACTION_SCHEMA_VERSION: u32 = 1;

mod tags {
    pub const SCHEMA_VERSION: u32 = 1;
    pub const TX_ID: u32 = 2;
    pub const INSTANCE_ID: u32 = 3;
    pub const OP_TYPE: u32 = 4;
    pub const PHASE: u32 = 5;
    pub const BEFORE_HASH: u32 = 6;
    pub const AFTER_HASH: u32 = 7;
}

/// Phase of a transaction. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Phase {
    /// Not started.
    #[default]
    None,
    /// Bound to the live manifest.
    Prepare,
    /// Proposed manifest written to staging.
    Stage,
    /// Referenced artifacts verified.
    Verify,
    /// Committed or rolled back.
    Done,
}

impl Phase {
    /// Converts a wire value to a phase.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Prepare),
            2 => Some(Self::Stage),
            3 => Some(Self::Verify),
            4 => Some(Self::Done),
            _ => None,
        }
    }

    /// Converts the phase to its wire value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Prepare => 1,
            Self::Stage => 2,
            Self::Verify => 3,
            Self::Done => 4,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "NONE",
            Self::Prepare => "PREPARE",
            Self::Stage => "STAGE",
            Self::Verify => "VERIFY",
            Self::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// An in-flight mutation of one instance.
///
/// The engine persists this record as the staging marker. Only the ids,
/// phase and the two manifest hashes go to disk; the manifests themselves
/// are held in memory by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    /// Schema version of the persisted marker.
    pub schema_version: u32,
    /// Transaction id.
    pub tx_id: TxId,
    /// Instance being mutated.
    pub instance_id: String,
    /// State root the instance lives under.
    pub state_root: PathBuf,
    /// Caller-defined mutation kind.
    pub op_type: u32,
    /// Current phase.
    pub phase: Phase,
    /// Hash of the live manifest at prepare time.
    pub before_manifest_hash: ManifestHash,
    /// Hash of the proposed manifest as staged.
    pub after_manifest_hash: ManifestHash,
    /// Live manifest at prepare time.
    pub before_manifest: InstanceManifest,
    /// Proposed manifest. Callers edit this between `prepare` and `stage`.
    pub after_manifest: InstanceManifest,
    /// Marker fields this build does not recognise.
    pub unknown: UnknownFields,
}

impl TransactionRecord {
    /// Returns true once the transaction has been committed or rolled back.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Done
    }
}

impl Encode for TransactionRecord {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut writer = TlvWriter::with_capacity(96);
        writer.put_u32(tags::SCHEMA_VERSION, self.schema_version);
        writer.put_u64(tags::TX_ID, self.tx_id.as_u64());
        writer.put_str(tags::INSTANCE_ID, &self.instance_id)?;
        writer.put_u32(tags::OP_TYPE, self.op_type);
        writer.put_u32(tags::PHASE, self.phase.as_u32());
        writer.put_u64(tags::BEFORE_HASH, self.before_manifest_hash.as_u64());
        writer.put_u64(tags::AFTER_HASH, self.after_manifest_hash.as_u64());
        writer.put_unknown(&self.unknown)?;
        Ok(writer.finish())
    }
}

impl Decode for TransactionRecord {
    /// Decodes a marker. `state_root` and both manifests come back empty.
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let mut record = Self {
            schema_version: 0,
            tx_id: TxId::default(),
            instance_id: String::new(),
            state_root: PathBuf::new(),
            op_type: 0,
            phase: Phase::None,
            before_manifest_hash: ManifestHash::default(),
            after_manifest_hash: ManifestHash::default(),
            before_manifest: InstanceManifest::default(),
            after_manifest: InstanceManifest::default(),
            unknown: UnknownFields::default(),
        };
        let mut seen_tx = false;

        for field in TlvReader::new(bytes) {
            let field = field?;
            match field.tag {
                tags::SCHEMA_VERSION => record.schema_version = field.as_u32()?,
                tags::TX_ID => {
                    record.tx_id = TxId::new(field.as_u64()?);
                    seen_tx = true;
                }
                tags::INSTANCE_ID => record.instance_id = field.to_string_value()?,
                tags::OP_TYPE => record.op_type = field.as_u32()?,
                tags::PHASE => {
                    let raw = field.as_u32()?;
                    record.phase = Phase::from_u32(raw).ok_or(CodecError::UnknownValue {
                        tag: tags::PHASE,
                        value: raw,
                    })?;
                }
                tags::BEFORE_HASH => {
                    record.before_manifest_hash = ManifestHash::new(field.as_u64()?);
                }
                tags::AFTER_HASH => {
                    record.after_manifest_hash = ManifestHash::new(field.as_u64()?);
                }
                _ => record.unknown.capture(&field),
            }
        }

        if !seen_tx {
            return Err(CodecError::MissingField { tag: tags::TX_ID });
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker() -> TransactionRecord {
        TransactionRecord {
            schema_version: TRANSACTION_SCHEMA_VERSION,
            tx_id: TxId::new(1_700_000_000_123_456),
            instance_id: "demo".into(),
            state_root: PathBuf::new(),
            op_type: 7,
            phase: Phase::Stage,
            before_manifest_hash: ManifestHash::new(1),
            after_manifest_hash: ManifestHash::new(2),
            before_manifest: InstanceManifest::default(),
            after_manifest: InstanceManifest::default(),
            unknown: UnknownFields::default(),
        }
    }

    #[test]
    fn phase_order_is_forward() {
        assert!(Phase::None < Phase::Prepare);
        assert!(Phase::Prepare < Phase::Stage);
        assert!(Phase::Stage < Phase::Verify);
        assert!(Phase::Verify < Phase::Done);
        assert_eq!(Phase::from_u32(9), None);
        assert_eq!(Phase::Verify.to_string(), "VERIFY");
    }

    #[test]
    fn marker_roundtrip() {
        let record = marker();
        let decoded = TransactionRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn marker_layout_is_fixed() {
        let bytes = marker().encode().unwrap();
        // schema(4) + tx(8) + id(4) + op(4) + phase(4) + 2 hashes(8), each with an 8-byte header
        assert_eq!(bytes.len(), 7 * 8 + 4 + 8 + 4 + 4 + 4 + 8 + 8);
        assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &2u32.to_le_bytes());
    }

    #[test]
    fn unknown_phase_rejected() {
        let mut writer = TlvWriter::new();
        writer.put_u64(2, 1);
        writer.put_u32(5, 42);
        assert_eq!(
            TransactionRecord::decode(&writer.finish()),
            Err(CodecError::UnknownValue { tag: 5, value: 42 })
        );
    }

    #[test]
    fn unknown_marker_fields_survive() {
        let mut bytes = marker().encode().unwrap();
        let mut extra = TlvWriter::new();
        extra.put_u64(99, 5);
        bytes.extend_from_slice(&extra.finish());

        let decoded = TransactionRecord::decode(&bytes).unwrap();
        assert_eq!(decoded.unknown.len(), 1);
        assert_eq!(decoded.encode().unwrap(), bytes);
    }
}
