//! Verified payload references and the known-good pointer.
//!
//! [`PayloadRefs`] is written by `verify` and lists exactly the artifacts
//! that were checked for the staged manifest. [`KnownGoodPointer`] names
//! the archived snapshot of the last manifest marked known-good.

use crate::artifact::ARTIFACT_ALGORITHM;
use crate::manifest::ContentEntry;
use crate::types::{ContentType, ManifestHash, TxId};
use pinstate_codec::{CodecError, CodecResult, Decode, Encode, TlvReader, TlvWriter, UnknownFields};

/// Current payload refs schema version.
pub const PAYLOAD_REFS_SCHEMA_VERSION: u32 = 1;
/// Current known-good pointer schema version.
pub const KNOWN_GOOD_SCHEMA_VERSION: u32 = 1;

mod tags {
    pub const SCHEMA_VERSION: u32 = 1;
    pub const ENTRY: u32 = 2;

    pub const REF_TYPE: u32 = 1;
    pub const REF_ID: u32 = 2;
    pub const REF_VERSION: u32 = 3;
    pub const REF_HASH: u32 = 4;
    pub const REF_SIZE: u32 = 5;
    pub const REF_ALGORITHM: u32 = 6;

    pub const KG_MANIFEST_HASH: u32 = 2;
    pub const KG_TX_ID: u32 = 3;
    pub const KG_SNAPSHOT_DIR: u32 = 4;
}

/// One verified artifact reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadRef {
    /// Kind of content.
    pub content_type: ContentType,
    /// Content id.
    pub id: String,
    /// Pinned version.
    pub version: String,
    /// Artifact hash.
    pub hash_bytes: Vec<u8>,
    /// Payload size observed during verification.
    pub size_bytes: u64,
    /// Hash algorithm name.
    pub algorithm: String,
}

impl PayloadRef {
    /// Builds a ref for `entry` whose payload measured `size_bytes`.
    #[must_use]
    pub fn for_entry(entry: &ContentEntry, size_bytes: u64) -> Self {
        Self {
            content_type: entry.content_type,
            id: entry.id.clone(),
            version: entry.version.clone(),
            hash_bytes: entry.hash_bytes.clone(),
            size_bytes,
            algorithm: ARTIFACT_ALGORITHM.to_string(),
        }
    }

    fn encode_into(&self, writer: &mut TlvWriter) -> CodecResult<()> {
        let mut inner = TlvWriter::with_capacity(96);
        inner.put_u32(tags::REF_TYPE, self.content_type.as_u32());
        inner.put_str(tags::REF_ID, &self.id)?;
        inner.put_str(tags::REF_VERSION, &self.version)?;
        inner.put_bytes(tags::REF_HASH, &self.hash_bytes)?;
        inner.put_u64(tags::REF_SIZE, self.size_bytes);
        inner.put_str(tags::REF_ALGORITHM, &self.algorithm)?;
        writer.put_bytes(tags::ENTRY, &inner.finish())
    }

    fn decode_from(bytes: &[u8]) -> CodecResult<Self> {
        let mut entry = Self {
            content_type: ContentType::Any,
            id: String::new(),
            version: String::new(),
            hash_bytes: Vec::new(),
            size_bytes: 0,
            algorithm: String::new(),
        };
        for field in TlvReader::new(bytes) {
            let field = field?;
            match field.tag {
                tags::REF_TYPE => entry.content_type = ContentType::from_u32(field.as_u32()?),
                tags::REF_ID => entry.id = field.to_string_value()?,
                tags::REF_VERSION => entry.version = field.to_string_value()?,
                tags::REF_HASH => entry.hash_bytes = field.value.to_vec(),
                tags::REF_SIZE => entry.size_bytes = field.as_u64()?,
                tags::REF_ALGORITHM => entry.algorithm = field.to_string_value()?,
                _ => {}
            }
        }
        Ok(entry)
    }
}

/// The set of artifacts verified for one manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadRefs {
    /// Schema version of this record.
    pub schema_version: u32,
    /// Verified refs in manifest canonical order.
    pub entries: Vec<PayloadRef>,
    /// Fields this build does not recognise.
    pub unknown: UnknownFields,
}

impl Default for PayloadRefs {
    fn default() -> Self {
        Self {
            schema_version: PAYLOAD_REFS_SCHEMA_VERSION,
            entries: Vec::new(),
            unknown: UnknownFields::default(),
        }
    }
}

impl PayloadRefs {
    /// Returns the ref for the given type and id.
    #[must_use]
    pub fn find(&self, content_type: ContentType, id: &str) -> Option<&PayloadRef> {
        self.entries
            .iter()
            .find(|r| r.content_type == content_type && r.id == id)
    }

    /// Sum of verified payload sizes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|r| r.size_bytes).sum()
    }
}

impl Encode for PayloadRefs {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut writer = TlvWriter::with_capacity(64 + self.entries.len() * 96);
        writer.put_u32(tags::SCHEMA_VERSION, self.schema_version);
        for entry in &self.entries {
            entry.encode_into(&mut writer)?;
        }
        writer.put_unknown(&self.unknown)?;
        Ok(writer.finish())
    }
}

impl Decode for PayloadRefs {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let mut refs = Self::default();
        let mut seen_schema = false;
        for field in TlvReader::new(bytes) {
            let field = field?;
            match field.tag {
                tags::SCHEMA_VERSION => {
                    refs.schema_version = field.as_u32()?;
                    seen_schema = true;
                }
                tags::ENTRY => refs.entries.push(PayloadRef::decode_from(field.value)?),
                _ => refs.unknown.capture(&field),
            }
        }
        if !seen_schema {
            return Err(CodecError::MissingField {
                tag: tags::SCHEMA_VERSION,
            });
        }
        Ok(refs)
    }
}

/// Pointer to the archived snapshot of the last known-good manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownGoodPointer {
    /// Schema version of this record.
    pub schema_version: u32,
    /// Hash of the known-good manifest.
    pub manifest_hash: ManifestHash,
    /// Transaction that committed it.
    pub tx_id: TxId,
    /// Snapshot directory, relative to the instance directory.
    pub snapshot_dir: String,
    /// Fields this build does not recognise.
    pub unknown: UnknownFields,
}

impl KnownGoodPointer {
    /// Creates a pointer to `snapshot_dir`.
    pub fn new(manifest_hash: ManifestHash, tx_id: TxId, snapshot_dir: impl Into<String>) -> Self {
        Self {
            schema_version: KNOWN_GOOD_SCHEMA_VERSION,
            manifest_hash,
            tx_id,
            snapshot_dir: snapshot_dir.into(),
            unknown: UnknownFields::default(),
        }
    }
}

impl Encode for KnownGoodPointer {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut writer = TlvWriter::with_capacity(96);
        writer.put_u32(tags::SCHEMA_VERSION, self.schema_version);
        writer.put_u64(tags::KG_MANIFEST_HASH, self.manifest_hash.as_u64());
        writer.put_u64(tags::KG_TX_ID, self.tx_id.as_u64());
        writer.put_str(tags::KG_SNAPSHOT_DIR, &self.snapshot_dir)?;
        writer.put_unknown(&self.unknown)?;
        Ok(writer.finish())
    }
}

impl Decode for KnownGoodPointer {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let mut pointer = Self::new(ManifestHash::default(), TxId::default(), "");
        let mut snapshot_dir = None;
        for field in TlvReader::new(bytes) {
            let field = field?;
            match field.tag {
                tags::SCHEMA_VERSION => pointer.schema_version = field.as_u32()?,
                tags::KG_MANIFEST_HASH => {
                    pointer.manifest_hash = ManifestHash::new(field.as_u64()?);
                }
                tags::KG_TX_ID => pointer.tx_id = TxId::new(field.as_u64()?),
                tags::KG_SNAPSHOT_DIR => snapshot_dir = Some(field.to_string_value()?),
                _ => pointer.unknown.capture(&field),
            }
        }
        pointer.snapshot_dir = snapshot_dir.ok_or(CodecError::MissingField {
            tag: tags::KG_SNAPSHOT_DIR,
        })?;
        Ok(pointer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ref(id: &str, size: u64) -> PayloadRef {
        let entry = ContentEntry::new(ContentType::Pack, id, "1.1.0", vec![7; 32]);
        PayloadRef::for_entry(&entry, size)
    }

    #[test]
    fn refs_roundtrip_in_order() {
        let refs = PayloadRefs {
            entries: vec![sample_ref("b", 2), sample_ref("a", 1)],
            ..PayloadRefs::default()
        };
        let decoded = PayloadRefs::decode(&refs.encode().unwrap()).unwrap();
        assert_eq!(decoded, refs);
        assert_eq!(decoded.entries[0].id, "b");
        assert_eq!(decoded.entries[0].algorithm, "sha256");
        assert_eq!(decoded.total_size(), 3);
        assert!(decoded.find(ContentType::Pack, "a").is_some());
    }

    #[test]
    fn empty_refs_roundtrip() {
        let refs = PayloadRefs::default();
        assert_eq!(PayloadRefs::decode(&refs.encode().unwrap()).unwrap(), refs);
    }

    #[test]
    fn refs_without_schema_rejected() {
        assert_eq!(
            PayloadRefs::decode(&[]),
            Err(CodecError::MissingField { tag: 1 })
        );
    }

    #[test]
    fn pointer_roundtrip_keeps_unknown() {
        let pointer = KnownGoodPointer::new(
            ManifestHash::new(0xdead_beef),
            TxId::new(12),
            "previous/known_good_00000000deadbeef_12",
        );
        let mut bytes = pointer.encode().unwrap();
        let mut extra = TlvWriter::new();
        extra.put_str(40, "future").unwrap();
        bytes.extend_from_slice(&extra.finish());

        let decoded = KnownGoodPointer::decode(&bytes).unwrap();
        assert_eq!(decoded.manifest_hash, pointer.manifest_hash);
        assert_eq!(decoded.snapshot_dir, pointer.snapshot_dir);
        assert_eq!(decoded.encode().unwrap(), bytes);
    }
}
