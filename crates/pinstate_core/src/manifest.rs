//! Instance manifest: the record of what an instance has pinned.
//!
//! The manifest is encoded as TLV with a fixed field order, and its content
//! entries are emitted sorted by `order_index` (ties broken by type, id and
//! version). The encoding, and therefore the [`ManifestHash`], depends only on
//! the manifest's contents, never on the order entries were inserted in.

use crate::types::{ContentType, ManifestHash};
use pinstate_codec::{
    fnv1a64, CodecError, CodecResult, Decode, Encode, TlvReader, TlvWriter, UnknownFields,
};

/// Current manifest schema version.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

mod tags {
    pub const SCHEMA_VERSION: u32 = 1;
    pub const INSTANCE_ID: u32 = 2;
    pub const ENGINE_BUILD: u32 = 3;
    pub const GAME_BUILD: u32 = 4;
    pub const CONTENT_ENTRY: u32 = 5;
    pub const UPDATE_POLICY_FLAGS: u32 = 6;
    pub const KNOWN_GOOD: u32 = 7;

    pub const ENTRY_TYPE: u32 = 1;
    pub const ENTRY_ID: u32 = 2;
    pub const ENTRY_VERSION: u32 = 3;
    pub const ENTRY_HASH: u32 = 4;
    pub const ENTRY_ENABLED: u32 = 5;
    pub const ENTRY_UPDATE_POLICY: u32 = 6;
    pub const ENTRY_ORDER_INDEX: u32 = 7;
}

/// One pinned piece of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    /// Kind of content.
    pub content_type: ContentType,
    /// Content id, unique per type within a manifest.
    pub id: String,
    /// Pinned version string.
    pub version: String,
    /// Artifact hash of the pinned payload.
    pub hash_bytes: Vec<u8>,
    /// Whether the entry is active. Only enabled entries are verified.
    pub enabled: bool,
    /// Caller-defined update policy.
    pub update_policy: u32,
    /// Position in the canonical order.
    pub order_index: u32,
    /// Fields this build does not recognise.
    pub unknown: UnknownFields,
}

impl ContentEntry {
    /// Creates an enabled entry with default policy and order index 0.
    pub fn new(
        content_type: ContentType,
        id: impl Into<String>,
        version: impl Into<String>,
        hash_bytes: Vec<u8>,
    ) -> Self {
        Self {
            content_type,
            id: id.into(),
            version: version.into(),
            hash_bytes,
            enabled: true,
            update_policy: 0,
            order_index: 0,
            unknown: UnknownFields::default(),
        }
    }

    /// Sets the order index.
    #[must_use]
    pub fn with_order_index(mut self, order_index: u32) -> Self {
        self.order_index = order_index;
        self
    }

    /// Sets whether the entry is enabled.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn canonical_key(&self) -> (u32, u32, &str, &str) {
        (
            self.order_index,
            self.content_type.as_u32(),
            &self.id,
            &self.version,
        )
    }

    fn encode_into(&self, writer: &mut TlvWriter) -> CodecResult<()> {
        let mut entry = TlvWriter::new();
        entry.put_u32(tags::ENTRY_TYPE, self.content_type.as_u32());
        entry.put_str(tags::ENTRY_ID, &self.id)?;
        entry.put_str(tags::ENTRY_VERSION, &self.version)?;
        entry.put_bytes(tags::ENTRY_HASH, &self.hash_bytes)?;
        entry.put_u32(tags::ENTRY_ENABLED, u32::from(self.enabled));
        entry.put_u32(tags::ENTRY_UPDATE_POLICY, self.update_policy);
        entry.put_u32(tags::ENTRY_ORDER_INDEX, self.order_index);
        entry.put_unknown(&self.unknown)?;
        writer.put_bytes(tags::CONTENT_ENTRY, &entry.finish())
    }

    fn decode_from(bytes: &[u8]) -> CodecResult<Self> {
        let mut entry = Self::new(ContentType::Any, "", "", Vec::new());
        let mut seen_id = false;

        for field in TlvReader::new(bytes) {
            let field = field?;
            match field.tag {
                tags::ENTRY_TYPE => entry.content_type = ContentType::from_u32(field.as_u32()?),
                tags::ENTRY_ID => {
                    entry.id = field.to_string_value()?;
                    seen_id = true;
                }
                tags::ENTRY_VERSION => entry.version = field.to_string_value()?,
                tags::ENTRY_HASH => entry.hash_bytes = field.value.to_vec(),
                tags::ENTRY_ENABLED => entry.enabled = field.as_u32()? != 0,
                tags::ENTRY_UPDATE_POLICY => entry.update_policy = field.as_u32()?,
                tags::ENTRY_ORDER_INDEX => entry.order_index = field.as_u32()?,
                _ => entry.unknown.capture(&field),
            }
        }

        if !seen_id {
            return Err(CodecError::MissingField { tag: tags::ENTRY_ID });
        }
        Ok(entry)
    }
}

/// The versioned record of an instance's pinned content.
///
/// Equality compares `pinned_content` in its in-memory order, while the
/// encoding and [`InstanceManifest::hash`] always use canonical order. A
/// decoded manifest is canonical, so `decode(encode(m)) == m` holds only
/// for a manifest that has been [`canonicalize`](Self::canonicalize)d; two
/// manifests with the same entries in different orders hash equally but
/// compare unequal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceManifest {
    /// Schema version of this record.
    pub schema_version: u32,
    /// Instance id (a safe path component).
    pub instance_id: String,
    /// Pinned engine build.
    pub pinned_engine_build_id: String,
    /// Pinned game build.
    pub pinned_game_build_id: String,
    /// Pinned content, in no particular in-memory order.
    pub pinned_content: Vec<ContentEntry>,
    /// Instance-wide update policy flags.
    pub update_policy_flags: u32,
    /// 1 if this manifest should become the known-good rollback target.
    pub known_good: u32,
    /// Fields this build does not recognise.
    pub unknown: UnknownFields,
}

impl Default for InstanceManifest {
    fn default() -> Self {
        Self::new("")
    }
}

impl InstanceManifest {
    /// Creates an empty manifest for `instance_id`.
    #[must_use]
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            instance_id: instance_id.into(),
            pinned_engine_build_id: String::new(),
            pinned_game_build_id: String::new(),
            pinned_content: Vec::new(),
            update_policy_flags: 0,
            known_good: 0,
            unknown: UnknownFields::default(),
        }
    }

    /// Returns the entry with the given type and id.
    #[must_use]
    pub fn find_entry(&self, content_type: ContentType, id: &str) -> Option<&ContentEntry> {
        self.pinned_content
            .iter()
            .find(|e| e.content_type == content_type && e.id == id)
    }

    /// Inserts `entry`, replacing any entry with the same type and id.
    ///
    /// Returns the replaced entry.
    pub fn upsert_entry(&mut self, entry: ContentEntry) -> Option<ContentEntry> {
        match self
            .pinned_content
            .iter_mut()
            .find(|e| e.content_type == entry.content_type && e.id == entry.id)
        {
            Some(existing) => Some(std::mem::replace(existing, entry)),
            None => {
                self.pinned_content.push(entry);
                None
            }
        }
    }

    /// Removes the entry with the given type and id.
    pub fn remove_entry(&mut self, content_type: ContentType, id: &str) -> Option<ContentEntry> {
        let pos = self
            .pinned_content
            .iter()
            .position(|e| e.content_type == content_type && e.id == id)?;
        Some(self.pinned_content.remove(pos))
    }

    /// Returns one past the highest order index in use.
    #[must_use]
    pub fn next_order_index(&self) -> u32 {
        self.pinned_content
            .iter()
            .map(|e| e.order_index.saturating_add(1))
            .max()
            .unwrap_or(0)
    }

    /// Iterates over enabled entries in canonical order.
    pub fn enabled_entries(&self) -> impl Iterator<Item = &ContentEntry> {
        self.canonical_entries().into_iter().filter(|e| e.enabled)
    }

    /// Sorts `pinned_content` into canonical order in place.
    pub fn canonicalize(&mut self) {
        self.pinned_content
            .sort_by(|a, b| a.canonical_key().cmp(&b.canonical_key()));
    }

    /// Computes the manifest hash over the canonical encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be encoded.
    pub fn hash(&self) -> CodecResult<ManifestHash> {
        Ok(ManifestHash::new(fnv1a64(&self.encode()?)))
    }

    fn canonical_entries(&self) -> Vec<&ContentEntry> {
        let mut entries: Vec<&ContentEntry> = self.pinned_content.iter().collect();
        entries.sort_by(|a, b| a.canonical_key().cmp(&b.canonical_key()));
        entries
    }
}

impl Encode for InstanceManifest {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut writer = TlvWriter::with_capacity(256);
        writer.put_u32(tags::SCHEMA_VERSION, self.schema_version);
        writer.put_str(tags::INSTANCE_ID, &self.instance_id)?;
        writer.put_str(tags::ENGINE_BUILD, &self.pinned_engine_build_id)?;
        writer.put_str(tags::GAME_BUILD, &self.pinned_game_build_id)?;
        for entry in self.canonical_entries() {
            entry.encode_into(&mut writer)?;
        }
        writer.put_u32(tags::UPDATE_POLICY_FLAGS, self.update_policy_flags);
        writer.put_u32(tags::KNOWN_GOOD, self.known_good);
        writer.put_unknown(&self.unknown)?;
        Ok(writer.finish())
    }
}

impl Decode for InstanceManifest {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let mut manifest = Self::new("");
        let mut schema_version = None;
        let mut instance_id = None;

        for field in TlvReader::new(bytes) {
            let field = field?;
            match field.tag {
                tags::SCHEMA_VERSION => schema_version = Some(field.as_u32()?),
                tags::INSTANCE_ID => instance_id = Some(field.to_string_value()?),
                tags::ENGINE_BUILD => manifest.pinned_engine_build_id = field.to_string_value()?,
                tags::GAME_BUILD => manifest.pinned_game_build_id = field.to_string_value()?,
                tags::CONTENT_ENTRY => manifest
                    .pinned_content
                    .push(ContentEntry::decode_from(field.value)?),
                tags::UPDATE_POLICY_FLAGS => manifest.update_policy_flags = field.as_u32()?,
                tags::KNOWN_GOOD => manifest.known_good = field.as_u32()?,
                _ => manifest.unknown.capture(&field),
            }
        }

        manifest.schema_version = schema_version.ok_or(CodecError::MissingField {
            tag: tags::SCHEMA_VERSION,
        })?;
        manifest.instance_id = instance_id.ok_or(CodecError::MissingField {
            tag: tags::INSTANCE_ID,
        })?;
        manifest.canonicalize();
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(id: &str, order: u32) -> ContentEntry {
        ContentEntry::new(ContentType::Pack, id, "1.0.0", vec![order as u8; 32])
            .with_order_index(order)
    }

    #[test]
    fn empty_manifest_roundtrip() {
        let manifest = InstanceManifest::new("demo");
        let decoded = InstanceManifest::decode(&manifest.encode().unwrap()).unwrap();
        assert_eq!(decoded, manifest);
    }

    #[test]
    fn populated_manifest_roundtrip() {
        let mut manifest = InstanceManifest::new("demo");
        manifest.pinned_engine_build_id = "engine-2024.1".into();
        manifest.pinned_game_build_id = "game-77".into();
        manifest.update_policy_flags = 0b101;
        manifest.known_good = 1;
        manifest.upsert_entry(pack("pack.core", 0));
        manifest.upsert_entry(pack("pack.extra", 1).with_enabled(false));

        let decoded = InstanceManifest::decode(&manifest.encode().unwrap()).unwrap();
        assert_eq!(decoded, manifest);
    }

    #[test]
    fn insertion_order_does_not_change_hash() {
        let mut a = InstanceManifest::new("demo");
        a.upsert_entry(pack("pack.a", 0));
        a.upsert_entry(pack("pack.b", 1));
        a.upsert_entry(pack("pack.c", 2));

        let mut b = InstanceManifest::new("demo");
        b.upsert_entry(pack("pack.c", 2));
        b.upsert_entry(pack("pack.a", 0));
        b.upsert_entry(pack("pack.b", 1));

        assert_eq!(a.encode().unwrap(), b.encode().unwrap());
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn order_index_ties_are_deterministic() {
        let mut a = InstanceManifest::new("demo");
        a.upsert_entry(pack("pack.x", 0));
        a.upsert_entry(pack("pack.y", 0));

        let mut b = InstanceManifest::new("demo");
        b.upsert_entry(pack("pack.y", 0));
        b.upsert_entry(pack("pack.x", 0));

        assert_eq!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn hash_changes_with_content() {
        let empty = InstanceManifest::new("demo");
        let mut one = empty.clone();
        one.upsert_entry(pack("pack.core", 0));
        assert_ne!(empty.hash().unwrap(), one.hash().unwrap());
    }

    #[test]
    fn unknown_tags_are_preserved() {
        let manifest = InstanceManifest::new("demo");
        let mut bytes = manifest.encode().unwrap();
        let mut extra = TlvWriter::new();
        extra.put_str(200, "from the future").unwrap();
        bytes.extend_from_slice(&extra.finish());

        let decoded = InstanceManifest::decode(&bytes).unwrap();
        assert_eq!(decoded.unknown.len(), 1);
        assert_eq!(decoded.encode().unwrap(), bytes);
    }

    #[test]
    fn missing_instance_id_rejected() {
        let mut writer = TlvWriter::new();
        writer.put_u32(tags::SCHEMA_VERSION, 1);
        let result = InstanceManifest::decode(&writer.finish());
        assert_eq!(
            result,
            Err(CodecError::MissingField {
                tag: tags::INSTANCE_ID
            })
        );
    }

    #[test]
    fn upsert_replaces_same_type_and_id() {
        let mut manifest = InstanceManifest::new("demo");
        assert!(manifest.upsert_entry(pack("pack.core", 0)).is_none());

        let mut newer = pack("pack.core", 0);
        newer.version = "1.1.0".into();
        let old = manifest.upsert_entry(newer).unwrap();

        assert_eq!(old.version, "1.0.0");
        assert_eq!(manifest.pinned_content.len(), 1);
        assert_eq!(
            manifest
                .find_entry(ContentType::Pack, "pack.core")
                .unwrap()
                .version,
            "1.1.0"
        );
    }

    #[test]
    fn remove_and_next_order_index() {
        let mut manifest = InstanceManifest::new("demo");
        assert_eq!(manifest.next_order_index(), 0);
        manifest.upsert_entry(pack("pack.a", 3));
        manifest.upsert_entry(pack("pack.b", 7));
        assert_eq!(manifest.next_order_index(), 8);

        assert!(manifest.remove_entry(ContentType::Pack, "pack.b").is_some());
        assert!(manifest.remove_entry(ContentType::Mod, "pack.a").is_none());
        assert_eq!(manifest.next_order_index(), 4);
    }

    #[test]
    fn enabled_entries_skip_disabled() {
        let mut manifest = InstanceManifest::new("demo");
        manifest.upsert_entry(pack("pack.b", 1));
        manifest.upsert_entry(pack("pack.off", 2).with_enabled(false));
        manifest.upsert_entry(pack("pack.a", 0));

        let ids: Vec<&str> = manifest.enabled_entries().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["pack.a", "pack.b"]);
    }
}
