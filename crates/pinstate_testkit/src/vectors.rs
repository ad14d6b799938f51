//! Encoding test vectors.
//!
//! Fixed byte encodings and hashes that any reader or writer of pinstate
//! state must reproduce exactly.

use serde::{Deserialize, Serialize};

/// A test vector that can be shared with other implementations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Input data (hex-encoded).
    pub input_hex: String,
    /// Expected output (hex-encoded bytes or hash).
    pub expected_hex: String,
}

impl TestVector {
    fn new(id: &str, description: &str, input_hex: &str, expected_hex: &str) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            input_hex: input_hex.into(),
            expected_hex: expected_hex.into(),
        }
    }
}

/// SHA-256 of [`PACK_CORE_PAYLOAD`].
pub const PACK_CORE_HASH_HEX: &str =
    "ef1714d8b55e174d63d4eaa3b3731fdbddee60079242d77fffaaaaf9ff31d255";

/// Payload used by the pinned-pack vectors.
pub const PACK_CORE_PAYLOAD: &[u8] = b"pack-core-payload";

/// Encoding of the empty manifest for instance `demo`.
pub const EMPTY_DEMO_MANIFEST_HEX: &str = concat!(
    "010000000400000001000000",
    "020000000400000064656d6f",
    "0300000000000000",
    "0400000000000000",
    "060000000400000000000000",
    "070000000400000000000000",
);

/// Encoding of the `demo` manifest pinning `pack.core` 1.1.0.
pub const PACK_CORE_DEMO_MANIFEST_HEX: &str = concat!(
    "010000000400000001000000",
    "020000000400000064656d6f",
    "0300000000000000",
    "0400000000000000",
    "0500000076000000",
    "010000000400000003000000",
    "02000000090000007061636b2e636f7265",
    "0300000005000000312e312e30",
    "0400000020000000",
    "ef1714d8b55e174d63d4eaa3b3731fdbddee60079242d77fffaaaaf9ff31d255",
    "050000000400000001000000",
    "060000000400000000000000",
    "070000000400000000000000",
    "060000000400000000000000",
    "070000000400000000000000",
);

/// FNV-1a 64 vectors over raw bytes.
pub fn fnv_vectors() -> Vec<TestVector> {
    vec![
        TestVector::new("fnv_empty", "FNV-1a 64 of no bytes", "", "cbf29ce484222325"),
        TestVector::new("fnv_a", "FNV-1a 64 of 'a'", "61", "af63dc4c8601ec8c"),
        TestVector::new(
            "fnv_foobar",
            "FNV-1a 64 of 'foobar'",
            "666f6f626172",
            "85944171f73967e8",
        ),
    ]
}

/// Manifest hash vectors: input is the canonical encoding.
pub fn manifest_vectors() -> Vec<TestVector> {
    vec![
        TestVector::new(
            "manifest_empty_demo",
            "Empty manifest for instance demo",
            EMPTY_DEMO_MANIFEST_HEX,
            "5b63bc7758effb7a",
        ),
        TestVector::new(
            "manifest_pack_core",
            "Manifest for demo pinning pack.core 1.1.0",
            PACK_CORE_DEMO_MANIFEST_HEX,
            "debe2f01c7ad5e85",
        ),
    ]
}

/// Artifact hash vectors.
pub fn artifact_vectors() -> Vec<TestVector> {
    vec![TestVector::new(
        "artifact_pack_core",
        "SHA-256 of the pack.core payload",
        &hex::encode(PACK_CORE_PAYLOAD),
        PACK_CORE_HASH_HEX,
    )]
}

/// Generate all test vectors as JSON.
pub fn all_vectors_json() -> serde_json::Result<String> {
    let vectors = AllTestVectors {
        fnv: fnv_vectors(),
        manifest: manifest_vectors(),
        artifact: artifact_vectors(),
    };
    serde_json::to_string_pretty(&vectors)
}

#[derive(Debug, Serialize, Deserialize)]
struct AllTestVectors {
    fnv: Vec<TestVector>,
    manifest: Vec<TestVector>,
    artifact: Vec<TestVector>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinstate_codec::{fnv1a64, Decode, Encode};
    use pinstate_core::{hash_payload, ContentEntry, ContentType, InstanceManifest};

    fn decode_hex(s: &str) -> Vec<u8> {
        hex::decode(s).expect("Vector hex is valid")
    }

    #[test]
    fn fnv_vectors_match() {
        for vector in fnv_vectors() {
            let hash = fnv1a64(&decode_hex(&vector.input_hex));
            assert_eq!(format!("{hash:016x}"), vector.expected_hex, "{}", vector.id);
        }
    }

    #[test]
    fn manifest_vectors_decode_and_hash() {
        for vector in manifest_vectors() {
            let bytes = decode_hex(&vector.input_hex);
            let manifest = InstanceManifest::decode(&bytes).unwrap();
            assert_eq!(manifest.encode().unwrap(), bytes, "{}", vector.id);
            assert_eq!(
                manifest.hash().unwrap().to_string(),
                vector.expected_hex,
                "{}",
                vector.id
            );
        }
    }

    #[test]
    fn built_manifest_matches_vector() {
        let mut manifest = InstanceManifest::new("demo");
        assert_eq!(hex::encode(manifest.encode().unwrap()), EMPTY_DEMO_MANIFEST_HEX);

        manifest.upsert_entry(ContentEntry::new(
            ContentType::Pack,
            "pack.core",
            "1.1.0",
            decode_hex(PACK_CORE_HASH_HEX),
        ));
        assert_eq!(
            hex::encode(manifest.encode().unwrap()),
            PACK_CORE_DEMO_MANIFEST_HEX
        );
    }

    #[test]
    fn artifact_vectors_match() {
        for vector in artifact_vectors() {
            let hash = hash_payload(&decode_hex(&vector.input_hex));
            assert_eq!(hex::encode(hash), vector.expected_hex, "{}", vector.id);
        }
    }

    #[test]
    fn all_vectors_json_round_trips() {
        let json = all_vectors_json().unwrap();
        let parsed: AllTestVectors = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.manifest.len(), 2);
        assert!(json.contains("manifest_pack_core"));
    }
}
