//! Property-based test generators using proptest.
//!
//! Provides strategies for generating manifests and content entries that
//! keep the invariants the engine relies on: safe instance ids and unique
//! `(type, id)` pairs within a manifest.

use pinstate_core::{ContentEntry, ContentType, InstanceManifest};
use proptest::prelude::*;
use std::collections::HashSet;

/// Strategy for generating safe instance ids.
pub fn instance_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}").expect("Invalid regex")
}

/// Strategy for generating concrete (non-wildcard) content types.
pub fn content_type_strategy() -> impl Strategy<Value = ContentType> {
    prop_oneof![
        Just(ContentType::Engine),
        Just(ContentType::Game),
        Just(ContentType::Pack),
        Just(ContentType::Mod),
        Just(ContentType::Runtime),
    ]
}

/// Strategy for generating dotted content ids.
pub fn content_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,8}(\\.[a-z0-9]{1,8}){0,2}").expect("Invalid regex")
}

/// Strategy for generating `major.minor.patch` version strings.
pub fn version_strategy() -> impl Strategy<Value = String> {
    (0u32..20, 0u32..20, 0u32..100).prop_map(|(a, b, c)| format!("{a}.{b}.{c}"))
}

/// Strategy for generating one content entry with a 32-byte hash.
pub fn content_entry_strategy() -> impl Strategy<Value = ContentEntry> {
    (
        content_type_strategy(),
        content_id_strategy(),
        version_strategy(),
        prop::array::uniform32(any::<u8>()),
        any::<bool>(),
        0u32..4,
        0u32..8,
    )
        .prop_map(|(content_type, id, version, hash, enabled, policy, order)| {
            let mut entry = ContentEntry::new(content_type, id, version, hash.to_vec())
                .with_order_index(order)
                .with_enabled(enabled);
            entry.update_policy = policy;
            entry
        })
}

/// Strategy for generating a manifest with up to `max_entries` entries.
///
/// Entries sharing a `(type, id)` pair are dropped, keeping the first.
pub fn manifest_strategy(max_entries: usize) -> impl Strategy<Value = InstanceManifest> {
    (
        instance_id_strategy(),
        prop::string::string_regex("[a-z0-9.]{0,12}").expect("Invalid regex"),
        prop::string::string_regex("[a-z0-9.]{0,12}").expect("Invalid regex"),
        prop::collection::vec(content_entry_strategy(), 0..=max_entries),
        any::<u32>(),
        0u32..2,
    )
        .prop_map(
            |(instance_id, engine_build, game_build, entries, flags, known_good)| {
                let mut manifest = InstanceManifest::new(instance_id);
                manifest.pinned_engine_build_id = engine_build;
                manifest.pinned_game_build_id = game_build;
                manifest.update_policy_flags = flags;
                manifest.known_good = known_good;
                let mut seen = HashSet::new();
                manifest.pinned_content = entries
                    .into_iter()
                    .filter(|e| seen.insert((e.content_type, e.id.clone())))
                    .collect();
                manifest
            },
        )
}

/// Strategy for generating a manifest together with a shuffled copy of its
/// entries.
pub fn shuffled_manifest_strategy(
    max_entries: usize,
) -> impl Strategy<Value = (InstanceManifest, InstanceManifest)> {
    manifest_strategy(max_entries).prop_flat_map(|manifest| {
        let entries = manifest.pinned_content.clone();
        (Just(manifest), Just(entries).prop_shuffle()).prop_map(|(manifest, shuffled)| {
            let mut permuted = manifest.clone();
            permuted.pinned_content = shuffled;
            (manifest, permuted)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinstate_core::validate_instance_id;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn instance_id_is_safe(id in instance_id_strategy()) {
            prop_assert!(validate_instance_id(&id).is_ok());
        }

        #[test]
        fn manifest_entries_are_unique(manifest in manifest_strategy(12)) {
            let keys: HashSet<_> = manifest
                .pinned_content
                .iter()
                .map(|e| (e.content_type, e.id.as_str()))
                .collect();
            prop_assert_eq!(keys.len(), manifest.pinned_content.len());
        }

        #[test]
        fn shuffle_keeps_entries((manifest, permuted) in shuffled_manifest_strategy(8)) {
            prop_assert_eq!(manifest.pinned_content.len(), permuted.pinned_content.len());
            for entry in &permuted.pinned_content {
                prop_assert!(manifest.pinned_content.contains(entry));
            }
        }
    }
}
