//! Schema version acceptance and manifest migrations.
//!
//! A [`SchemaRegistry`] is constructed explicitly and handed to the engine.
//! It records, per record kind, the range of schema versions this build
//! reads, and an ordered list of manifest migrations that bring an older
//! manifest up to the current version when it is loaded.
//!
//! ```
//! use pinstate_core::{RecordKind, SchemaRegistry};
//!
//! let registry = SchemaRegistry::with_defaults();
//! assert!(registry.check(RecordKind::Manifest, 1).is_ok());
//! assert!(registry.check(RecordKind::Manifest, 99).is_err());
//! ```

use crate::artifact::ARTIFACT_SCHEMA_VERSION;
use crate::error::{CoreError, CoreResult};
use crate::manifest::{InstanceManifest, MANIFEST_SCHEMA_VERSION};
use crate::refs::{KNOWN_GOOD_SCHEMA_VERSION, PAYLOAD_REFS_SCHEMA_VERSION};
use crate::transaction::TRANSACTION_SCHEMA_VERSION;
use std::collections::BTreeMap;
use std::fmt;

/// Kinds of persisted record with a schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordKind {
    /// Instance manifest.
    Manifest,
    /// Transaction marker.
    Transaction,
    /// Artifact metadata.
    ArtifactMetadata,
    /// Verified payload refs.
    PayloadRefs,
    /// Known-good pointer.
    KnownGood,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Manifest => "manifest",
            Self::Transaction => "transaction",
            Self::ArtifactMetadata => "artifact metadata",
            Self::PayloadRefs => "payload refs",
            Self::KnownGood => "known-good pointer",
        };
        f.write_str(name)
    }
}

/// Accepted schema versions for one record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaRange {
    /// Oldest version still readable.
    pub min: u32,
    /// Version this build writes.
    pub current: u32,
}

impl SchemaRange {
    /// Creates a range.
    #[must_use]
    pub const fn new(min: u32, current: u32) -> Self {
        Self { min, current }
    }

    /// Returns true if `version` falls inside the range.
    #[must_use]
    pub const fn accepts(&self, version: u32) -> bool {
        version >= self.min && version <= self.current
    }
}

/// A step upgrading a manifest from one schema version to the next.
pub trait ManifestMigration: Send + Sync {
    /// The version this migration upgrades from. It produces `from + 1`.
    fn from_version(&self) -> u32;

    /// Name used in logs.
    fn name(&self) -> &str;

    /// Rewrites the manifest in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be upgraded.
    fn migrate(&self, manifest: &mut InstanceManifest) -> CoreResult<()>;
}

/// Registry of accepted schema versions and manifest migrations.
#[derive(Default)]
pub struct SchemaRegistry {
    ranges: BTreeMap<RecordKind, SchemaRange>,
    migrations: BTreeMap<u32, Box<dyn ManifestMigration>>,
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("ranges", &self.ranges)
            .field("migrations", &self.migrations.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SchemaRegistry {
    /// Creates an empty registry. Kinds with no registered range accept
    /// any version.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry accepting exactly the versions this build writes.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(RecordKind::Manifest, SchemaRange::new(1, MANIFEST_SCHEMA_VERSION));
        registry.register(
            RecordKind::Transaction,
            SchemaRange::new(1, TRANSACTION_SCHEMA_VERSION),
        );
        registry.register(
            RecordKind::ArtifactMetadata,
            SchemaRange::new(1, ARTIFACT_SCHEMA_VERSION),
        );
        registry.register(
            RecordKind::PayloadRefs,
            SchemaRange::new(1, PAYLOAD_REFS_SCHEMA_VERSION),
        );
        registry.register(
            RecordKind::KnownGood,
            SchemaRange::new(1, KNOWN_GOOD_SCHEMA_VERSION),
        );
        registry
    }

    /// Sets the accepted range for `kind`.
    pub fn register(&mut self, kind: RecordKind, range: SchemaRange) {
        self.ranges.insert(kind, range);
    }

    /// Adds a manifest migration, replacing any registered for the same
    /// source version.
    pub fn register_migration(&mut self, migration: Box<dyn ManifestMigration>) {
        self.migrations.insert(migration.from_version(), migration);
    }

    /// Returns the range registered for `kind`.
    #[must_use]
    pub fn range(&self, kind: RecordKind) -> Option<SchemaRange> {
        self.ranges.get(&kind).copied()
    }

    /// Checks that `version` is readable for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaRejected`] if the version is outside the
    /// registered range.
    pub fn check(&self, kind: RecordKind, version: u32) -> CoreResult<()> {
        match self.ranges.get(&kind) {
            Some(range) if !range.accepts(version) => {
                Err(CoreError::SchemaRejected { kind, version })
            }
            _ => Ok(()),
        }
    }

    /// Checks a loaded manifest and migrates it to the current version.
    ///
    /// Returns true if any migration ran.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaRejected`] if the version is not accepted
    /// or a migration step is missing, or the error of a failing migration.
    pub fn upgrade_manifest(&self, manifest: &mut InstanceManifest) -> CoreResult<bool> {
        self.check(RecordKind::Manifest, manifest.schema_version)?;
        let target = self
            .range(RecordKind::Manifest)
            .map_or(manifest.schema_version, |r| r.current);

        let mut migrated = false;
        while manifest.schema_version < target {
            let from = manifest.schema_version;
            let migration = self.migrations.get(&from).ok_or(CoreError::SchemaRejected {
                kind: RecordKind::Manifest,
                version: from,
            })?;
            migration.migrate(manifest)?;
            manifest.schema_version = from + 1;
            migrated = true;
            tracing::debug!(
                migration = migration.name(),
                from,
                to = from + 1,
                "manifest migrated"
            );
        }
        Ok(migrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FillGameBuild;

    impl ManifestMigration for FillGameBuild {
        fn from_version(&self) -> u32 {
            1
        }

        fn name(&self) -> &str {
            "fill_game_build"
        }

        fn migrate(&self, manifest: &mut InstanceManifest) -> CoreResult<()> {
            if manifest.pinned_game_build_id.is_empty() {
                manifest.pinned_game_build_id = "unknown".into();
            }
            Ok(())
        }
    }

    #[test]
    fn defaults_accept_current_versions() {
        let registry = SchemaRegistry::with_defaults();
        assert!(registry.check(RecordKind::Transaction, 1).is_ok());
        assert!(matches!(
            registry.check(RecordKind::Transaction, 0),
            Err(CoreError::SchemaRejected { version: 0, .. })
        ));
    }

    #[test]
    fn empty_registry_accepts_anything() {
        let registry = SchemaRegistry::new();
        assert!(registry.check(RecordKind::Manifest, 1234).is_ok());
    }

    #[test]
    fn current_manifest_is_untouched() {
        let registry = SchemaRegistry::with_defaults();
        let mut manifest = InstanceManifest::new("demo");
        assert!(!registry.upgrade_manifest(&mut manifest).unwrap());
        assert_eq!(manifest, InstanceManifest::new("demo"));
    }

    #[test]
    fn migrations_run_in_order() {
        let mut registry = SchemaRegistry::with_defaults();
        registry.register(RecordKind::Manifest, SchemaRange::new(1, 2));
        registry.register_migration(Box::new(FillGameBuild));

        let mut manifest = InstanceManifest::new("demo");
        assert!(registry.upgrade_manifest(&mut manifest).unwrap());
        assert_eq!(manifest.schema_version, 2);
        assert_eq!(manifest.pinned_game_build_id, "unknown");
    }

    #[test]
    fn missing_migration_is_rejected() {
        let mut registry = SchemaRegistry::with_defaults();
        registry.register(RecordKind::Manifest, SchemaRange::new(1, 3));
        registry.register_migration(Box::new(FillGameBuild));

        let mut manifest = InstanceManifest::new("demo");
        let err = registry.upgrade_manifest(&mut manifest).unwrap_err();
        assert!(matches!(
            err,
            CoreError::SchemaRejected {
                kind: RecordKind::Manifest,
                version: 2
            }
        ));
    }
}
