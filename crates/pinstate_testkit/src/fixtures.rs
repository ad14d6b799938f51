//! Test fixtures and instance helpers.
//!
//! Provides convenience functions for setting up an initialized instance
//! over either the in-memory or the real filesystem.

use crate::integration::run_transaction;
use pinstate_core::{
    ContentEntry, ContentType, CoreResult, EngineConfig, InstanceLayout, InstanceManifest,
    MemoryAuditLog, TransactionEngine, TransactionRecord,
};
use pinstate_storage::{FileSystem, InMemoryFileSystem, ManualClock, OsFileSystem};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// State root used by in-memory fixtures.
pub const TEST_ROOT: &str = "/state";
/// Instance id used by every fixture.
pub const TEST_INSTANCE: &str = "demo";
/// Starting time of the fixture clock, in microseconds.
pub const START_US: u64 = 1_700_000_000_000_000;
/// Operation code the fixtures record on their transactions.
pub const OP_EDIT: u32 = 1;

/// An initialized instance with its engine and injected services.
pub struct TestInstance {
    /// The engine under test.
    pub engine: TransactionEngine,
    /// The filesystem the engine was built with.
    pub fs: Arc<dyn FileSystem>,
    /// The engine clock.
    pub clock: Arc<ManualClock>,
    /// Every audit line the engine emitted.
    pub audit: Arc<MemoryAuditLog>,
    root: PathBuf,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestInstance {
    /// Creates an instance on a fresh in-memory filesystem.
    pub fn memory() -> Self {
        Self::memory_with(EngineConfig::default())
    }

    /// Creates an in-memory instance with a custom engine config.
    pub fn memory_with(config: EngineConfig) -> Self {
        let fs = InMemoryFileSystem::new();
        fs.create_dir_all(Path::new(TEST_ROOT))
            .expect("Failed to create state root");
        Self::with_filesystem(Arc::new(fs), PathBuf::from(TEST_ROOT), config)
    }

    /// Creates an instance in a temporary directory on disk.
    pub fn disk() -> Self {
        Self::disk_with(EngineConfig::default())
    }

    /// Creates an on-disk instance with a custom engine config.
    pub fn disk_with(config: EngineConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().to_path_buf();
        let mut instance = Self::with_filesystem(Arc::new(OsFileSystem::new()), root, config);
        instance._temp_dir = Some(temp_dir);
        instance
    }

    /// Creates an instance over any filesystem. `root` must already exist.
    pub fn with_filesystem(fs: Arc<dyn FileSystem>, root: PathBuf, config: EngineConfig) -> Self {
        let clock = Arc::new(ManualClock::new(START_US));
        let audit = Arc::new(MemoryAuditLog::new());
        let engine = TransactionEngine::builder()
            .filesystem(fs.clone())
            .clock(clock.clone())
            .audit_sink(audit.clone())
            .config(config)
            .build()
            .expect("Failed to build engine");
        engine
            .init_instance(&root, &InstanceManifest::new(TEST_INSTANCE))
            .expect("Failed to initialize instance");

        Self {
            engine,
            fs,
            clock,
            audit,
            root,
            _temp_dir: None,
        }
    }

    /// Returns the state root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the instance layout.
    pub fn layout(&self) -> InstanceLayout {
        InstanceLayout::new(&self.root, TEST_INSTANCE).expect("Fixture instance id is safe")
    }

    /// Stores `payload` and returns an enabled entry pinning it.
    pub fn ingest(
        &self,
        content_type: ContentType,
        id: &str,
        version: &str,
        payload: &[u8],
    ) -> ContentEntry {
        let meta = self
            .engine
            .ingest_artifact(&self.root, payload, content_type, "testkit")
            .expect("Failed to ingest artifact");
        ContentEntry::new(content_type, id, version, meta.hash_bytes)
    }

    /// Stores `payload` as a pack at version `1.1.0`.
    pub fn ingest_pack(&self, id: &str, payload: &[u8]) -> ContentEntry {
        self.ingest(ContentType::Pack, id, "1.1.0", payload)
    }

    /// Runs a whole transaction applying `edit` to the live manifest.
    pub fn transact<F>(&self, edit: F) -> CoreResult<TransactionRecord>
    where
        F: FnOnce(&mut InstanceManifest),
    {
        run_transaction(&self.engine, &self.root, TEST_INSTANCE, OP_EDIT, edit)
    }

    /// Pins `entry` at the end of the load order.
    pub fn pin(&self, entry: ContentEntry) -> CoreResult<TransactionRecord> {
        self.transact(|manifest| {
            let order = manifest.next_order_index();
            manifest.upsert_entry(entry.with_order_index(order));
        })
    }

    /// Reads the live manifest.
    pub fn live_manifest(&self) -> InstanceManifest {
        self.engine
            .load_manifest(&self.root, TEST_INSTANCE)
            .expect("Failed to load live manifest")
    }

    /// Returns every file under the instance dir except staging and the
    /// advisory lock, keyed by path.
    pub fn live_snapshot(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        let layout = self.layout();
        let staging = layout.staging_dir();
        let lock = layout.lock_path();
        snapshot_tree(self.fs.as_ref(), layout.instance_dir())
            .into_iter()
            .filter(|(path, _)| !path.starts_with(&staging) && *path != lock)
            .collect()
    }

    /// Returns every file under the staging dir.
    pub fn staging_snapshot(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        snapshot_tree(self.fs.as_ref(), &self.layout().staging_dir())
    }
}

/// Reads every file below `root` through `fs`.
///
/// Missing or unreadable entries are skipped.
pub fn snapshot_tree(fs: &dyn FileSystem, root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(names) = fs.list_dir(&dir) else {
            continue;
        };
        for name in names {
            let path = dir.join(name);
            if fs.is_dir(&path) {
                pending.push(path);
            } else if let Ok(bytes) = fs.read(&path) {
                files.insert(path, bytes);
            }
        }
    }
    files
}

/// Runs a test against a fresh in-memory instance.
pub fn with_instance<F, R>(f: F) -> R
where
    F: FnOnce(&TestInstance) -> R,
{
    let instance = TestInstance::memory();
    f(&instance)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates an instance with `count` packs pinned, one transaction each.
    pub fn populated_instance(count: usize) -> TestInstance {
        let instance = TestInstance::memory();
        for i in 0..count {
            let entry = instance.ingest_pack(&format!("pack.{i}"), format!("payload-{i}").as_bytes());
            instance.clock.advance(1);
            instance.pin(entry).expect("Failed to pin pack");
        }
        instance
    }

    /// Creates an instance whose live state was committed as known-good.
    ///
    /// The live instance then has a manifest, payload refs and a known-good
    /// pointer, so the next known-good commit exercises every rename.
    pub fn known_good_instance() -> TestInstance {
        let instance = TestInstance::memory();
        let entry = instance.ingest_pack("pack.base", b"base-payload");
        instance
            .transact(|manifest| {
                manifest.upsert_entry(entry);
                manifest.known_good = 1;
            })
            .expect("Failed to commit known-good manifest");
        instance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinstate_core::Phase;

    #[test]
    fn memory_instance_is_initialized() {
        let instance = TestInstance::memory();
        assert_eq!(instance.live_manifest(), InstanceManifest::new(TEST_INSTANCE));
        assert_eq!(instance.live_snapshot().len(), 1);
    }

    #[test]
    fn disk_instance_is_initialized() {
        let instance = TestInstance::disk();
        assert!(instance.layout().manifest_path().exists());
        assert!(instance.staging_snapshot().is_empty());
    }

    #[test]
    fn pin_commits() {
        with_instance(|instance| {
            let entry = instance.ingest_pack("pack.core", b"core");
            let tx = instance.pin(entry).unwrap();
            assert_eq!(tx.phase, Phase::Done);
            assert!(instance
                .live_manifest()
                .find_entry(ContentType::Pack, "pack.core")
                .is_some());
        });
    }

    #[test]
    fn populated_instance_keeps_insertion_order() {
        let instance = scenarios::populated_instance(3);
        let ids: Vec<_> = instance
            .live_manifest()
            .pinned_content
            .iter()
            .map(|e| e.id.clone())
            .collect();
        assert_eq!(ids, vec!["pack.0", "pack.1", "pack.2"]);
    }

    #[test]
    fn known_good_instance_has_pointer() {
        let instance = scenarios::known_good_instance();
        assert!(instance.fs.exists(&instance.layout().known_good_path()));
        assert!(instance.fs.exists(&instance.layout().payload_refs_path()));
    }
}
