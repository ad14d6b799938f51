//! Fault injection and crash recovery testing.
//!
//! This module provides a [`FaultyFileSystem`] that fails a chosen
//! filesystem call, and a [`CrashRecoveryHarness`] that drives the engine
//! into those failures and checks what is left on disk.
//!
//! ## Test Strategy
//!
//! 1. **Rename failure during commit** - every completed rename is undone
//!    and the live files are byte-identical to before the commit
//! 2. **Crash during commit** - every rename from a point on fails,
//!    including the undo; recovery then clears staging without touching
//!    whatever live state the crash left
//! 3. **Crash before commit** - the abandoned transaction is discarded
//! 4. **Crash after commit** - committed state survives recovery
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pinstate_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! harness.run_all_tests();
//! assert!(harness.all_passed(), "{}", harness.summary());
//! ```

use crate::fixtures::{TestInstance, TEST_INSTANCE, TEST_ROOT};
use parking_lot::Mutex;
use pinstate_core::{
    CommitStep, ContentType, CoreError, EngineConfig, Phase, Recovery, TransactionRecord,
};
use pinstate_storage::{
    FileLock, FileSystem, InMemoryFileSystem, StorageError, StorageResult,
};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Number of renames a commit performs when every optional step applies.
pub const FULL_COMMIT_RENAMES: usize = 7;

/// Steps of a full commit, in rename order.
pub const FULL_COMMIT_STEPS: [CommitStep; FULL_COMMIT_RENAMES] = [
    CommitStep::ArchiveManifest,
    CommitStep::ArchivePayloadRefs,
    CommitStep::PromoteManifest,
    CommitStep::PromotePayloadRefs,
    CommitStep::ArchiveKnownGoodSnapshot,
    CommitStep::PromoteKnownGood,
    CommitStep::PromoteKnownGood,
];

/// Points at which a fault can be injected. Indexes count calls of that
/// kind from the moment the fault is armed, starting at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// The nth rename fails once.
    Rename(usize),
    /// Every rename from the nth on fails, undo renames included.
    RenamesFrom(usize),
    /// The nth write fails once.
    Write(usize),
    /// The nth file removal fails once.
    RemoveFile(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Rename,
    Write,
    RemoveFile,
}

/// A filesystem wrapper that fails one armed call.
pub struct FaultyFileSystem {
    inner: Arc<dyn FileSystem>,
    fault: Mutex<Option<FaultPoint>>,
    renames: AtomicUsize,
    writes: AtomicUsize,
    removes: AtomicUsize,
    tripped: AtomicBool,
}

impl FaultyFileSystem {
    /// Wraps an inner filesystem. No fault is armed.
    pub fn new(inner: Arc<dyn FileSystem>) -> Self {
        Self {
            inner,
            fault: Mutex::new(None),
            renames: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            tripped: AtomicBool::new(false),
        }
    }

    /// Wraps a fresh in-memory filesystem with `root` created.
    pub fn in_memory(root: &Path) -> Self {
        let inner = InMemoryFileSystem::new();
        inner
            .create_dir_all(root)
            .expect("Failed to create state root");
        Self::new(Arc::new(inner))
    }

    /// Arms `point` and resets the call counters.
    pub fn fail_at(&self, point: FaultPoint) {
        self.renames.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
        self.removes.store(0, Ordering::SeqCst);
        self.tripped.store(false, Ordering::SeqCst);
        *self.fault.lock() = Some(point);
    }

    /// Disarms any pending fault.
    pub fn disarm(&self) {
        *self.fault.lock() = None;
    }

    /// Returns whether an injected fault has fired since arming.
    pub fn has_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Returns the number of renames attempted since arming.
    pub fn renames_seen(&self) -> usize {
        self.renames.load(Ordering::SeqCst)
    }

    fn check(&self, kind: CallKind, path: &Path) -> StorageResult<()> {
        let counter = match kind {
            CallKind::Rename => &self.renames,
            CallKind::Write => &self.writes,
            CallKind::RemoveFile => &self.removes,
        };
        let n = counter.fetch_add(1, Ordering::SeqCst);

        let mut fault = self.fault.lock();
        let (hit, sticky) = match (*fault, kind) {
            (Some(FaultPoint::Rename(i)), CallKind::Rename)
            | (Some(FaultPoint::Write(i)), CallKind::Write)
            | (Some(FaultPoint::RemoveFile(i)), CallKind::RemoveFile) => (n == i, false),
            (Some(FaultPoint::RenamesFrom(i)), CallKind::Rename) => (n >= i, true),
            _ => (false, false),
        };
        if !hit {
            return Ok(());
        }
        if !sticky {
            *fault = None;
        }
        self.tripped.store(true, Ordering::SeqCst);
        Err(StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("injected {kind:?} fault at {}", path.display()),
        )))
    }
}

impl FileSystem for FaultyFileSystem {
    fn read(&self, path: &Path) -> StorageResult<Vec<u8>> {
        self.inner.read(path)
    }

    fn open_read(&self, path: &Path) -> StorageResult<Box<dyn Read + Send>> {
        self.inner.open_read(path)
    }

    fn write(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        self.check(CallKind::Write, path)?;
        self.inner.write(path, data)
    }

    fn rename(&self, from: &Path, to: &Path) -> StorageResult<()> {
        self.check(CallKind::Rename, from)?;
        self.inner.rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> StorageResult<()> {
        self.check(CallKind::RemoveFile, path)?;
        self.inner.remove_file(path)
    }

    fn create_dir_all(&self, path: &Path) -> StorageResult<()> {
        self.inner.create_dir_all(path)
    }

    fn remove_dir(&self, path: &Path) -> StorageResult<()> {
        self.inner.remove_dir(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.inner.is_dir(path)
    }

    fn list_dir(&self, path: &Path) -> StorageResult<Vec<String>> {
        self.inner.list_dir(path)
    }

    fn sync_dir(&self, path: &Path) -> StorageResult<()> {
        self.inner.sync_dir(path)
    }

    fn lock_exclusive(&self, path: &Path) -> StorageResult<FileLock> {
        self.inner.lock_exclusive(path)
    }
}

/// Creates a [`TestInstance`] whose engine runs over a [`FaultyFileSystem`].
pub fn faulty_instance(config: EngineConfig) -> (TestInstance, Arc<FaultyFileSystem>) {
    let root = PathBuf::from(TEST_ROOT);
    let faulty = Arc::new(FaultyFileSystem::in_memory(&root));
    let instance = TestInstance::with_filesystem(faulty.clone(), root, config);
    (instance, faulty)
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            error: Some(error.to_string()),
        }
    }

    fn from_outcome(description: &str, outcome: Result<(), String>) -> Self {
        match outcome {
            Ok(()) => Self::pass(description),
            Err(error) => Self::fail(description, &error),
        }
    }
}

/// Harness for running crash recovery tests.
#[derive(Debug, Default)]
pub struct CrashRecoveryHarness {
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

fn ensure(condition: bool, message: impl Into<String>) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(message.into())
    }
}

impl CrashRecoveryHarness {
    /// Creates an empty harness.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an instance with a known-good commit behind it and a second
    /// known-good transaction verified and ready to commit.
    ///
    /// Committing the returned transaction performs all
    /// [`FULL_COMMIT_RENAMES`] renames.
    fn full_commit_setup() -> Result<(TestInstance, Arc<FaultyFileSystem>, TransactionRecord), String>
    {
        let (instance, faulty) = faulty_instance(EngineConfig::default());
        let base = instance.ingest_pack("pack.base", b"base-payload");
        instance
            .transact(|manifest| {
                manifest.upsert_entry(base);
                manifest.known_good = 1;
            })
            .map_err(|e| format!("setup commit failed: {e}"))?;

        let extra = instance.ingest(ContentType::Mod, "mod.extra", "0.2.0", b"extra-payload");
        let engine = &instance.engine;
        let mut tx = engine
            .prepare(TEST_INSTANCE, instance.root(), crate::fixtures::OP_EDIT)
            .map_err(|e| format!("prepare failed: {e}"))?;
        tx.after_manifest
            .upsert_entry(extra.with_order_index(tx.after_manifest.next_order_index()));
        engine
            .stage(&mut tx)
            .map_err(|e| format!("stage failed: {e}"))?;
        engine
            .verify(&mut tx)
            .map_err(|e| format!("verify failed: {e}"))?;
        Ok((instance, faulty, tx))
    }

    /// A single commit rename fails; the completed prefix must be undone.
    pub fn test_rename_failure(&mut self, index: usize) -> CrashRecoveryResult {
        let description = format!("commit rename {index} fails and is compensated");
        let outcome = (|| -> Result<(), String> {
            let (instance, faulty, mut tx) = Self::full_commit_setup()?;
            let before = instance.live_snapshot();

            faulty.fail_at(FaultPoint::Rename(index));
            let err = instance
                .engine
                .commit(&mut tx)
                .err()
                .ok_or("commit succeeded despite injected fault")?;
            let expected_step = FULL_COMMIT_STEPS[index];
            ensure(
                matches!(
                    &err,
                    CoreError::CommitFailed { step, restored: true, .. } if *step == expected_step
                ),
                format!("unexpected error: {err}"),
            )?;
            ensure(tx.phase == Phase::Verify, "failed commit changed the phase")?;
            ensure(
                instance.live_snapshot() == before,
                "live files differ after compensation",
            )?;

            instance
                .engine
                .rollback(&mut tx)
                .map_err(|e| format!("rollback failed: {e}"))?;
            ensure(
                instance.staging_snapshot().is_empty(),
                "rollback left staging files",
            )?;
            ensure(
                instance.live_snapshot() == before,
                "rollback touched live files",
            )
        })();
        self.record(&description, outcome)
    }

    /// The process dies after `applied` commit renames. Undo is impossible,
    /// so recovery must clear staging and leave live files alone. When the
    /// live manifest was already moved out, the archive must still hold it.
    pub fn test_crash_during_commit(&mut self, applied: usize) -> CrashRecoveryResult {
        let description = format!("crash after {applied} commit renames is recovered");
        let outcome = (|| -> Result<(), String> {
            let (instance, faulty, mut tx) = Self::full_commit_setup()?;
            let before = instance.live_snapshot();

            faulty.fail_at(FaultPoint::RenamesFrom(applied));
            let err = instance
                .engine
                .commit(&mut tx)
                .err()
                .ok_or("commit succeeded despite injected fault")?;
            let restored_expected = applied == 0;
            ensure(
                matches!(err, CoreError::CommitFailed { restored, .. } if restored == restored_expected),
                format!("unexpected error: {err}"),
            )?;
            faulty.disarm();
            let archive = instance
                .layout()
                .archive_dir(tx.before_manifest_hash, tx.tx_id);
            drop(tx);

            let after_crash = instance.live_snapshot();
            if applied == 0 {
                ensure(after_crash == before, "live files changed with no rename applied")?;
            }

            let recovery = instance
                .engine
                .recover_staging(TEST_INSTANCE, instance.root())
                .map_err(|e| format!("recovery failed: {e}"))?;
            ensure(
                matches!(recovery, Recovery::Discarded { marker: Some(_) }),
                format!("unexpected recovery outcome: {recovery:?}"),
            )?;
            ensure(
                instance.staging_snapshot().is_empty(),
                "recovery left staging files",
            )?;
            ensure(
                instance.live_snapshot() == after_crash,
                "recovery touched live files",
            )?;
            if !instance.fs.exists(&instance.layout().manifest_path()) {
                ensure(
                    instance.fs.exists(&archive.join("manifest.tlv")),
                    "previous manifest is in neither the live nor the archive location",
                )?;
            }
            Ok(())
        })();
        self.record(&description, outcome)
    }

    /// The process dies with the transaction in `phase`.
    pub fn test_crash_before_commit(&mut self, phase: Phase) -> CrashRecoveryResult {
        let description = format!("crash in {phase} is discarded by recovery");
        let outcome = (|| -> Result<(), String> {
            let (instance, _faulty, mut tx) = Self::full_commit_setup()?;
            // Rewind to the requested phase by replaying from prepare.
            if phase != Phase::Verify {
                instance
                    .engine
                    .rollback(&mut tx)
                    .map_err(|e| format!("rollback failed: {e}"))?;
                tx = instance
                    .engine
                    .prepare(TEST_INSTANCE, instance.root(), crate::fixtures::OP_EDIT)
                    .map_err(|e| format!("prepare failed: {e}"))?;
                tx.after_manifest.update_policy_flags = 1;
                if phase == Phase::Stage {
                    instance
                        .engine
                        .stage(&mut tx)
                        .map_err(|e| format!("stage failed: {e}"))?;
                }
            }
            ensure(tx.phase == phase, format!("setup reached {}", tx.phase))?;
            let before = instance.live_snapshot();
            drop(tx);

            let recovery = instance
                .engine
                .recover_staging(TEST_INSTANCE, instance.root())
                .map_err(|e| format!("recovery failed: {e}"))?;
            match recovery {
                Recovery::Discarded { marker: Some(marker) } => {
                    ensure(marker.phase == phase, format!("marker recorded {}", marker.phase))?;
                }
                other => return Err(format!("unexpected recovery outcome: {other:?}")),
            }
            ensure(
                instance.staging_snapshot().is_empty(),
                "recovery left staging files",
            )?;
            ensure(
                instance.live_snapshot() == before,
                "recovery touched live files",
            )
        })();
        self.record(&description, outcome)
    }

    /// A finished commit survives recovery untouched.
    pub fn test_committed_state_survives(&mut self) -> CrashRecoveryResult {
        let description = "committed state survives recovery";
        let outcome = (|| -> Result<(), String> {
            let (instance, _faulty, mut tx) = Self::full_commit_setup()?;
            instance
                .engine
                .commit(&mut tx)
                .map_err(|e| format!("commit failed: {e}"))?;
            let committed = instance.live_snapshot();

            for _ in 0..2 {
                let recovery = instance
                    .engine
                    .recover_staging(TEST_INSTANCE, instance.root())
                    .map_err(|e| format!("recovery failed: {e}"))?;
                ensure(
                    matches!(recovery, Recovery::Clean),
                    format!("unexpected recovery outcome: {recovery:?}"),
                )?;
            }
            ensure(
                instance.live_snapshot() == committed,
                "recovery touched committed files",
            )?;
            ensure(
                instance.live_manifest() == tx.after_manifest,
                "live manifest is not the committed one",
            )
        })();
        self.record(description, outcome)
    }

    /// Runs every scenario.
    pub fn run_all_tests(&mut self) -> &[CrashRecoveryResult] {
        for index in 0..FULL_COMMIT_RENAMES {
            self.test_rename_failure(index);
        }
        for applied in 0..FULL_COMMIT_RENAMES {
            self.test_crash_during_commit(applied);
        }
        for phase in [Phase::Prepare, Phase::Stage, Phase::Verify] {
            self.test_crash_before_commit(phase);
        }
        self.test_committed_state_survives();
        &self.results
    }

    /// Returns a summary of all test results.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let mut summary = format!(
            "Crash recovery: {passed}/{} passed\n",
            self.results.len()
        );
        for result in &self.results {
            let mark = if result.passed { "✓" } else { "✗" };
            summary.push_str(&format!("  {mark} {}", result.description));
            if let Some(error) = &result.error {
                summary.push_str(&format!(": {error}"));
            }
            summary.push('\n');
        }
        summary
    }

    /// Returns whether all tests passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    fn record(&mut self, description: &str, outcome: Result<(), String>) -> CrashRecoveryResult {
        let result = CrashRecoveryResult::from_outcome(description, outcome);
        self.results.push(result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> PathBuf {
        PathBuf::from(TEST_ROOT)
    }

    #[test]
    fn unarmed_filesystem_passes_through() {
        let fs = FaultyFileSystem::in_memory(&root());
        let file = root().join("a");
        fs.write(&file, b"x").unwrap();
        fs.rename(&file, &root().join("b")).unwrap();
        assert_eq!(fs.read(&root().join("b")).unwrap(), b"x");
        assert!(!fs.has_tripped());
    }

    #[test]
    fn single_fault_fires_once() {
        let fs = FaultyFileSystem::in_memory(&root());
        fs.write(&root().join("a"), b"x").unwrap();
        fs.fail_at(FaultPoint::Rename(0));

        assert!(fs.rename(&root().join("a"), &root().join("b")).is_err());
        assert!(fs.has_tripped());
        fs.rename(&root().join("a"), &root().join("b")).unwrap();
        assert_eq!(fs.renames_seen(), 2);
    }

    #[test]
    fn sticky_fault_keeps_failing() {
        let fs = FaultyFileSystem::in_memory(&root());
        fs.write(&root().join("a"), b"x").unwrap();
        fs.fail_at(FaultPoint::RenamesFrom(1));

        fs.rename(&root().join("a"), &root().join("b")).unwrap();
        assert!(fs.rename(&root().join("b"), &root().join("a")).is_err());
        assert!(fs.rename(&root().join("b"), &root().join("a")).is_err());
        fs.disarm();
        fs.rename(&root().join("b"), &root().join("a")).unwrap();
    }

    #[test]
    fn write_fault_targets_writes_only() {
        let fs = FaultyFileSystem::in_memory(&root());
        fs.fail_at(FaultPoint::Write(1));
        fs.write(&root().join("a"), b"1").unwrap();
        fs.rename(&root().join("a"), &root().join("b")).unwrap();
        assert!(fs.write(&root().join("c"), b"2").is_err());
        assert!(!fs.exists(&root().join("c")));
    }

    #[test]
    fn full_commit_setup_plans_every_rename() {
        let (instance, faulty, mut tx) = CrashRecoveryHarness::full_commit_setup().unwrap();
        faulty.fail_at(FaultPoint::RenamesFrom(usize::MAX));
        instance.engine.commit(&mut tx).unwrap();
        assert_eq!(faulty.renames_seen(), FULL_COMMIT_RENAMES);
    }

    #[test]
    fn stage_write_failure_keeps_prepare() {
        let (instance, faulty) = faulty_instance(EngineConfig::default());
        let mut tx = instance
            .engine
            .prepare(TEST_INSTANCE, instance.root(), crate::fixtures::OP_EDIT)
            .unwrap();
        let before = instance.live_snapshot();

        faulty.fail_at(FaultPoint::Write(0));
        let err = instance.engine.stage(&mut tx).unwrap_err();
        assert!(matches!(err, CoreError::WriteFailed { .. }));
        assert_eq!(tx.phase, Phase::Prepare);
        assert_eq!(instance.live_snapshot(), before);
    }

    #[test]
    fn all_crash_recovery_scenarios() {
        let mut harness = CrashRecoveryHarness::new();
        harness.run_all_tests();
        println!("{}", harness.summary());
        assert_eq!(harness.results.len(), 2 * FULL_COMMIT_RENAMES + 4);
        assert!(harness.all_passed(), "{}", harness.summary());
    }
}
