//! The transaction engine.

use super::commit::CommitPlan;
use super::state::{Phase, TransactionRecord, TRANSACTION_SCHEMA_VERSION};
use crate::artifact::{ArtifactError, ArtifactMetadata, ArtifactStore};
use crate::audit::{AuditEvent, AuditSink};
use crate::config::EngineConfig;
use crate::error::{CoreError, CoreResult};
use crate::layout::{InstanceLayout, MANIFEST_FILE, PAYLOAD_REFS_FILE};
use crate::manifest::InstanceManifest;
use crate::refs::{KnownGoodPointer, PayloadRef, PayloadRefs};
use crate::schema::{RecordKind, SchemaRegistry};
use crate::types::{ContentType, ManifestHash, TxId};
use parking_lot::Mutex;
use pinstate_codec::{fnv1a64, Decode, Encode, UnknownFields};
use pinstate_storage::{Clock, FileLock, FileSystem, StorageError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome of [`TransactionEngine::recover_staging`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Nothing was staged.
    Clean,
    /// An abandoned transaction was discarded.
    Discarded {
        /// The abandoned marker, if it could be read.
        marker: Option<TransactionRecord>,
    },
}

/// Builder for [`TransactionEngine`].
///
/// The filesystem and clock are required; the audit sink is optional and
/// the schema registry defaults to [`SchemaRegistry::with_defaults`].
#[derive(Default)]
pub struct EngineBuilder {
    fs: Option<Arc<dyn FileSystem>>,
    clock: Option<Arc<dyn Clock>>,
    audit: Option<Arc<dyn AuditSink>>,
    schemas: Option<SchemaRegistry>,
    config: EngineConfig,
}

impl EngineBuilder {
    /// Sets the filesystem service.
    #[must_use]
    pub fn filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    /// Sets the time service.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the audit sink.
    #[must_use]
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Sets the schema registry.
    #[must_use]
    pub fn schema_registry(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = Some(schemas);
        self
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingServices`] if the filesystem or clock was
    /// not provided.
    pub fn build(self) -> CoreResult<TransactionEngine> {
        let fs = self.fs.ok_or(CoreError::MissingServices {
            service: "filesystem",
        })?;
        let clock = self
            .clock
            .ok_or(CoreError::MissingServices { service: "clock" })?;
        let artifacts = ArtifactStore::new(Arc::clone(&fs), self.config.hash_buffer_size);
        Ok(TransactionEngine {
            fs,
            clock,
            audit: self.audit,
            schemas: self.schemas.unwrap_or_else(SchemaRegistry::with_defaults),
            artifacts,
            config: self.config,
            last_tx_id: AtomicU64::new(0),
            locks: Mutex::new(HashMap::new()),
        })
    }
}

/// Crash-safe mutation engine for instance manifests.
///
/// A transaction moves through `prepare → stage → verify → commit`.
/// Live files are only ever changed by `commit`, through renames that are
/// undone in reverse if any of them fails. `rollback` and
/// `recover_staging` only ever delete staging files.
///
/// ## Usage
///
/// ```rust
/// use pinstate_core::{ContentType, ContentEntry, InstanceManifest, TransactionEngine};
/// use pinstate_storage::{InMemoryFileSystem, ManualClock};
/// use std::path::Path;
/// use std::sync::Arc;
///
/// let engine = TransactionEngine::builder()
///     .filesystem(Arc::new(InMemoryFileSystem::new()))
///     .clock(Arc::new(ManualClock::new(1_000)))
///     .build()
///     .unwrap();
/// let root = Path::new("/state");
///
/// engine.init_instance(root, &InstanceManifest::new("demo")).unwrap();
/// engine.recover_staging("demo", root).unwrap();
///
/// let payload = b"core pack";
/// let meta = engine.ingest_artifact(root, payload, ContentType::Pack, "doc").unwrap();
///
/// let mut tx = engine.prepare("demo", root, 1).unwrap();
/// tx.after_manifest.upsert_entry(ContentEntry::new(
///     ContentType::Pack,
///     "pack.core",
///     "1.1.0",
///     meta.hash_bytes,
/// ));
/// engine.stage(&mut tx).unwrap();
/// engine.verify(&mut tx).unwrap();
/// engine.commit(&mut tx).unwrap();
///
/// let live = engine.load_manifest(root, "demo").unwrap();
/// assert!(live.find_entry(ContentType::Pack, "pack.core").is_some());
/// ```
pub struct TransactionEngine {
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<dyn AuditSink>>,
    schemas: SchemaRegistry,
    artifacts: ArtifactStore,
    config: EngineConfig,
    /// Last minted transaction id.
    last_tx_id: AtomicU64,
    /// Advisory locks held by in-flight transactions, keyed by instance dir.
    locks: Mutex<HashMap<PathBuf, FileLock>>,
}

impl std::fmt::Debug for TransactionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionEngine")
            .field("config", &self.config)
            .field("schemas", &self.schemas)
            .field("has_audit_sink", &self.audit.is_some())
            .finish_non_exhaustive()
    }
}

impl TransactionEngine {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the artifact store the engine verifies against.
    #[must_use]
    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Returns the schema registry.
    #[must_use]
    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Discards an abandoned transaction left in staging by a prior run.
    ///
    /// Must run once per instance at process start, before any other
    /// operation on it. A no-op when nothing is staged. Never touches live
    /// files.
    ///
    /// With [`EngineConfig::advisory_lock`] the instance lock is taken for
    /// the duration of the call, so a transaction in flight elsewhere is
    /// reported as busy instead of being discarded.
    ///
    /// A process killed partway through the commit renames can leave the
    /// instance without a live manifest. Recovery does not move it back:
    /// the previous live files are in `previous/<before_hash>_<tx_id>/`,
    /// named by the returned marker, and must be restored from there by
    /// hand.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InstanceBusy`] if the lock is held, or an error
    /// if the instance id or state root is unusable or the transaction
    /// marker exists but cannot be deleted.
    pub fn recover_staging(&self, instance_id: &str, state_root: &Path) -> CoreResult<Recovery> {
        let result = self.recover_inner(instance_id, state_root);
        match &result {
            Ok(Recovery::Clean) => {
                self.audit(AuditEvent::ok("recover", Phase::None, instance_id).detail("clean"));
            }
            Ok(Recovery::Discarded { marker }) => {
                let mut event = AuditEvent::ok("recover", Phase::Done, instance_id);
                match marker {
                    Some(marker) => {
                        event = event
                            .tx(marker.tx_id)
                            .hash(marker.after_manifest_hash)
                            .detail(format!("discarded phase {}", marker.phase));
                    }
                    None => event = event.detail("discarded unreadable marker"),
                }
                self.audit(event);
            }
            Err(err) => self.audit(AuditEvent::failed("recover", Phase::None, instance_id, err)),
        }
        result
    }

    fn recover_inner(&self, instance_id: &str, state_root: &Path) -> CoreResult<Recovery> {
        let layout = InstanceLayout::new(state_root, instance_id)?;
        if !(self.config.advisory_lock && self.fs.is_dir(layout.instance_dir())) {
            return self.recover_locked(&layout);
        }

        self.acquire_lock(&layout)?;
        let result = self.recover_locked(&layout);
        self.release_lock(&layout);
        result
    }

    fn recover_locked(&self, layout: &InstanceLayout) -> CoreResult<Recovery> {
        let instance_id = layout.instance_id();
        let marker_path = layout.transaction_path();
        if !self.fs.exists(&marker_path) {
            tracing::debug!(instance = instance_id, "nothing staged");
            return Ok(Recovery::Clean);
        }

        let marker = match self.read_record::<TransactionRecord>(&marker_path) {
            Ok(marker) => Some(marker),
            Err(err) => {
                tracing::warn!(instance = instance_id, error = %err, "unreadable transaction marker");
                None
            }
        };

        self.discard_staging(layout)?;

        match &marker {
            Some(m) => {
                tracing::info!(
                    instance = instance_id,
                    tx = %m.tx_id,
                    phase = %m.phase,
                    "discarded abandoned transaction"
                );
                if !self.fs.exists(&layout.manifest_path()) {
                    let archive = layout.archive_dir(m.before_manifest_hash, m.tx_id);
                    tracing::warn!(
                        instance = instance_id,
                        archive = %archive.display(),
                        "no live manifest after an interrupted commit; restore it from the archive"
                    );
                }
            }
            None => tracing::info!(instance = instance_id, "discarded abandoned transaction"),
        }
        Ok(Recovery::Discarded { marker })
    }

    // ------------------------------------------------------------------
    // Phases
    // ------------------------------------------------------------------

    /// Starts a transaction bound to the instance's live manifest.
    ///
    /// Both `before_manifest` and `after_manifest` start as the live
    /// manifest. The marker is written to staging with phase `PREPARE`.
    ///
    /// Without [`EngineConfig::advisory_lock`], a second `prepare` on the
    /// same instance replaces the first one's marker.
    ///
    /// # Errors
    ///
    /// Fails without touching live files if the id is unsafe, the live
    /// manifest cannot be read, decoded or upgraded, the instance is
    /// locked, or the marker cannot be written.
    pub fn prepare(
        &self,
        instance_id: &str,
        state_root: &Path,
        op_type: u32,
    ) -> CoreResult<TransactionRecord> {
        match self.prepare_inner(instance_id, state_root, op_type) {
            Ok(tx) => {
                tracing::debug!(instance = instance_id, tx = %tx.tx_id, hash = %tx.before_manifest_hash, "prepared");
                self.audit(
                    AuditEvent::ok("prepare", Phase::Prepare, instance_id)
                        .tx(tx.tx_id)
                        .hash(tx.before_manifest_hash),
                );
                Ok(tx)
            }
            Err(err) => {
                self.audit(AuditEvent::failed("prepare", Phase::None, instance_id, &err));
                Err(err)
            }
        }
    }

    fn prepare_inner(
        &self,
        instance_id: &str,
        state_root: &Path,
        op_type: u32,
    ) -> CoreResult<TransactionRecord> {
        let layout = InstanceLayout::new(state_root, instance_id)?;
        // A missing instance dir fails below with ReadFailed.
        if self.config.advisory_lock && self.fs.is_dir(layout.instance_dir()) {
            self.acquire_lock(&layout)?;
        }

        let result = self.prepare_locked(&layout, state_root, op_type);
        if result.is_err() {
            self.release_lock(&layout);
        }
        result
    }

    fn prepare_locked(
        &self,
        layout: &InstanceLayout,
        state_root: &Path,
        op_type: u32,
    ) -> CoreResult<TransactionRecord> {
        let live = self.read_live_manifest(layout)?;
        let hash = live
            .hash()
            .map_err(|e| CoreError::encode_failed(layout.manifest_path(), e))?;

        let record = TransactionRecord {
            schema_version: TRANSACTION_SCHEMA_VERSION,
            tx_id: self.next_tx_id(),
            instance_id: layout.instance_id().to_string(),
            state_root: state_root.to_path_buf(),
            op_type,
            phase: Phase::Prepare,
            before_manifest_hash: hash,
            after_manifest_hash: hash,
            before_manifest: live.clone(),
            after_manifest: live,
            unknown: UnknownFields::default(),
        };

        let staging = layout.staging_dir();
        self.fs
            .create_dir_all(&staging)
            .map_err(|e| CoreError::write_failed(&staging, e))?;
        self.write_record(&layout.transaction_path(), &record)?;
        Ok(record)
    }

    /// Writes `tx.after_manifest` to staging and advances to `STAGE`.
    ///
    /// Staged files left by an earlier attempt are cleared first. On
    /// failure `tx` is left in `PREPARE`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BadPhase`] unless `tx` is in `PREPARE`,
    /// [`CoreError::StaleTransaction`] if the staging marker names another
    /// transaction, or an I/O or encode error naming the file.
    pub fn stage(&self, tx: &mut TransactionRecord) -> CoreResult<()> {
        let result = self.stage_inner(tx);
        self.audit_phase("stage", tx, &result);
        result
    }

    fn stage_inner(&self, tx: &mut TransactionRecord) -> CoreResult<()> {
        Self::expect_phase("stage", tx, Phase::Prepare)?;
        let layout = InstanceLayout::new(&tx.state_root, &tx.instance_id)?;
        self.ensure_current(&layout, tx)?;
        if tx.after_manifest.instance_id != tx.instance_id {
            return Err(CoreError::invalid_args(format!(
                "after manifest names instance {:?}, transaction is for {:?}",
                tx.after_manifest.instance_id, tx.instance_id
            )));
        }

        let staged_path = layout.staged_manifest_path();
        let bytes = tx
            .after_manifest
            .encode()
            .map_err(|e| CoreError::encode_failed(&staged_path, e))?;
        let after_hash = tx
            .after_manifest
            .hash()
            .map_err(|e| CoreError::encode_failed(&staged_path, e))?;

        if let Some((path, source)) = self.remove_staged_files(&layout).into_iter().next() {
            return Err(CoreError::write_failed(path, source));
        }
        self.fs
            .write(&staged_path, &bytes)
            .map_err(|e| CoreError::write_failed(&staged_path, e))?;

        let mut next = tx.clone();
        next.phase = Phase::Stage;
        next.after_manifest_hash = after_hash;
        self.write_record(&layout.transaction_path(), &next)?;

        tx.phase = Phase::Stage;
        tx.after_manifest_hash = after_hash;
        tracing::debug!(instance = %tx.instance_id, tx = %tx.tx_id, hash = %after_hash, "staged");
        Ok(())
    }

    /// Verifies every enabled entry of the staged manifest and advances to
    /// `VERIFY`.
    ///
    /// Writes the staged payload refs, and when the manifest is marked
    /// known-good, the staged known-good snapshot and pointer. Any single
    /// artifact failure aborts the phase before anything is written.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BadPhase`] unless `tx` is in `STAGE`,
    /// [`CoreError::StaleTransaction`] if the staging marker names another
    /// transaction, [`CoreError::VerifyFailed`] naming the first failing entry, or an I/O
    /// error naming the file.
    pub fn verify(&self, tx: &mut TransactionRecord) -> CoreResult<PayloadRefs> {
        let result = self.verify_inner(tx);
        self.audit_phase("verify", tx, &result);
        result
    }

    fn verify_inner(&self, tx: &mut TransactionRecord) -> CoreResult<PayloadRefs> {
        Self::expect_phase("verify", tx, Phase::Stage)?;
        let layout = InstanceLayout::new(&tx.state_root, &tx.instance_id)?;
        self.ensure_current(&layout, tx)?;

        let staged_path = layout.staged_manifest_path();
        let current = tx
            .after_manifest
            .hash()
            .map_err(|e| CoreError::encode_failed(&staged_path, e))?;
        if current != tx.after_manifest_hash {
            return Err(CoreError::invalid_args(
                "after manifest was modified after stage",
            ));
        }

        let mut refs = PayloadRefs::default();
        for entry in tx.after_manifest.enabled_entries() {
            let meta = self.verify_entry(tx, &entry.id, &entry.hash_bytes, entry.content_type)?;
            refs.entries.push(PayloadRef::for_entry(entry, meta.size_bytes));
        }

        let refs_path = layout.staged_payload_refs_path();
        self.write_record(&refs_path, &refs)?;

        if tx.after_manifest.known_good == 1 {
            self.stage_known_good(&layout, tx, &refs)?;
        }

        let mut next = tx.clone();
        next.phase = Phase::Verify;
        self.write_record(&layout.transaction_path(), &next)?;

        tx.phase = Phase::Verify;
        tracing::debug!(
            instance = %tx.instance_id,
            tx = %tx.tx_id,
            entries = refs.entries.len(),
            "verified"
        );
        Ok(refs)
    }

    fn verify_entry(
        &self,
        tx: &TransactionRecord,
        entry_id: &str,
        hash_bytes: &[u8],
        content_type: ContentType,
    ) -> CoreResult<ArtifactMetadata> {
        let result = self
            .artifacts
            .verify(&tx.state_root, hash_bytes, content_type)
            .map_err(|source| CoreError::VerifyFailed {
                entry: entry_id.to_string(),
                source,
            })
            .and_then(|meta| {
                self.schemas
                    .check(RecordKind::ArtifactMetadata, meta.schema_version)?;
                Ok(meta)
            });

        if let Err(err) = &result {
            tracing::warn!(instance = %tx.instance_id, entry = entry_id, error = %err, "artifact rejected");
            self.audit(
                AuditEvent::failed("verify_entry", tx.phase, &tx.instance_id, err)
                    .tx(tx.tx_id)
                    .hash(tx.after_manifest_hash),
            );
        }
        result
    }

    fn stage_known_good(
        &self,
        layout: &InstanceLayout,
        tx: &TransactionRecord,
        refs: &PayloadRefs,
    ) -> CoreResult<()> {
        let snapshot = layout.snapshot_dir();
        self.fs
            .create_dir_all(&snapshot)
            .map_err(|e| CoreError::write_failed(&snapshot, e))?;
        self.write_record(&snapshot.join(MANIFEST_FILE), &tx.after_manifest)?;
        self.write_record(&snapshot.join(PAYLOAD_REFS_FILE), refs)?;

        let pointer = KnownGoodPointer::new(
            tx.after_manifest_hash,
            tx.tx_id,
            InstanceLayout::known_good_archive_rel(tx.after_manifest_hash, tx.tx_id),
        );
        self.write_record(&layout.staged_known_good_path(), &pointer)
    }

    /// Swaps the staged files into the live location and finishes the
    /// transaction.
    ///
    /// The previous live files are archived under
    /// `previous/<before_hash>_<tx_id>/`. If any rename fails, every rename
    /// already done is reversed and `tx` stays in `VERIFY`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BadPhase`] unless `tx` is in `VERIFY`,
    /// [`CoreError::StaleTransaction`] if the staging marker names another
    /// transaction, [`CoreError::MissingStagedFile`] if a staged file is
    /// gone, [`CoreError::StagedManifestMismatch`] if the staged manifest
    /// is not the one `stage` wrote, or [`CoreError::CommitFailed`] naming
    /// the failed step. Nothing is renamed in any of these cases except
    /// the last.
    pub fn commit(&self, tx: &mut TransactionRecord) -> CoreResult<()> {
        let result = self.commit_inner(tx);
        self.audit_phase("commit", tx, &result);
        result
    }

    fn commit_inner(&self, tx: &mut TransactionRecord) -> CoreResult<()> {
        Self::expect_phase("commit", tx, Phase::Verify)?;
        let layout = InstanceLayout::new(&tx.state_root, &tx.instance_id)?;
        self.ensure_current(&layout, tx)?;

        for staged in [layout.staged_manifest_path(), layout.staged_payload_refs_path()] {
            if !self.fs.exists(&staged) {
                return Err(CoreError::MissingStagedFile { file: staged });
            }
        }
        let staged_path = layout.staged_manifest_path();
        let staged_bytes = self
            .fs
            .read(&staged_path)
            .map_err(|e| CoreError::read_failed(&staged_path, e))?;
        let found = ManifestHash::new(fnv1a64(&staged_bytes));
        if found != tx.after_manifest_hash {
            return Err(CoreError::StagedManifestMismatch {
                expected: tx.after_manifest_hash,
                found,
            });
        }

        let archive = layout.archive_dir(tx.before_manifest_hash, tx.tx_id);
        self.fs
            .create_dir_all(&archive)
            .map_err(|e| CoreError::write_failed(&archive, e))?;

        let plan = CommitPlan::build(
            self.fs.as_ref(),
            &layout,
            tx.before_manifest_hash,
            tx.after_manifest_hash,
            tx.tx_id,
        );
        if let Err(err) = plan.execute(self.fs.as_ref()) {
            self.prune_dir(&archive);
            self.prune_dir(&layout.previous_dir());
            return Err(err);
        }

        if self.config.sync_dirs {
            for dir in [layout.instance_dir().to_path_buf(), archive] {
                if let Err(err) = self.fs.sync_dir(&dir) {
                    tracing::warn!(dir = %dir.display(), error = %err, "directory sync failed");
                }
            }
        }

        let marker = layout.transaction_path();
        if let Err(err) = self.fs.remove_file(&marker) {
            tracing::warn!(file = %marker.display(), error = %err, "could not remove transaction marker");
        }
        self.remove_empty_staging(&layout);
        self.release_lock(&layout);

        tx.phase = Phase::Done;
        tracing::info!(
            instance = %tx.instance_id,
            tx = %tx.tx_id,
            before = %tx.before_manifest_hash,
            after = %tx.after_manifest_hash,
            renames = plan.moves().len(),
            "committed"
        );
        Ok(())
    }

    /// Abandons the transaction, deleting its staging files.
    ///
    /// Never touches live files. Deletions are best-effort. Rolling back a
    /// finished transaction, or one whose marker has been replaced by a
    /// newer `prepare`, only marks `tx` as `DONE` and leaves staging alone.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BadPhase`] if `tx` was never prepared.
    pub fn rollback(&self, tx: &mut TransactionRecord) -> CoreResult<()> {
        let result = self.rollback_inner(tx);
        self.audit_phase("rollback", tx, &result);
        result
    }

    fn rollback_inner(&self, tx: &mut TransactionRecord) -> CoreResult<()> {
        if tx.phase == Phase::None {
            return Err(CoreError::BadPhase {
                op: "rollback",
                expected: Phase::Prepare,
                actual: Phase::None,
            });
        }
        if tx.is_finished() {
            return Ok(());
        }

        let layout = InstanceLayout::new(&tx.state_root, &tx.instance_id)?;
        match self.staged_tx_id(&layout) {
            Ok(Some(staged)) if staged != tx.tx_id => {
                tracing::info!(
                    instance = %tx.instance_id,
                    tx = %tx.tx_id,
                    staged = %staged,
                    "stale handle rolled back, staging left to its owner"
                );
                tx.phase = Phase::Done;
                return Ok(());
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(instance = %tx.instance_id, error = %err, "unreadable transaction marker");
            }
        }
        if let Err(err) = self.discard_staging(&layout) {
            tracing::warn!(instance = %tx.instance_id, error = %err, "rollback left staging files behind");
        }
        self.release_lock(&layout);

        let from = tx.phase;
        tx.phase = Phase::Done;
        tracing::info!(instance = %tx.instance_id, tx = %tx.tx_id, from = %from, "rolled back");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bootstrap and live reads
    // ------------------------------------------------------------------

    /// Writes the first live manifest for `manifest.instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InstanceExists`] if a live manifest is already
    /// present, or an I/O error naming the file.
    pub fn init_instance(
        &self,
        state_root: &Path,
        manifest: &InstanceManifest,
    ) -> CoreResult<ManifestHash> {
        let instance_id = manifest.instance_id.as_str();
        let result = self.init_inner(state_root, manifest);
        match &result {
            Ok(hash) => self.audit(AuditEvent::ok("init", Phase::None, instance_id).hash(*hash)),
            Err(err) => self.audit(AuditEvent::failed("init", Phase::None, instance_id, err)),
        }
        result
    }

    fn init_inner(&self, state_root: &Path, manifest: &InstanceManifest) -> CoreResult<ManifestHash> {
        let layout = InstanceLayout::new(state_root, &manifest.instance_id)?;
        let live = layout.manifest_path();
        if self.fs.exists(&live) {
            return Err(CoreError::InstanceExists {
                instance_id: manifest.instance_id.clone(),
            });
        }

        let dir = layout.instance_dir();
        self.fs
            .create_dir_all(dir)
            .map_err(|e| CoreError::write_failed(dir, e))?;

        let temp = layout.manifest_temp_path();
        self.write_record(&temp, manifest)?;
        self.fs
            .rename(&temp, &live)
            .map_err(|e| CoreError::write_failed(&live, e))?;
        if self.config.sync_dirs {
            if let Err(err) = self.fs.sync_dir(dir) {
                tracing::warn!(dir = %dir.display(), error = %err, "directory sync failed");
            }
        }

        let hash = manifest
            .hash()
            .map_err(|e| CoreError::encode_failed(&live, e))?;
        tracing::info!(instance = %manifest.instance_id, hash = %hash, "instance initialized");
        Ok(hash)
    }

    /// Reads, checks and upgrades the live manifest.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReadFailed`] if there is no live manifest.
    pub fn load_manifest(&self, state_root: &Path, instance_id: &str) -> CoreResult<InstanceManifest> {
        let layout = InstanceLayout::new(state_root, instance_id)?;
        self.read_live_manifest(&layout)
    }

    /// Reads the live payload refs, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn load_payload_refs(
        &self,
        state_root: &Path,
        instance_id: &str,
    ) -> CoreResult<Option<PayloadRefs>> {
        let layout = InstanceLayout::new(state_root, instance_id)?;
        let refs = self.read_optional_record::<PayloadRefs>(&layout.payload_refs_path())?;
        if let Some(refs) = &refs {
            self.schemas
                .check(RecordKind::PayloadRefs, refs.schema_version)?;
        }
        Ok(refs)
    }

    /// Reads the live known-good pointer, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn load_known_good(
        &self,
        state_root: &Path,
        instance_id: &str,
    ) -> CoreResult<Option<KnownGoodPointer>> {
        let layout = InstanceLayout::new(state_root, instance_id)?;
        let pointer = self.read_optional_record::<KnownGoodPointer>(&layout.known_good_path())?;
        if let Some(pointer) = &pointer {
            self.schemas
                .check(RecordKind::KnownGood, pointer.schema_version)?;
        }
        Ok(pointer)
    }

    /// Lists the entries of `previous/`, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be listed.
    pub fn list_archives(&self, state_root: &Path, instance_id: &str) -> CoreResult<Vec<String>> {
        let layout = InstanceLayout::new(state_root, instance_id)?;
        let previous = layout.previous_dir();
        if !self.fs.is_dir(&previous) {
            return Ok(Vec::new());
        }
        self.fs
            .list_dir(&previous)
            .map_err(|e| CoreError::read_failed(&previous, e))
    }

    /// Stores `payload` in the artifact store, stamped with the engine clock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WriteFailed`] if the artifact cannot be stored.
    pub fn ingest_artifact(
        &self,
        state_root: &Path,
        payload: &[u8],
        content_type: ContentType,
        source: &str,
    ) -> CoreResult<ArtifactMetadata> {
        if state_root.as_os_str().is_empty() {
            return Err(CoreError::StateRootUnavailable);
        }
        self.artifacts
            .ingest(state_root, payload, content_type, source, self.clock.now_us())
            .map_err(|e| match e {
                ArtifactError::Storage(source) => {
                    CoreError::write_failed(state_root.join("artifacts"), source)
                }
                other => CoreError::invalid_args(other.to_string()),
            })
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn expect_phase(op: &'static str, tx: &TransactionRecord, expected: Phase) -> CoreResult<()> {
        if tx.phase != expected {
            return Err(CoreError::BadPhase {
                op,
                expected,
                actual: tx.phase,
            });
        }
        Ok(())
    }

    fn next_tx_id(&self) -> TxId {
        let now = self.clock.now_us();
        let mut last = self.last_tx_id.load(Ordering::SeqCst);
        loop {
            let next = now.max(last.saturating_add(1));
            match self
                .last_tx_id
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return TxId::new(next),
                Err(actual) => last = actual,
            }
        }
    }

    fn read_live_manifest(&self, layout: &InstanceLayout) -> CoreResult<InstanceManifest> {
        let path = layout.manifest_path();
        let mut manifest = self.read_record::<InstanceManifest>(&path)?;
        self.schemas.upgrade_manifest(&mut manifest)?;
        if manifest.instance_id != layout.instance_id() {
            return Err(CoreError::invalid_args(format!(
                "live manifest names instance {:?}, expected {:?}",
                manifest.instance_id,
                layout.instance_id()
            )));
        }
        Ok(manifest)
    }

    fn read_record<T: Decode>(&self, path: &Path) -> CoreResult<T> {
        let bytes = self
            .fs
            .read(path)
            .map_err(|e| CoreError::read_failed(path, e))?;
        T::decode(&bytes).map_err(|e| CoreError::decode_failed(path, e))
    }

    fn read_optional_record<T: Decode>(&self, path: &Path) -> CoreResult<Option<T>> {
        match self.fs.read(path) {
            Ok(bytes) => T::decode(&bytes)
                .map(Some)
                .map_err(|e| CoreError::decode_failed(path, e)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(CoreError::read_failed(path, err)),
        }
    }

    fn write_record<T: Encode>(&self, path: &Path, record: &T) -> CoreResult<()> {
        let bytes = record
            .encode()
            .map_err(|e| CoreError::encode_failed(path, e))?;
        self.fs
            .write(path, &bytes)
            .map_err(|e| CoreError::write_failed(path, e))
    }

    /// Returns the transaction id named by the staging marker, if any.
    fn staged_tx_id(&self, layout: &InstanceLayout) -> CoreResult<Option<TxId>> {
        let marker =
            self.read_optional_record::<TransactionRecord>(&layout.transaction_path())?;
        Ok(marker.map(|m| m.tx_id))
    }

    /// Fails unless the staging marker names `tx`.
    fn ensure_current(&self, layout: &InstanceLayout, tx: &TransactionRecord) -> CoreResult<()> {
        match self.staged_tx_id(layout)? {
            Some(staged) if staged == tx.tx_id => Ok(()),
            staged => Err(CoreError::StaleTransaction {
                instance_id: tx.instance_id.clone(),
                tx_id: tx.tx_id,
                staged,
            }),
        }
    }

    /// Removes staged files other than the marker. Returns every failure.
    fn remove_staged_files(&self, layout: &InstanceLayout) -> Vec<(PathBuf, StorageError)> {
        let mut failures = Vec::new();
        for path in layout.staged_files() {
            match self.fs.remove_file(&path) {
                Ok(()) => tracing::debug!(file = %path.display(), "removed staged file"),
                Err(err) if err.is_not_found() => {}
                Err(err) => failures.push((path, err)),
            }
        }
        let snapshot = layout.snapshot_dir();
        if self.fs.is_dir(&snapshot) {
            if let Err(err) = self.fs.remove_dir(&snapshot) {
                failures.push((snapshot, err));
            }
        }
        failures
    }

    /// Deletes every staging file, marker last.
    fn discard_staging(&self, layout: &InstanceLayout) -> CoreResult<()> {
        for (path, err) in self.remove_staged_files(layout) {
            tracing::warn!(file = %path.display(), error = %err, "could not remove staged file");
        }

        let marker = layout.transaction_path();
        match self.fs.remove_file(&marker) {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(CoreError::write_failed(marker, err)),
        }
        self.remove_empty_staging(layout);
        Ok(())
    }

    fn remove_empty_staging(&self, layout: &InstanceLayout) {
        let snapshot = layout.snapshot_dir();
        if self.fs.is_dir(&snapshot) {
            self.prune_dir(&snapshot);
        }
        if self.config.prune_empty_dirs {
            self.prune_dir(&layout.staging_dir());
        }
    }

    /// Removes `dir` if it exists and is empty. Failures are logged only.
    fn prune_dir(&self, dir: &Path) {
        if !self.fs.is_dir(dir) {
            return;
        }
        match self.fs.remove_dir(dir) {
            Ok(()) => tracing::debug!(dir = %dir.display(), "pruned empty directory"),
            Err(StorageError::DirectoryNotEmpty(_)) => {}
            Err(err) => {
                tracing::warn!(dir = %dir.display(), error = %err, "could not prune directory");
            }
        }
    }

    fn acquire_lock(&self, layout: &InstanceLayout) -> CoreResult<()> {
        let key = layout.instance_dir().to_path_buf();
        let mut locks = self.locks.lock();
        if locks.contains_key(&key) {
            return Err(CoreError::InstanceBusy {
                instance_id: layout.instance_id().to_string(),
            });
        }
        let lock_path = layout.lock_path();
        match self.fs.lock_exclusive(&lock_path) {
            Ok(lock) => {
                locks.insert(key, lock);
                Ok(())
            }
            Err(StorageError::Locked(_)) => Err(CoreError::InstanceBusy {
                instance_id: layout.instance_id().to_string(),
            }),
            Err(err) => Err(CoreError::write_failed(lock_path, err)),
        }
    }

    fn release_lock(&self, layout: &InstanceLayout) {
        if self.locks.lock().remove(layout.instance_dir()).is_some() {
            tracing::debug!(instance = layout.instance_id(), "advisory lock released");
        }
    }

    fn audit(&self, event: AuditEvent<'_>) {
        if let Some(sink) = &self.audit {
            sink.record(&event.to_string());
        }
    }

    fn audit_phase<T>(&self, op: &'static str, tx: &TransactionRecord, result: &CoreResult<T>) {
        let event = match result {
            Ok(_) => AuditEvent::ok(op, tx.phase, &tx.instance_id),
            Err(err) => AuditEvent::failed(op, tx.phase, &tx.instance_id, err),
        };
        self.audit(event.tx(tx.tx_id).hash(tx.after_manifest_hash));
    }
}
