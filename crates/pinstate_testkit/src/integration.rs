//! Cross-crate integration test helpers.
//!
//! Provides whole-transaction drivers and checks on the archived state a
//! commit leaves behind.

use crate::fixtures::TestInstance;
use pinstate_codec::Decode;
use pinstate_core::{
    ContentEntry, ContentType, CoreError, CoreResult, InstanceManifest, PayloadRefs, Phase,
    TransactionEngine, TransactionRecord, MANIFEST_SCHEMA_VERSION,
};
use std::path::Path;

/// Runs `prepare → edit → stage → verify → commit` on one instance.
///
/// Any failure after `prepare` rolls the transaction back before the error
/// is returned, so the instance is left with no staging files.
///
/// # Errors
///
/// Returns the first error any phase reports.
pub fn run_transaction<F>(
    engine: &TransactionEngine,
    state_root: &Path,
    instance_id: &str,
    op_type: u32,
    edit: F,
) -> CoreResult<TransactionRecord>
where
    F: FnOnce(&mut InstanceManifest),
{
    let mut tx = engine.prepare(instance_id, state_root, op_type)?;
    edit(&mut tx.after_manifest);

    let result = (|| -> CoreResult<()> {
        engine.stage(&mut tx)?;
        engine.verify(&mut tx)?;
        engine.commit(&mut tx)
    })();
    match result {
        Ok(()) => Ok(tx),
        Err(err) => {
            // Rollback of a prepared transaction only fails on phase errors.
            let _ = engine.rollback(&mut tx);
            Err(err)
        }
    }
}

/// Reads the manifest a finished transaction archived.
pub fn archived_manifest(instance: &TestInstance, tx: &TransactionRecord) -> InstanceManifest {
    let path = instance
        .layout()
        .archive_dir(tx.before_manifest_hash, tx.tx_id)
        .join("manifest.tlv");
    let bytes = instance.fs.read(&path).expect("Archived manifest is readable");
    InstanceManifest::decode(&bytes).expect("Archived manifest decodes")
}

/// Reads the live payload refs, panicking if they are absent.
pub fn live_payload_refs(instance: &TestInstance) -> PayloadRefs {
    instance
        .engine
        .load_payload_refs(instance.root(), crate::fixtures::TEST_INSTANCE)
        .expect("Payload refs are readable")
        .expect("Payload refs are present")
}

/// Cross-crate checks run against a live instance.
pub mod checks {
    use super::*;

    /// Tests that a committed manifest becomes live and the old one is
    /// archived.
    pub fn test_commit_archives_previous(instance: &TestInstance) {
        let before = instance.live_manifest();
        let entry = instance.ingest_pack("pack.archived", b"archived-payload");
        let tx = instance.pin(entry).expect("Failed to pin");

        assert_eq!(tx.phase, Phase::Done);
        assert_eq!(archived_manifest(instance, &tx), before);
        assert_eq!(instance.live_manifest(), tx.after_manifest);
        assert!(instance.staging_snapshot().is_empty());
    }

    /// Tests that a failed verify leaves live state alone and clears staging.
    pub fn test_failed_verify_is_isolated(instance: &TestInstance) {
        let before = instance.live_snapshot();
        let err = instance
            .transact(|manifest| {
                manifest.upsert_entry(ContentEntry::new(
                    ContentType::Mod,
                    "mod.missing",
                    "1.0.0",
                    vec![0xab; 32],
                ));
            })
            .expect_err("Verify should fail for a missing artifact");

        assert!(matches!(err, CoreError::VerifyFailed { .. }));
        assert_eq!(instance.live_snapshot(), before);
        assert!(instance.staging_snapshot().is_empty());
    }

    /// Tests that live state is always a manifest this build can read.
    pub fn test_live_manifest_is_current(instance: &TestInstance) {
        let manifest = instance.live_manifest();
        assert_eq!(manifest.schema_version, MANIFEST_SCHEMA_VERSION);
        assert_eq!(manifest.instance_id, crate::fixtures::TEST_INSTANCE);
    }
}
