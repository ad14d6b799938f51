//! Pin and unpin commands.
//!
//! Both run a complete transaction: recover, prepare, edit, stage, verify,
//! commit. Any failure before commit rolls the transaction back; a failed
//! commit has already restored the live files itself.

use super::parse_hash;
use pinstate_core::{ContentEntry, ContentType, TransactionEngine, TransactionRecord};
use std::path::Path;
use tracing::info;

/// Op type recorded for pin transactions.
pub const OP_PIN: u32 = 1;
/// Op type recorded for unpin transactions.
pub const OP_UNPIN: u32 = 2;

/// Content to pin.
#[derive(Debug, Clone)]
pub struct PinRequest {
    /// Content type.
    pub content_type: ContentType,
    /// Content id.
    pub id: String,
    /// Version string.
    pub version: String,
    /// Artifact hash (hex).
    pub hash: String,
    /// Load order position; appended when absent.
    pub order: Option<u32>,
    /// Mark the manifest known-good.
    pub known_good: bool,
}

/// Pins content into `instance`.
pub fn pin(
    engine: &TransactionEngine,
    root: &Path,
    instance: &str,
    request: PinRequest,
) -> Result<(), Box<dyn std::error::Error>> {
    let hash_bytes = parse_hash(&request.hash)?;
    let tx = run_transaction(engine, root, instance, OP_PIN, |tx| {
        let manifest = &mut tx.after_manifest;
        let order = request
            .order
            .or_else(|| {
                manifest
                    .find_entry(request.content_type, &request.id)
                    .map(|e| e.order_index)
            })
            .unwrap_or_else(|| manifest.next_order_index());
        let entry = ContentEntry::new(
            request.content_type,
            request.id.clone(),
            request.version.clone(),
            hash_bytes.clone(),
        )
        .with_order_index(order);
        manifest.upsert_entry(entry);
        manifest.known_good = u32::from(request.known_good);
        Ok(())
    })?;

    println!("✓ Pinned {} {} {}", request.content_type, request.id, request.version);
    println!("  Transaction: {}", tx.tx_id);
    println!("  Manifest: {} -> {}", tx.before_manifest_hash, tx.after_manifest_hash);
    Ok(())
}

/// Removes content from `instance`.
pub fn unpin(
    engine: &TransactionEngine,
    root: &Path,
    instance: &str,
    content_type: ContentType,
    id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let tx = run_transaction(engine, root, instance, OP_UNPIN, |tx| {
        if tx.after_manifest.remove_entry(content_type, id).is_none() {
            return Err(format!("{content_type} {id} is not pinned").into());
        }
        tx.after_manifest.known_good = 0;
        Ok(())
    })?;

    println!("✓ Unpinned {content_type} {id}");
    println!("  Transaction: {}", tx.tx_id);
    println!("  Manifest: {} -> {}", tx.before_manifest_hash, tx.after_manifest_hash);
    Ok(())
}

fn run_transaction<F>(
    engine: &TransactionEngine,
    root: &Path,
    instance: &str,
    op_type: u32,
    edit: F,
) -> Result<TransactionRecord, Box<dyn std::error::Error>>
where
    F: FnOnce(&mut TransactionRecord) -> Result<(), Box<dyn std::error::Error>>,
{
    engine.recover_staging(instance, root)?;
    let mut tx = engine.prepare(instance, root, op_type)?;

    let staged = edit(&mut tx).and_then(|()| {
        engine.stage(&mut tx)?;
        engine.verify(&mut tx)?;
        Ok(())
    });
    if let Err(err) = staged {
        engine.rollback(&mut tx)?;
        return Err(err);
    }

    if let Err(err) = engine.commit(&mut tx) {
        engine.rollback(&mut tx)?;
        return Err(err.into());
    }
    info!(instance, tx = %tx.tx_id, "transaction committed");
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{init, inspect, open_engine};
    use tempfile::tempdir;

    #[test]
    fn pin_then_unpin_on_disk() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let engine = open_engine().unwrap();
        init::run(&engine, root, "demo", "engine-1".into(), String::new()).unwrap();

        let meta = engine
            .ingest_artifact(root, b"core pack", ContentType::Pack, "test")
            .unwrap();
        let request = PinRequest {
            content_type: ContentType::Pack,
            id: "pack.core".into(),
            version: "1.1.0".into(),
            hash: hex::encode(&meta.hash_bytes),
            order: None,
            known_good: true,
        };
        pin(&engine, root, "demo", request).unwrap();

        let state = inspect::collect(&engine, root, "demo").unwrap();
        assert_eq!(state.entries.len(), 1);
        assert_eq!(state.entries[0].size_bytes, Some(9));
        assert!(state.known_good_pointer.is_some());
        assert!(!state.staged_transaction);
        assert_eq!(state.archives.len(), 2);

        unpin(&engine, root, "demo", ContentType::Pack, "pack.core").unwrap();
        let state = inspect::collect(&engine, root, "demo").unwrap();
        assert!(state.entries.is_empty());
        assert!(!state.known_good);
    }

    #[test]
    fn failed_verify_rolls_back() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let engine = open_engine().unwrap();
        init::run(&engine, root, "demo", String::new(), String::new()).unwrap();
        let before = inspect::collect(&engine, root, "demo").unwrap();

        let request = PinRequest {
            content_type: ContentType::Pack,
            id: "ghost".into(),
            version: "0.0.1".into(),
            hash: "00ff".into(),
            order: Some(3),
            known_good: false,
        };
        assert!(pin(&engine, root, "demo", request).is_err());

        let after = inspect::collect(&engine, root, "demo").unwrap();
        assert_eq!(after.manifest_hash, before.manifest_hash);
        assert!(!after.staged_transaction);
        assert!(after.archives.is_empty());
    }

    #[test]
    fn unpin_missing_entry_fails_cleanly() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let engine = open_engine().unwrap();
        init::run(&engine, root, "demo", String::new(), String::new()).unwrap();

        assert!(unpin(&engine, root, "demo", ContentType::Mod, "nope").is_err());
        assert!(!inspect::collect(&engine, root, "demo")
            .unwrap()
            .staged_transaction);
    }
}
