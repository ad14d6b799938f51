//! Recover command implementation.

use pinstate_core::{InstanceLayout, Recovery, TransactionEngine, TransactionRecord};
use std::path::{Path, PathBuf};

/// Runs the recover command.
pub fn run(
    engine: &TransactionEngine,
    root: &Path,
    instance: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match engine.recover_staging(instance, root)? {
        Recovery::Clean => println!("✓ Nothing staged for {instance}"),
        Recovery::Discarded { marker: Some(marker) } => {
            println!("✓ Discarded abandoned transaction");
            println!("  Transaction: {}", marker.tx_id);
            println!("  Phase: {}", marker.phase);
            println!("  Before: {}", marker.before_manifest_hash);
            println!("  After: {}", marker.after_manifest_hash);
            if let Some(archive) = restore_hint(root, instance, &marker)? {
                println!();
                println!("⚠ No live manifest: the commit was interrupted.");
                println!("  Restore the previous files from {}", archive.display());
            }
        }
        Recovery::Discarded { marker: None } => {
            println!("✓ Discarded abandoned transaction (marker unreadable)");
        }
    }
    Ok(())
}

/// Returns the archive to restore from when an interrupted commit left the
/// instance without a live manifest.
pub fn restore_hint(
    root: &Path,
    instance: &str,
    marker: &TransactionRecord,
) -> Result<Option<PathBuf>, Box<dyn std::error::Error>> {
    let layout = InstanceLayout::new(root, instance)?;
    if layout.manifest_path().exists() {
        return Ok(None);
    }
    Ok(Some(
        layout.archive_dir(marker.before_manifest_hash, marker.tx_id),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{init, open_engine};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn interrupted_commit_points_at_the_archive() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let engine = open_engine().unwrap();
        init::run(&engine, root, "demo", String::new(), String::new()).unwrap();

        let mut tx = engine.prepare("demo", root, 1).unwrap();
        engine.stage(&mut tx).unwrap();
        engine.verify(&mut tx).unwrap();
        engine.rollback(&mut tx).unwrap();
        assert_eq!(restore_hint(root, "demo", &tx).unwrap(), None);

        // The first commit rename moved the live manifest away, then the
        // process died.
        let layout = InstanceLayout::new(root, "demo").unwrap();
        let archive = layout.archive_dir(tx.before_manifest_hash, tx.tx_id);
        fs::create_dir_all(&archive).unwrap();
        fs::rename(layout.manifest_path(), archive.join("manifest.tlv")).unwrap();

        assert_eq!(restore_hint(root, "demo", &tx).unwrap(), Some(archive));
    }
}
