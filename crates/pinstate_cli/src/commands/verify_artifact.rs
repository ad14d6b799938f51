//! Verify-artifact command implementation.

use super::parse_hash;
use pinstate_core::{ContentType, TransactionEngine};
use std::path::Path;

/// Runs the verify-artifact command.
pub fn run(
    engine: &TransactionEngine,
    root: &Path,
    hash: &str,
    content_type: ContentType,
) -> Result<(), Box<dyn std::error::Error>> {
    let hash_bytes = parse_hash(hash)?;
    match engine.artifacts().verify(root, &hash_bytes, content_type) {
        Ok(meta) => {
            println!("✓ Artifact verified");
            println!("  Hash: {}", hex::encode(&meta.hash_bytes));
            println!("  Type: {}", meta.content_type);
            println!("  Size: {} bytes", meta.size_bytes);
            println!("  Source: {}", meta.source);
            Ok(())
        }
        Err(err) => {
            println!("✗ Artifact verification failed");
            println!("  Condition: {}", err.code());
            println!("  Detail: {err}");
            Err("Verification failed".into())
        }
    }
}
