//! Ingest command implementation.

use pinstate_core::{ContentType, TransactionEngine};
use std::fs;
use std::path::Path;

/// Runs the ingest command.
pub fn run(
    engine: &TransactionEngine,
    root: &Path,
    file: &Path,
    content_type: ContentType,
    source: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload = fs::read(file)?;
    let source = source.map_or_else(|| file.display().to_string(), str::to_string);
    let meta = engine.ingest_artifact(root, &payload, content_type, &source)?;

    println!("✓ Artifact stored");
    println!("  Hash: {}", hex::encode(&meta.hash_bytes));
    println!("  Type: {}", meta.content_type);
    println!("  Size: {} bytes", meta.size_bytes);
    Ok(())
}
