//! Init command implementation.

use pinstate_core::{InstanceManifest, TransactionEngine};
use std::path::Path;

/// Runs the init command.
pub fn run(
    engine: &TransactionEngine,
    root: &Path,
    instance: &str,
    engine_build: String,
    game_build: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut manifest = InstanceManifest::new(instance);
    manifest.pinned_engine_build_id = engine_build;
    manifest.pinned_game_build_id = game_build;

    let hash = engine.init_instance(root, &manifest)?;

    println!("✓ Instance created");
    println!("  Instance: {instance}");
    println!("  Manifest hash: {hash}");
    Ok(())
}
