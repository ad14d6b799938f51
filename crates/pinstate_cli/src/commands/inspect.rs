//! Inspect command implementation.

use pinstate_core::{InstanceLayout, TransactionEngine};
use serde::Serialize;
use std::path::Path;

/// Instance inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Instance id.
    pub instance: String,
    /// Manifest schema version.
    pub schema_version: u32,
    /// Live manifest hash (hex).
    pub manifest_hash: String,
    /// Pinned engine build.
    pub engine_build: String,
    /// Pinned game build.
    pub game_build: String,
    /// Update policy flags.
    pub update_policy_flags: u32,
    /// Whether the live manifest is marked known-good.
    pub known_good: bool,
    /// Pinned content in canonical order.
    pub entries: Vec<EntryView>,
    /// Total verified payload size, if payload refs exist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_bytes: Option<u64>,
    /// Known-good pointer, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_good_pointer: Option<PointerView>,
    /// Archive directory names under `previous/`.
    pub archives: Vec<String>,
    /// Whether a transaction marker is sitting in staging.
    pub staged_transaction: bool,
}

/// One pinned entry.
#[derive(Debug, Serialize)]
pub struct EntryView {
    /// Content type.
    pub content_type: String,
    /// Content id.
    pub id: String,
    /// Version.
    pub version: String,
    /// Artifact hash (hex).
    pub hash: String,
    /// Whether the entry is enabled.
    pub enabled: bool,
    /// Load order position.
    pub order_index: u32,
    /// Verified size, if recorded in payload refs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// The known-good pointer.
#[derive(Debug, Serialize)]
pub struct PointerView {
    /// Manifest hash (hex).
    pub manifest_hash: String,
    /// Committing transaction.
    pub tx_id: u64,
    /// Snapshot directory relative to the instance.
    pub snapshot_dir: String,
}

/// Runs the inspect command.
pub fn run(
    engine: &TransactionEngine,
    root: &Path,
    instance: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(engine, root, instance)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Gathers the live state of `instance`.
pub fn collect(
    engine: &TransactionEngine,
    root: &Path,
    instance: &str,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let manifest = engine.load_manifest(root, instance)?;
    let refs = engine.load_payload_refs(root, instance)?;
    let pointer = engine.load_known_good(root, instance)?;
    let layout = InstanceLayout::new(root, instance)?;

    let entries = manifest
        .pinned_content
        .iter()
        .map(|entry| EntryView {
            content_type: entry.content_type.to_string(),
            id: entry.id.clone(),
            version: entry.version.clone(),
            hash: hex::encode(&entry.hash_bytes),
            enabled: entry.enabled,
            order_index: entry.order_index,
            size_bytes: refs
                .as_ref()
                .and_then(|r| r.find(entry.content_type, &entry.id))
                .map(|r| r.size_bytes),
        })
        .collect();

    Ok(InspectResult {
        instance: manifest.instance_id.clone(),
        schema_version: manifest.schema_version,
        manifest_hash: manifest.hash()?.to_string(),
        engine_build: manifest.pinned_engine_build_id.clone(),
        game_build: manifest.pinned_game_build_id.clone(),
        update_policy_flags: manifest.update_policy_flags,
        known_good: manifest.known_good == 1,
        entries,
        verified_bytes: refs.as_ref().map(|r| r.total_size()),
        known_good_pointer: pointer.map(|p| PointerView {
            manifest_hash: p.manifest_hash.to_string(),
            tx_id: p.tx_id.as_u64(),
            snapshot_dir: p.snapshot_dir,
        }),
        archives: engine.list_archives(root, instance)?,
        staged_transaction: layout.transaction_path().exists(),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Instance: {}", result.instance);
    println!("========================================");
    println!("Schema version: {}", result.schema_version);
    println!("Manifest hash:  {}", result.manifest_hash);
    println!("Engine build:   {}", display_or_dash(&result.engine_build));
    println!("Game build:     {}", display_or_dash(&result.game_build));
    println!("Policy flags:   {:#x}", result.update_policy_flags);
    println!("Known-good:     {}", if result.known_good { "yes" } else { "no" });
    println!();

    println!("Pinned content ({}):", result.entries.len());
    for entry in &result.entries {
        let state = if entry.enabled { "" } else { " (disabled)" };
        let size = entry
            .size_bytes
            .map(|s| format!(", {} bytes", format_number(s)))
            .unwrap_or_default();
        println!(
            "  [{}] {} {} {}{}{}",
            entry.order_index, entry.content_type, entry.id, entry.version, size, state
        );
    }
    if let Some(total) = result.verified_bytes {
        println!("  Verified payload: {} bytes", format_number(total));
    }
    println!();

    if let Some(pointer) = &result.known_good_pointer {
        println!("Known-good snapshot:");
        println!("  Manifest: {}", pointer.manifest_hash);
        println!("  Transaction: {}", pointer.tx_id);
        println!("  Directory: {}", pointer.snapshot_dir);
        println!();
    }

    println!("Archives ({}):", result.archives.len());
    for name in &result.archives {
        println!("  {name}");
    }

    if result.staged_transaction {
        println!();
        println!("⚠ A transaction is staged. Run `pinstate recover` if no process owns it.");
    }
}

fn display_or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_grouped() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
