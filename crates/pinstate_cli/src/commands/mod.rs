//! CLI command implementations.

pub mod ingest;
pub mod init;
pub mod inspect;
pub mod pin;
pub mod recover;
pub mod verify_artifact;

use pinstate_core::{EngineConfig, TracingAuditSink, TransactionEngine};
use pinstate_storage::{OsFileSystem, SystemClock};
use std::sync::Arc;

/// Builds an engine on the real filesystem.
///
/// Audit lines go to the log under the `pinstate::audit` target. The
/// advisory lock is on so two CLI processes cannot interleave on one
/// instance.
pub fn open_engine() -> Result<TransactionEngine, Box<dyn std::error::Error>> {
    let engine = TransactionEngine::builder()
        .filesystem(Arc::new(OsFileSystem::new()))
        .clock(Arc::new(SystemClock))
        .audit_sink(Arc::new(TracingAuditSink))
        .config(EngineConfig::new().advisory_lock(true))
        .build()?;
    Ok(engine)
}

/// Parses a lowercase or uppercase hex artifact hash.
pub fn parse_hash(hash: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let bytes = hex::decode(hash.trim()).map_err(|e| format!("invalid hash {hash:?}: {e}"))?;
    if bytes.is_empty() {
        return Err("empty hash".into());
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hash_accepts_hex() {
        assert_eq!(parse_hash("ab01").unwrap(), vec![0xab, 0x01]);
        assert_eq!(parse_hash(" AB01\n").unwrap(), vec![0xab, 0x01]);
    }

    #[test]
    fn parse_hash_rejects_garbage() {
        assert!(parse_hash("xyz").is_err());
        assert!(parse_hash("").is_err());
    }
}
