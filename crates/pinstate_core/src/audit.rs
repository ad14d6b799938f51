//! Audit trail for engine operations.
//!
//! Each engine operation produces one [`AuditEvent`], rendered as a single
//! line:
//!
//! ```text
//! op=commit phase=DONE instance=demo tx=1700000000000000 hash=9ae1c2d3e4f50617 result=ok
//! ```
//!
//! Sinks are optional. The engine behaves identically with or without one.

use crate::error::CoreError;
use crate::transaction::Phase;
use crate::types::{ManifestHash, TxId};
use parking_lot::Mutex;
use std::fmt;

/// Receives rendered audit lines.
pub trait AuditSink: Send + Sync {
    /// Records one line.
    fn record(&self, line: &str);
}

/// One audited engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent<'a> {
    /// Operation name.
    pub op: &'static str,
    /// Phase after the operation.
    pub phase: Phase,
    /// Instance id.
    pub instance_id: &'a str,
    /// Transaction id, if any.
    pub tx_id: Option<TxId>,
    /// Most relevant manifest hash.
    pub hash: Option<ManifestHash>,
    /// `ok` or an error code.
    pub result: &'static str,
    /// Free-form detail.
    pub detail: Option<String>,
}

impl<'a> AuditEvent<'a> {
    /// Creates a successful event.
    #[must_use]
    pub fn ok(op: &'static str, phase: Phase, instance_id: &'a str) -> Self {
        Self {
            op,
            phase,
            instance_id,
            tx_id: None,
            hash: None,
            result: "ok",
            detail: None,
        }
    }

    /// Creates an event describing `error`.
    #[must_use]
    pub fn failed(op: &'static str, phase: Phase, instance_id: &'a str, error: &CoreError) -> Self {
        Self {
            result: error.code(),
            detail: Some(error.to_string()),
            ..Self::ok(op, phase, instance_id)
        }
    }

    /// Sets the transaction id.
    #[must_use]
    pub fn tx(mut self, tx_id: TxId) -> Self {
        self.tx_id = Some(tx_id);
        self
    }

    /// Sets the manifest hash.
    #[must_use]
    pub fn hash(mut self, hash: ManifestHash) -> Self {
        self.hash = Some(hash);
        self
    }

    /// Sets the detail text.
    #[must_use]
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for AuditEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "op={} phase={} instance={}",
            self.op, self.phase, self.instance_id
        )?;
        match self.tx_id {
            Some(tx) => write!(f, " tx={tx}")?,
            None => f.write_str(" tx=-")?,
        }
        match self.hash {
            Some(hash) => write!(f, " hash={hash}")?,
            None => f.write_str(" hash=-")?,
        }
        write!(f, " result={}", self.result)?;
        if let Some(detail) = &self.detail {
            write!(f, " detail={detail}")?;
        }
        Ok(())
    }
}

/// Audit sink that keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryAuditLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every recorded line.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Returns true if any line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }

    /// Discards all recorded lines.
    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

/// Audit sink that forwards lines to `tracing` under the `pinstate::audit`
/// target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, line: &str) {
        tracing::info!(target: "pinstate::audit", "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_full_line() {
        let event = AuditEvent::ok("commit", Phase::Done, "demo")
            .tx(TxId::new(42))
            .hash(ManifestHash::new(0xabc));
        assert_eq!(
            event.to_string(),
            "op=commit phase=DONE instance=demo tx=42 hash=0000000000000abc result=ok"
        );
    }

    #[test]
    fn renders_failure_with_detail() {
        let err = CoreError::StateRootUnavailable;
        let line = AuditEvent::failed("prepare", Phase::None, "demo", &err).to_string();
        assert!(line.starts_with("op=prepare phase=NONE instance=demo tx=- hash=-"));
        assert!(line.contains("result=state_root_unavailable"));
        assert!(line.contains("detail=state root unavailable"));
    }

    #[test]
    fn memory_log_collects() {
        let log = MemoryAuditLog::new();
        log.record("op=a");
        log.record("op=b");
        assert_eq!(log.lines(), vec!["op=a", "op=b"]);
        assert!(log.contains("op=b"));
        log.clear();
        assert!(log.lines().is_empty());
    }
}
