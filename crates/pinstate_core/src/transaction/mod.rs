//! Transactional mutation of instance manifests.
//!
//! A transaction moves strictly forward through
//! `NONE → PREPARE → STAGE → VERIFY → DONE`:
//! - **prepare** binds a [`TransactionRecord`] to the live manifest
//! - **stage** writes the proposed manifest to the staging area
//! - **verify** re-hashes every referenced artifact and writes payload refs
//! - **commit** renames staged files into place, archiving the old ones
//!
//! `rollback` and `recover_staging` discard staging and never touch live
//! files.

mod commit;
mod engine;
mod state;

pub use commit::CommitStep;
pub use engine::{EngineBuilder, Recovery, TransactionEngine};
pub use state::{Phase, TransactionRecord, TRANSACTION_SCHEMA_VERSION};
