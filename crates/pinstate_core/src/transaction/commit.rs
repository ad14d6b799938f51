//! Commit choreography: ordered renames, each paired with its undo.
//!
//! A commit is a list of [`Move`]s built up front. Moves are applied in
//! order; if one fails, every move already applied is undone in reverse
//! order, which restores the pre-commit live layout exactly.

use crate::error::CoreError;
use crate::layout::{InstanceLayout, KNOWN_GOOD_FILE, MANIFEST_FILE, PAYLOAD_REFS_FILE};
use crate::types::{ManifestHash, TxId};
use pinstate_storage::{FileSystem, StorageError};
use std::fmt;
use std::path::PathBuf;

/// A step of the commit sequence, named for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitStep {
    /// Live manifest moves into the archive.
    ArchiveManifest,
    /// Live payload refs move into the archive.
    ArchivePayloadRefs,
    /// Staged manifest becomes live.
    PromoteManifest,
    /// Staged payload refs become live.
    PromotePayloadRefs,
    /// Staged known-good snapshot moves into the archive.
    ArchiveKnownGoodSnapshot,
    /// Live known-good pointer is archived and the staged one becomes live.
    PromoteKnownGood,
}

impl CommitStep {
    /// Returns the error code for a failure at this step.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ArchiveManifest => "commit_archive_manifest",
            Self::ArchivePayloadRefs => "commit_archive_payload_refs",
            Self::PromoteManifest => "commit_promote_manifest",
            Self::PromotePayloadRefs => "commit_promote_payload_refs",
            Self::ArchiveKnownGoodSnapshot => "commit_archive_known_good_snapshot",
            Self::PromoteKnownGood => "commit_promote_known_good",
        }
    }
}

impl fmt::Display for CommitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One rename and its inverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Move {
    pub(crate) step: CommitStep,
    pub(crate) from: PathBuf,
    pub(crate) to: PathBuf,
}

impl Move {
    fn new(step: CommitStep, from: PathBuf, to: PathBuf) -> Self {
        Self { step, from, to }
    }

    fn apply(&self, fs: &dyn FileSystem) -> Result<(), StorageError> {
        fs.rename(&self.from, &self.to)
    }

    fn undo(&self, fs: &dyn FileSystem) -> Result<(), StorageError> {
        fs.rename(&self.to, &self.from)
    }
}

/// The full ordered list of moves for one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommitPlan {
    moves: Vec<Move>,
}

impl CommitPlan {
    /// Builds the plan from what is currently on disk.
    ///
    /// Optional steps are included only when their source exists.
    pub(crate) fn build(
        fs: &dyn FileSystem,
        layout: &InstanceLayout,
        before: ManifestHash,
        after: ManifestHash,
        tx_id: TxId,
    ) -> Self {
        let archive = layout.archive_dir(before, tx_id);
        let mut moves = vec![Move::new(
            CommitStep::ArchiveManifest,
            layout.manifest_path(),
            archive.join(MANIFEST_FILE),
        )];

        if fs.exists(&layout.payload_refs_path()) {
            moves.push(Move::new(
                CommitStep::ArchivePayloadRefs,
                layout.payload_refs_path(),
                archive.join(PAYLOAD_REFS_FILE),
            ));
        }

        moves.push(Move::new(
            CommitStep::PromoteManifest,
            layout.staged_manifest_path(),
            layout.manifest_path(),
        ));
        moves.push(Move::new(
            CommitStep::PromotePayloadRefs,
            layout.staged_payload_refs_path(),
            layout.payload_refs_path(),
        ));

        let snapshot = layout.snapshot_dir();
        if fs.exists(&snapshot.join(MANIFEST_FILE)) {
            moves.push(Move::new(
                CommitStep::ArchiveKnownGoodSnapshot,
                snapshot,
                layout.resolve(&InstanceLayout::known_good_archive_rel(after, tx_id)),
            ));
        }

        if fs.exists(&layout.staged_known_good_path()) {
            if fs.exists(&layout.known_good_path()) {
                moves.push(Move::new(
                    CommitStep::PromoteKnownGood,
                    layout.known_good_path(),
                    archive.join(KNOWN_GOOD_FILE),
                ));
            }
            moves.push(Move::new(
                CommitStep::PromoteKnownGood,
                layout.staged_known_good_path(),
                layout.known_good_path(),
            ));
        }

        Self { moves }
    }

    /// Returns the planned moves in order.
    pub(crate) fn moves(&self) -> &[Move] {
        &self.moves
    }

    /// Applies every move, or undoes the applied prefix on failure.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CommitFailed`] naming the failed step;
    /// `restored` is false if any undo also failed.
    pub(crate) fn execute(&self, fs: &dyn FileSystem) -> Result<(), CoreError> {
        for (index, mv) in self.moves.iter().enumerate() {
            if let Err(source) = mv.apply(fs) {
                tracing::warn!(
                    step = %mv.step,
                    from = %mv.from.display(),
                    to = %mv.to.display(),
                    error = %source,
                    "commit rename failed, compensating"
                );
                let restored = Self::compensate(fs, &self.moves[..index]);
                return Err(CoreError::CommitFailed {
                    step: mv.step,
                    source,
                    restored,
                });
            }
        }
        Ok(())
    }

    fn compensate(fs: &dyn FileSystem, applied: &[Move]) -> bool {
        let mut restored = true;
        for mv in applied.iter().rev() {
            if let Err(err) = mv.undo(fs) {
                tracing::warn!(
                    step = %mv.step,
                    from = %mv.to.display(),
                    to = %mv.from.display(),
                    error = %err,
                    "compensating rename failed"
                );
                restored = false;
            }
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinstate_storage::InMemoryFileSystem;
    use std::path::Path;

    fn setup() -> (InMemoryFileSystem, InstanceLayout) {
        let fs = InMemoryFileSystem::new();
        let layout = InstanceLayout::new(Path::new("/s"), "demo").unwrap();
        fs.create_dir_all(&layout.staging_dir()).unwrap();
        fs.write(&layout.manifest_path(), b"live-m").unwrap();
        fs.write(&layout.staged_manifest_path(), b"new-m").unwrap();
        fs.write(&layout.staged_payload_refs_path(), b"new-r").unwrap();
        fs.create_dir_all(&layout.archive_dir(ManifestHash::new(1), TxId::new(5)))
            .unwrap();
        (fs, layout)
    }

    fn plan(fs: &InMemoryFileSystem, layout: &InstanceLayout) -> CommitPlan {
        CommitPlan::build(fs, layout, ManifestHash::new(1), ManifestHash::new(2), TxId::new(5))
    }

    #[test]
    fn minimal_plan_has_three_moves() {
        let (fs, layout) = setup();
        let steps: Vec<_> = plan(&fs, &layout).moves().iter().map(|m| m.step).collect();
        assert_eq!(
            steps,
            vec![
                CommitStep::ArchiveManifest,
                CommitStep::PromoteManifest,
                CommitStep::PromotePayloadRefs
            ]
        );
    }

    #[test]
    fn full_plan_has_seven_moves() {
        let (fs, layout) = setup();
        fs.write(&layout.payload_refs_path(), b"live-r").unwrap();
        fs.write(&layout.known_good_path(), b"live-kg").unwrap();
        fs.write(&layout.staged_known_good_path(), b"new-kg").unwrap();
        fs.create_dir_all(&layout.snapshot_dir()).unwrap();
        fs.write(&layout.snapshot_dir().join(MANIFEST_FILE), b"snap")
            .unwrap();

        let plan = plan(&fs, &layout);
        assert_eq!(plan.moves().len(), 7);

        plan.execute(&fs).unwrap();
        assert_eq!(fs.read(&layout.manifest_path()).unwrap(), b"new-m");
        assert_eq!(fs.read(&layout.known_good_path()).unwrap(), b"new-kg");
        let archive = layout.archive_dir(ManifestHash::new(1), TxId::new(5));
        assert_eq!(fs.read(&archive.join(MANIFEST_FILE)).unwrap(), b"live-m");
        assert_eq!(fs.read(&archive.join(KNOWN_GOOD_FILE)).unwrap(), b"live-kg");
        assert!(fs.exists(
            &layout
                .previous_dir()
                .join("known_good_0000000000000002_5")
                .join(MANIFEST_FILE)
        ));
    }

    #[test]
    fn failure_undoes_applied_moves() {
        let (fs, layout) = setup();
        // Promotion of payload refs fails because its source is gone.
        fs.remove_file(&layout.staged_payload_refs_path()).unwrap();

        let err = plan(&fs, &layout).execute(&fs).unwrap_err();
        assert!(matches!(
            err,
            CoreError::CommitFailed {
                step: CommitStep::PromotePayloadRefs,
                restored: true,
                ..
            }
        ));
        assert_eq!(fs.read(&layout.manifest_path()).unwrap(), b"live-m");
        assert_eq!(fs.read(&layout.staged_manifest_path()).unwrap(), b"new-m");
    }

    #[test]
    fn step_codes_are_distinct() {
        let steps = [
            CommitStep::ArchiveManifest,
            CommitStep::ArchivePayloadRefs,
            CommitStep::PromoteManifest,
            CommitStep::PromotePayloadRefs,
            CommitStep::ArchiveKnownGoodSnapshot,
            CommitStep::PromoteKnownGood,
        ];
        let codes: std::collections::HashSet<_> = steps.iter().map(|s| s.code()).collect();
        assert_eq!(codes.len(), steps.len());
    }
}
