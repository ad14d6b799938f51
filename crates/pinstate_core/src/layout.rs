//! On-disk layout of an instance under the state root.
//!
//! ```text
//! <state_root>/
//! ├─ instances/<id>/
//! │  ├─ manifest.tlv              # live manifest
//! │  ├─ payload_refs.tlv          # live verified payload refs
//! │  ├─ known_good.tlv            # live known-good pointer
//! │  ├─ staging.lock              # advisory lock (opt-in)
//! │  ├─ staging/
//! │  │  ├─ transaction.tlv        # in-flight transaction marker
//! │  │  ├─ manifest.tlv
//! │  │  ├─ payload_refs.tlv
//! │  │  ├─ known_good.tlv
//! │  │  └─ known_good_snapshot/{manifest.tlv,payload_refs.tlv}
//! │  └─ previous/
//! │     ├─ <before_hash>_<tx_id>/{manifest.tlv,payload_refs.tlv,known_good.tlv}
//! │     └─ known_good_<after_hash>_<tx_id>/{manifest.tlv,payload_refs.tlv}
//! └─ artifacts/<algo>/<hex(hash)>/{artifact.tlv,payload/payload.bin}
//! ```
//!
//! Live files only ever change by rename, and only inside `commit`.

use crate::error::{CoreError, CoreResult};
use crate::types::{ManifestHash, TxId};
use std::path::{Path, PathBuf};

/// Directory holding all instances.
pub const INSTANCES_DIR: &str = "instances";
/// Manifest file name (live, staged, archived).
pub const MANIFEST_FILE: &str = "manifest.tlv";
/// Payload refs file name (live, staged, archived).
pub const PAYLOAD_REFS_FILE: &str = "payload_refs.tlv";
/// Known-good pointer file name (live, staged, archived).
pub const KNOWN_GOOD_FILE: &str = "known_good.tlv";
/// Transaction marker file name.
pub const TRANSACTION_FILE: &str = "transaction.tlv";
/// Staging directory name.
pub const STAGING_DIR: &str = "staging";
/// Archive directory name.
pub const PREVIOUS_DIR: &str = "previous";
/// Staged known-good snapshot directory name.
pub const SNAPSHOT_DIR: &str = "known_good_snapshot";
/// Advisory lock file name.
const LOCK_FILE: &str = "staging.lock";
/// Temporary file for bootstrap manifest writes.
const MANIFEST_TEMP: &str = "manifest.tlv.tmp";

/// Checks that `id` is usable as a single path component.
///
/// # Errors
///
/// Returns [`CoreError::UnsafeInstanceId`] if the id is empty, contains a
/// path separator or NUL, or contains a `..` traversal sequence.
pub fn validate_instance_id(id: &str) -> CoreResult<()> {
    let unsafe_id = id.is_empty()
        || id == "."
        || id.contains("..")
        || id.contains(['/', '\\', '\0', ':']);
    if unsafe_id {
        return Err(CoreError::UnsafeInstanceId { id: id.to_string() });
    }
    Ok(())
}

/// Paths of one instance's live, staging and archive files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceLayout {
    instance_id: String,
    dir: PathBuf,
}

impl InstanceLayout {
    /// Resolves the layout of `instance_id` under `state_root`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StateRootUnavailable`] for an empty root and
    /// [`CoreError::UnsafeInstanceId`] for an unsafe id.
    pub fn new(state_root: &Path, instance_id: &str) -> CoreResult<Self> {
        if state_root.as_os_str().is_empty() {
            return Err(CoreError::StateRootUnavailable);
        }
        validate_instance_id(instance_id)?;
        Ok(Self {
            instance_id: instance_id.to_string(),
            dir: state_root.join(INSTANCES_DIR).join(instance_id),
        })
    }

    /// Returns the instance id.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Returns `instances/<id>`.
    #[must_use]
    pub fn instance_dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the live manifest path.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Returns the temporary path used while bootstrapping a manifest.
    #[must_use]
    pub fn manifest_temp_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_TEMP)
    }

    /// Returns the live payload refs path.
    #[must_use]
    pub fn payload_refs_path(&self) -> PathBuf {
        self.dir.join(PAYLOAD_REFS_FILE)
    }

    /// Returns the live known-good pointer path.
    #[must_use]
    pub fn known_good_path(&self) -> PathBuf {
        self.dir.join(KNOWN_GOOD_FILE)
    }

    /// Returns the advisory lock path.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Returns the staging directory.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.dir.join(STAGING_DIR)
    }

    /// Returns the transaction marker path.
    #[must_use]
    pub fn transaction_path(&self) -> PathBuf {
        self.staging_dir().join(TRANSACTION_FILE)
    }

    /// Returns the staged manifest path.
    #[must_use]
    pub fn staged_manifest_path(&self) -> PathBuf {
        self.staging_dir().join(MANIFEST_FILE)
    }

    /// Returns the staged payload refs path.
    #[must_use]
    pub fn staged_payload_refs_path(&self) -> PathBuf {
        self.staging_dir().join(PAYLOAD_REFS_FILE)
    }

    /// Returns the staged known-good pointer path.
    #[must_use]
    pub fn staged_known_good_path(&self) -> PathBuf {
        self.staging_dir().join(KNOWN_GOOD_FILE)
    }

    /// Returns the staged known-good snapshot directory.
    #[must_use]
    pub fn snapshot_dir(&self) -> PathBuf {
        self.staging_dir().join(SNAPSHOT_DIR)
    }

    /// Returns the archive root `previous/`.
    #[must_use]
    pub fn previous_dir(&self) -> PathBuf {
        self.dir.join(PREVIOUS_DIR)
    }

    /// Returns `previous/<before_hash>_<tx_id>`.
    #[must_use]
    pub fn archive_dir(&self, before: ManifestHash, tx_id: TxId) -> PathBuf {
        self.previous_dir().join(format!("{before}_{tx_id}"))
    }

    /// Returns `previous/known_good_<after_hash>_<tx_id>` relative to the instance dir.
    #[must_use]
    pub fn known_good_archive_rel(after: ManifestHash, tx_id: TxId) -> String {
        format!("{PREVIOUS_DIR}/known_good_{after}_{tx_id}")
    }

    /// Resolves a path stored relative to the instance dir.
    #[must_use]
    pub fn resolve(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.dir.clone(), |path, part| path.join(part))
    }

    /// Every staging artifact except the transaction marker, in deletion order.
    #[must_use]
    pub fn staged_files(&self) -> Vec<PathBuf> {
        let snapshot = self.snapshot_dir();
        vec![
            self.staged_manifest_path(),
            self.staged_payload_refs_path(),
            self.staged_known_good_path(),
            snapshot.join(MANIFEST_FILE),
            snapshot.join(PAYLOAD_REFS_FILE),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_ids_accepted() {
        for id in ["demo", "my-instance_2", "a.b", "Instance 1"] {
            assert!(validate_instance_id(id).is_ok(), "{id}");
        }
    }

    #[test]
    fn unsafe_ids_rejected() {
        for id in ["", ".", "..", "a/b", "a\\b", "../etc", "x..y", "c:", "nul\0"] {
            assert!(
                matches!(
                    validate_instance_id(id),
                    Err(CoreError::UnsafeInstanceId { .. })
                ),
                "{id:?}"
            );
        }
    }

    #[test]
    fn empty_state_root_is_unavailable() {
        assert!(matches!(
            InstanceLayout::new(Path::new(""), "demo"),
            Err(CoreError::StateRootUnavailable)
        ));
    }

    #[test]
    fn paths_are_correct() {
        let layout = InstanceLayout::new(Path::new("/state"), "demo").unwrap();
        let dir = Path::new("/state/instances/demo");

        assert_eq!(layout.instance_dir(), dir);
        assert_eq!(layout.manifest_path(), dir.join("manifest.tlv"));
        assert_eq!(
            layout.transaction_path(),
            dir.join("staging/transaction.tlv")
        );
        assert_eq!(
            layout.snapshot_dir(),
            dir.join("staging/known_good_snapshot")
        );
        assert_eq!(
            layout.archive_dir(ManifestHash::new(0x1f), TxId::new(9)),
            dir.join("previous/000000000000001f_9")
        );
    }

    #[test]
    fn known_good_archive_resolves_under_instance() {
        let layout = InstanceLayout::new(Path::new("/state/"), "demo").unwrap();
        let rel = InstanceLayout::known_good_archive_rel(ManifestHash::new(1), TxId::new(2));
        assert_eq!(rel, "previous/known_good_0000000000000001_2");
        assert_eq!(
            layout.resolve(&rel),
            Path::new("/state/instances/demo/previous/known_good_0000000000000001_2")
        );
    }
}
