//! Engine configuration.

/// Configuration for a [`TransactionEngine`](crate::TransactionEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Whether to fsync the instance directories after commit and bootstrap.
    pub sync_dirs: bool,

    /// Whether `prepare` and `recover_staging` take an exclusive lock on
    /// the instance.
    ///
    /// Off by default: a second `prepare` then replaces the first one's
    /// staging marker ("last prepare wins"), and the superseded handle
    /// fails with `StaleTransaction`.
    pub advisory_lock: bool,

    /// Whether to remove staging and archive directories left empty by
    /// rollback, recovery or a failed commit.
    pub prune_empty_dirs: bool,

    /// Buffer size used when re-hashing artifact payloads.
    pub hash_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_dirs: true,
            advisory_lock: false,
            prune_empty_dirs: true,
            hash_buffer_size: 64 * 1024, // 64 KiB
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to fsync directories after renames.
    #[must_use]
    pub const fn sync_dirs(mut self, value: bool) -> Self {
        self.sync_dirs = value;
        self
    }

    /// Sets whether `prepare` and `recover_staging` take the instance's
    /// advisory lock.
    #[must_use]
    pub const fn advisory_lock(mut self, value: bool) -> Self {
        self.advisory_lock = value;
        self
    }

    /// Sets whether empty staging and archive directories are pruned.
    #[must_use]
    pub const fn prune_empty_dirs(mut self, value: bool) -> Self {
        self.prune_empty_dirs = value;
        self
    }

    /// Sets the payload hashing buffer size.
    #[must_use]
    pub const fn hash_buffer_size(mut self, size: usize) -> Self {
        self.hash_buffer_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert!(config.sync_dirs);
        assert!(!config.advisory_lock);
        assert!(config.prune_empty_dirs);
        assert_eq!(config.hash_buffer_size, 65536);
    }

    #[test]
    fn builder_pattern() {
        let config = EngineConfig::new()
            .advisory_lock(true)
            .sync_dirs(false)
            .hash_buffer_size(1024);

        assert!(config.advisory_lock);
        assert!(!config.sync_dirs);
        assert_eq!(config.hash_buffer_size, 1024);
    }
}
