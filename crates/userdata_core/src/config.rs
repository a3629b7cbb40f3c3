//! Local store configuration.

use std::time::Duration;

/// Configuration for opening a [`LocalStore`](crate::LocalStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to fsync the journal on every commit.
    pub sync_on_commit: bool,

    /// How long tombstones are kept after they have been shared with the
    /// remote before they may be purged.
    pub tombstone_retention: Duration,

    /// Journal size that triggers an automatic compaction (0 = never).
    pub compact_threshold_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            tombstone_retention: Duration::from_secs(30 * 24 * 60 * 60), // 30 days
            compact_threshold_bytes: 4 * 1024 * 1024,                    // 4 MB
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to fsync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the tombstone retention window.
    #[must_use]
    pub const fn tombstone_retention(mut self, retention: Duration) -> Self {
        self.tombstone_retention = retention;
        self
    }

    /// Sets the automatic compaction threshold.
    #[must_use]
    pub const fn compact_threshold_bytes(mut self, bytes: u64) -> Self {
        self.compact_threshold_bytes = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chain() {
        let config = StoreConfig::new()
            .sync_on_commit(false)
            .tombstone_retention(Duration::from_secs(60))
            .compact_threshold_bytes(0);
        assert!(!config.sync_on_commit);
        assert_eq!(config.tombstone_retention, Duration::from_secs(60));
        assert_eq!(config.compact_threshold_bytes, 0);
    }
}
