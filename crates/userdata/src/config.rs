//! Configuration for [`UserData`](crate::UserData).

use userdata_core::StoreConfig;
use userdata_sync::SyncConfig;

/// Store and sync configuration.
#[derive(Debug, Clone)]
pub struct UserDataConfig {
    /// Local store settings.
    pub store: StoreConfig,
    /// Sync engine and scheduler settings.
    pub sync: SyncConfig,
}

impl UserDataConfig {
    /// Default settings for `device_id`.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            store: StoreConfig::default(),
            sync: SyncConfig::new(device_id),
        }
    }

    /// Replaces the store settings.
    #[must_use]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Replaces the sync settings.
    #[must_use]
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }
}
