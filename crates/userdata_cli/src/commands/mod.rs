//! CLI command implementations.

pub mod compact;
pub mod dump_changes;
pub mod inspect;
pub mod verify;

use std::path::Path;
use tracing::debug;
use userdata_core::{LocalStore, StoreConfig, JOURNAL_FILE};

/// Opens an existing store, refusing to create a new one.
pub(crate) fn open_existing(path: &Path) -> Result<LocalStore, Box<dyn std::error::Error>> {
    if !path.join(JOURNAL_FILE).exists() {
        return Err(format!("No user-data store found at {:?}", path).into());
    }
    debug!(path = %path.display(), "opening store");
    Ok(LocalStore::open_dir(path, StoreConfig::default())?)
}
