//! Compact command implementation.

use std::path::Path;
use userdata_core::{ListFilter, LocalStore};
use userdata_model::{SyncState, Timestamp};

/// Compaction statistics.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CompactStats {
    /// Tombstones past the retention window.
    pub expired_tombstones: usize,
    /// Tombstones actually purged.
    pub tombstones_purged: usize,
    /// Journal bytes before compaction.
    pub bytes_before: u64,
    /// Journal bytes after compaction.
    pub bytes_after: u64,
}

/// Runs the compact command.
pub fn run(
    path: &Path,
    purge_tombstones: bool,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_existing(path)?;

    println!("Compacting user-data store at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let stats = compact(&store, purge_tombstones, dry_run)?;

    println!("Compaction:");
    println!(
        "  Expired tombstones: {} (will be {})",
        stats.expired_tombstones,
        if purge_tombstones { "purged" } else { "kept" }
    );
    if !dry_run {
        println!("  Purged:             {}", stats.tombstones_purged);
        println!();
        println!("  Size before: {} bytes", stats.bytes_before);
        println!("  Size after:  {} bytes", stats.bytes_after);
        println!(
            "  Space saved: {} bytes",
            stats.bytes_before.saturating_sub(stats.bytes_after)
        );
        println!();
        println!("✓ Compaction complete");
    }

    Ok(())
}

pub(crate) fn compact(
    store: &LocalStore,
    purge_tombstones: bool,
    dry_run: bool,
) -> Result<CompactStats, Box<dyn std::error::Error>> {
    let stats = store.stats();
    let cutoff = Timestamp::now().saturating_sub(store.config().tombstone_retention);
    let expired_tombstones = store
        .list(
            None,
            &ListFilter::new().with_tombstones().in_state(SyncState::Clean),
        )
        .iter()
        .filter(|e| e.deleted && e.modified < cutoff)
        .count();

    let mut result = CompactStats {
        expired_tombstones,
        bytes_before: stats.journal_bytes,
        bytes_after: stats.journal_bytes,
        ..CompactStats::default()
    };
    if dry_run {
        return Ok(result);
    }

    if purge_tombstones {
        result.tombstones_purged = store.purge_tombstones()?;
    }
    store.compact()?;
    result.bytes_after = store.stats().journal_bytes;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use userdata_core::StoreConfig;
    use userdata_model::{Entity, EntityKind};

    #[test]
    fn compaction_shrinks_a_rewritten_journal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open_dir(dir.path(), StoreConfig::default()).unwrap();
        for i in 0..20u8 {
            store
                .put(Entity::new("pref:player:volume", EntityKind::Preference, vec![i]))
                .unwrap();
        }

        let dry = compact(&store, true, true).unwrap();
        assert_eq!(dry.bytes_before, dry.bytes_after);

        let stats = compact(&store, true, false).unwrap();
        assert_eq!(stats.tombstones_purged, 0);
        assert!(stats.bytes_after < stats.bytes_before);
        assert_eq!(store.stats().entities, 1);
    }
}
