//! Inspect command implementation.

use crate::Format;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use userdata_core::ListFilter;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Bound account, if any.
    pub identity: Option<String>,
    /// Stored entities, tombstones included.
    pub entity_count: usize,
    /// Number of tombstones.
    pub tombstone_count: usize,
    /// Entities with unacknowledged local changes.
    pub dirty_count: usize,
    /// Entities whose last push was rejected.
    pub conflict_count: usize,
    /// Pending change records.
    pub pending_changes: usize,
    /// Last assigned change id.
    pub last_change_id: Option<u64>,
    /// Number of stored sync cursors.
    pub cursor_count: usize,
    /// Logical clock in milliseconds.
    pub clock_ms: u64,
    /// Per-kind statistics (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<KindStats>>,
}

/// Statistics for a single entity kind.
#[derive(Debug, Default, Serialize)]
pub struct KindStats {
    /// Kind name.
    pub kind: String,
    /// Visible entities.
    pub live: usize,
    /// Tombstones.
    pub tombstones: usize,
    /// Total payload size in bytes.
    pub payload_bytes: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_kinds: bool, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_existing(path)?;
    let result = inspect(&store, path, show_kinds);

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text(&result),
    }
    Ok(())
}

pub(crate) fn inspect(
    store: &userdata_core::LocalStore,
    path: &Path,
    show_kinds: bool,
) -> InspectResult {
    let stats = store.stats();
    let kinds = show_kinds.then(|| {
        let mut by_kind: BTreeMap<String, KindStats> = BTreeMap::new();
        for entity in store.list(None, &ListFilter::new().with_tombstones()) {
            let entry = by_kind
                .entry(entity.kind.to_string())
                .or_insert_with(|| KindStats {
                    kind: entity.kind.to_string(),
                    ..KindStats::default()
                });
            if entity.deleted {
                entry.tombstones += 1;
            } else {
                entry.live += 1;
            }
            entry.payload_bytes += entity.payload.len();
        }
        by_kind.into_values().collect()
    });

    InspectResult {
        path: path.display().to_string(),
        journal_bytes: stats.journal_bytes,
        identity: stats.identity,
        entity_count: stats.entities,
        tombstone_count: stats.tombstones,
        dirty_count: stats.dirty,
        conflict_count: stats.conflicts,
        pending_changes: stats.pending_changes,
        last_change_id: store.last_change_id(),
        cursor_count: stats.cursors,
        clock_ms: stats.clock.as_millis(),
        kinds,
    }
}

fn print_text(result: &InspectResult) {
    println!("User Data Store: {}", result.path);
    println!();
    println!("Journal:");
    println!("  Size:           {} bytes", result.journal_bytes);
    println!("  Clock:          {} ms", result.clock_ms);
    println!();
    println!("Identity:         {}", result.identity.as_deref().unwrap_or("(none)"));
    println!("Cursors:          {}", result.cursor_count);
    println!();
    println!("Entities:");
    println!("  Stored:         {}", result.entity_count);
    println!("  Tombstones:     {}", result.tombstone_count);
    println!("  Dirty:          {}", result.dirty_count);
    println!("  Conflicts:      {}", result.conflict_count);
    println!();
    println!("Pending changes:  {}", result.pending_changes);
    if let Some(id) = result.last_change_id {
        println!("Last change id:   {}", id);
    }

    if let Some(kinds) = &result.kinds {
        println!();
        println!("Kinds:");
        for kind in kinds {
            println!(
                "  {:<16} live={:<6} tombstones={:<6} payload={} bytes",
                kind.kind, kind.live, kind.tombstones, kind.payload_bytes
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use userdata_core::{LocalStore, StoreConfig};
    use userdata_model::{Entity, EntityKind};

    #[test]
    fn counts_entities_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open_dir(dir.path(), StoreConfig::default()).unwrap();
        store
            .put(Entity::new("bookmark:1", EntityKind::Bookmark, vec![1, 2]))
            .unwrap();
        store
            .put(Entity::new("bookmark:2", EntityKind::Bookmark, vec![3]))
            .unwrap();
        store
            .put(Entity::new("history:1", EntityKind::History, vec![4]))
            .unwrap();
        store.delete(&"bookmark:2".into()).unwrap();

        let result = inspect(&store, dir.path(), true);
        assert_eq!(result.entity_count, 3);
        assert_eq!(result.tombstone_count, 1);
        assert_eq!(result.pending_changes, 4);

        let kinds = result.kinds.unwrap();
        assert_eq!(kinds.len(), 2);
        assert_eq!(kinds[0].kind, "bookmark");
        assert_eq!(kinds[0].live, 1);
        assert_eq!(kinds[0].tombstones, 1);
        assert_eq!(kinds[1].kind, "history");
    }
}
