//! Dump changes command implementation.

use crate::Format;
use serde::Serialize;
use std::path::Path;
use userdata_core::LocalStore;
use userdata_model::{ChangeRecord, Operation};

/// One dumped change.
#[derive(Debug, Serialize)]
pub struct ChangeEntry {
    /// Change id.
    pub change_id: u64,
    /// Entity id.
    pub entity_id: String,
    /// Entity kind, if the entity is still stored.
    pub kind: Option<String>,
    /// Operation name.
    pub operation: Operation,
    /// Logical timestamp in milliseconds.
    pub timestamp_ms: u64,
}

/// Pending change dump.
#[derive(Debug, Serialize)]
pub struct ChangeDump {
    /// Bound account, if any.
    pub identity: Option<String>,
    /// Total pending changes.
    pub pending: usize,
    /// Dumped changes, oldest first.
    pub changes: Vec<ChangeEntry>,
}

/// Runs the dump-changes command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_existing(path)?;
    let dump = dump(&store, limit);

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&dump)?),
        Format::Text => {
            println!(
                "Identity: {}",
                dump.identity.as_deref().unwrap_or("(none)")
            );
            println!(
                "Pending changes: {} (showing {})",
                dump.pending,
                dump.changes.len()
            );
            println!();
            for change in &dump.changes {
                println!(
                    "[{:>6}] {:<7} {:<40} kind={:<14} at={}ms",
                    change.change_id,
                    operation_name(change.operation),
                    change.entity_id,
                    change.kind.as_deref().unwrap_or("?"),
                    change.timestamp_ms
                );
            }
        }
    }
    Ok(())
}

pub(crate) fn dump(store: &LocalStore, limit: Option<usize>) -> ChangeDump {
    let pending = store.pending_changes();
    let total = pending.len();
    let changes = pending
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|change| entry(store, change))
        .collect();

    ChangeDump {
        identity: store.bound_identity(),
        pending: total,
        changes,
    }
}

fn entry(store: &LocalStore, change: ChangeRecord) -> ChangeEntry {
    let kind = store.get(&change.entity_id).map(|e| e.kind.to_string());
    ChangeEntry {
        change_id: change.change_id,
        entity_id: change.entity_id.to_string(),
        kind,
        operation: change.operation,
        timestamp_ms: change.timestamp.as_millis(),
    }
}

fn operation_name(operation: Operation) -> &'static str {
    match operation {
        Operation::Create => "CREATE",
        Operation::Update => "UPDATE",
        Operation::Delete => "DELETE",
    }
}
