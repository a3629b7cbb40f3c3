//! Change-log records.

use crate::ids::EntityId;
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};

/// Kind of local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Entity did not exist locally (or only as a tombstone).
    Create,
    /// Entity existed and was modified.
    Update,
    /// Entity was tombstoned.
    Delete,
}

/// One append-only entry of the local change log.
///
/// `change_id` is assigned by the log and strictly increases in insertion
/// order; `timestamp` is the logical time of the entity version the change
/// produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Log-assigned identifier.
    pub change_id: u64,
    /// Entity the change applies to.
    pub entity_id: EntityId,
    /// Operation performed.
    pub operation: Operation,
    /// Logical timestamp of the resulting version.
    pub timestamp: Timestamp,
}

impl ChangeRecord {
    /// Creates a change record.
    pub fn new(
        change_id: u64,
        entity_id: EntityId,
        operation: Operation,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            change_id,
            entity_id,
            operation,
            timestamp,
        }
    }
}
