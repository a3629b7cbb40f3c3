//! The dirty tracker: append-only log of local mutations.
//!
//! Entries leave the log only when the remote acknowledges them (or
//! explicitly rejects them), so the unpushed entries double as the durable
//! offline queue.

use std::collections::BTreeMap;
use userdata_model::{ChangeRecord, EntityId, Operation, Timestamp};

/// Ordered set of unacknowledged local changes.
///
/// Change ids strictly increase in insertion order and are never reused,
/// even after the entries they belonged to were acknowledged.
#[derive(Debug, Clone, Default)]
pub struct DirtyTracker {
    entries: BTreeMap<u64, ChangeRecord>,
    next_change_id: u64,
}

impl DirtyTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_change_id: 1,
        }
    }

    /// Rebuilds a tracker from persisted entries.
    pub fn from_parts(changes: Vec<ChangeRecord>, next_change_id: u64) -> Self {
        let mut tracker = Self {
            entries: BTreeMap::new(),
            next_change_id: next_change_id.max(1),
        };
        for change in changes {
            tracker.restore(change);
        }
        tracker
    }

    /// Records a mutation and returns the assigned record.
    pub fn record(
        &mut self,
        entity_id: EntityId,
        operation: Operation,
        timestamp: Timestamp,
    ) -> ChangeRecord {
        let change = ChangeRecord::new(self.next_change_id, entity_id, operation, timestamp);
        self.restore(change.clone());
        change
    }

    /// Re-inserts a record that already carries its id (journal replay).
    pub fn restore(&mut self, change: ChangeRecord) {
        self.next_change_id = self.next_change_id.max(change.change_id + 1);
        self.entries.insert(change.change_id, change);
    }

    /// The id the next recorded change will receive.
    pub fn next_change_id(&self) -> u64 {
        self.next_change_id.max(1)
    }

    /// Id of the newest pending change.
    pub fn last_change_id(&self) -> Option<u64> {
        self.entries.keys().next_back().copied()
    }

    /// Looks up a pending change.
    pub fn get(&self, change_id: u64) -> Option<&ChangeRecord> {
        self.entries.get(&change_id)
    }

    /// All pending changes in insertion order.
    pub fn pending(&self) -> Vec<ChangeRecord> {
        self.entries.values().cloned().collect()
    }

    /// Pending changes of one entity in insertion order.
    pub fn pending_for(&self, entity_id: &EntityId) -> Vec<&ChangeRecord> {
        self.entries
            .values()
            .filter(|change| &change.entity_id == entity_id)
            .collect()
    }

    /// Returns true if the entity has any pending change.
    pub fn has_pending_for(&self, entity_id: &EntityId) -> bool {
        self.entries
            .values()
            .any(|change| &change.entity_id == entity_id)
    }

    /// Removes the given changes and returns the ones that were present.
    ///
    /// Unknown ids are ignored, so repeating an acknowledgment is harmless.
    pub fn acknowledge(&mut self, change_ids: &[u64]) -> Vec<ChangeRecord> {
        change_ids
            .iter()
            .filter_map(|id| self.entries.remove(id))
            .collect()
    }

    /// Number of pending changes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every pending change. Id assignment continues where it was.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn record_assigns_increasing_ids() {
        let mut tracker = DirtyTracker::new();
        let a = tracker.record("a".into(), Operation::Create, ts(1));
        let b = tracker.record("b".into(), Operation::Create, ts(2));
        assert_eq!(a.change_id, 1);
        assert_eq!(b.change_id, 2);
        assert_eq!(tracker.last_change_id(), Some(2));
    }

    #[test]
    fn pending_is_in_insertion_order() {
        let mut tracker = DirtyTracker::new();
        tracker.record("z".into(), Operation::Create, ts(5));
        tracker.record("a".into(), Operation::Update, ts(3));
        tracker.record("m".into(), Operation::Delete, ts(9));

        let ids: Vec<_> = tracker
            .pending()
            .into_iter()
            .map(|c| c.entity_id.to_string())
            .collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[test]
    fn acknowledge_is_idempotent() {
        let mut tracker = DirtyTracker::new();
        tracker.record("a".into(), Operation::Create, ts(1));
        tracker.record("b".into(), Operation::Create, ts(2));

        assert_eq!(tracker.acknowledge(&[1]).len(), 1);
        assert!(tracker.acknowledge(&[1]).is_empty());
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.pending()[0].change_id, 2);
    }

    #[test]
    fn ids_are_not_reused_after_clear() {
        let mut tracker = DirtyTracker::new();
        tracker.record("a".into(), Operation::Create, ts(1));
        tracker.clear();
        let next = tracker.record("b".into(), Operation::Create, ts(2));
        assert_eq!(next.change_id, 2);
    }

    #[test]
    fn pending_for_entity() {
        let mut tracker = DirtyTracker::new();
        tracker.record("a".into(), Operation::Create, ts(1));
        tracker.record("b".into(), Operation::Create, ts(2));
        tracker.record("a".into(), Operation::Update, ts(3));

        let id = EntityId::from("a");
        assert_eq!(tracker.pending_for(&id).len(), 2);
        assert!(tracker.has_pending_for(&id));
        tracker.acknowledge(&[1, 3]);
        assert!(!tracker.has_pending_for(&id));
    }

    #[test]
    fn restore_keeps_counter_ahead() {
        let tracker = DirtyTracker::from_parts(
            vec![ChangeRecord::new(7, "a".into(), Operation::Create, ts(1))],
            3,
        );
        assert_eq!(tracker.next_change_id(), 8);
    }
}
