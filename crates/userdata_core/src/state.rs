//! In-memory store state rebuilt from the journal.

use crate::changelog::DirtyTracker;
use crate::clock::LogicalClock;
use crate::journal::{JournalOp, JournalRecord, Snapshot};
use std::collections::{BTreeMap, HashMap};
use userdata_model::{Entity, EntityId, SyncCursor, Timestamp};

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) entities: BTreeMap<EntityId, Entity>,
    pub(crate) tracker: DirtyTracker,
    pub(crate) cursors: BTreeMap<String, SyncCursor>,
    pub(crate) identity: Option<String>,
    pub(crate) clock: LogicalClock,
    /// Change id -> timestamp of the version sent in the current push.
    /// Not journaled: after a restart nothing is in flight.
    pub(crate) in_flight: HashMap<u64, Timestamp>,
}

impl StoreState {
    pub(crate) fn new() -> Self {
        Self {
            tracker: DirtyTracker::new(),
            ..Self::default()
        }
    }

    pub(crate) fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut clock = LogicalClock::new();
        clock.observe(snapshot.clock);
        Self {
            entities: snapshot
                .entities
                .into_iter()
                .map(|e| (e.id.clone(), e))
                .collect(),
            tracker: DirtyTracker::from_parts(snapshot.changes, snapshot.next_change_id),
            cursors: snapshot.cursors.into_iter().collect(),
            identity: snapshot.identity,
            clock,
            in_flight: HashMap::new(),
        }
    }

    pub(crate) fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            sequence: 0,
            entities: self.entities.values().cloned().collect(),
            changes: self.tracker.pending(),
            next_change_id: self.tracker.next_change_id(),
            cursors: self
                .cursors
                .iter()
                .map(|(scope, cursor)| (scope.clone(), cursor.clone()))
                .collect(),
            identity: self.identity.clone(),
            clock: self.clock.last(),
        }
    }

    pub(crate) fn replay(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::Snapshot(snapshot) => *self = Self::from_snapshot(snapshot),
            JournalRecord::Commit(commit) => {
                for op in &commit.ops {
                    self.apply(op);
                }
            }
        }
    }

    pub(crate) fn apply(&mut self, op: &JournalOp) {
        match op {
            JournalOp::Put(entity) => {
                self.clock.observe(entity.modified);
                self.entities.insert(entity.id.clone(), entity.clone());
            }
            JournalOp::Purge(id) => {
                self.entities.remove(id);
            }
            JournalOp::Record(change) => {
                self.clock.observe(change.timestamp);
                self.tracker.restore(change.clone());
            }
            JournalOp::Acknowledge(ids) => {
                self.tracker.acknowledge(ids);
                for id in ids {
                    self.in_flight.remove(id);
                }
            }
            JournalOp::SetCursor { scope, cursor } => match cursor {
                Some(cursor) => {
                    self.cursors.insert(scope.clone(), cursor.clone());
                }
                None => {
                    self.cursors.remove(scope);
                }
            },
            JournalOp::BindIdentity(account) => self.identity = account.clone(),
            JournalOp::Observe(seen) => self.clock.observe(*seen),
            JournalOp::Clear => {
                self.entities.clear();
                self.tracker.clear();
                self.cursors.clear();
                self.identity = None;
                self.in_flight.clear();
            }
        }
    }
}
