//! The local store.
//!
//! All state lives in memory behind one lock and is made durable through the
//! journal. A mutating call builds the list of [`JournalOp`]s it needs,
//! appends them as one commit, and only then applies them in memory, so a
//! failed write leaves the visible state untouched.

use crate::change_feed::{ChangeFeed, StoreEvent};
use crate::clock::{SystemClock, TimeSource};
use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::filter::ListFilter;
use crate::journal::{Journal, JournalOp};
use crate::state::StoreState;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::{debug, info, warn};
use userdata_model::{
    ChangeRecord, Entity, EntityId, EntityKind, Operation, OutgoingChange, Payload,
    RemoteEntity, Resolution, SyncCursor, SyncState, Timestamp,
};
use userdata_storage::{FileBackend, InMemoryBackend, StorageBackend};

/// File name of the journal inside a store directory.
pub const JOURNAL_FILE: &str = "userdata.journal";

/// Who is writing to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOrigin {
    /// The application; the write is recorded in the dirty tracker.
    Local,
    /// The sync engine applying reconciled remote state; not recorded.
    Remote,
}

/// What to do with local data when the bound account goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Keep visible entities and queue them for upload to the next account.
    /// Cursors, tombstones and the change log are dropped.
    Dissociate,
    /// Wipe everything.
    Erase,
}

/// Counts produced by [`LocalStore::reconcile_page`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Remote versions written locally.
    pub applied: usize,
    /// Local versions kept over the remote one.
    pub kept_local: usize,
    /// Remote versions identical to what was already stored.
    pub unchanged: usize,
    /// Pending local changes dropped because the remote version won.
    pub discarded_changes: usize,
}

/// Pending changes captured for one push.
#[derive(Debug, Clone, Default)]
pub struct PushSnapshot {
    /// Changes in change-id order with the entity version to send.
    pub changes: Vec<OutgoingChange>,
    /// Highest change id included.
    pub high_water: Option<u64>,
}

impl PushSnapshot {
    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Summary counters for inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Stored entities, tombstones included.
    pub entities: usize,
    /// Tombstones.
    pub tombstones: usize,
    /// Entities with unacknowledged local changes.
    pub dirty: usize,
    /// Entities whose last push was rejected.
    pub conflicts: usize,
    /// Pending change records.
    pub pending_changes: usize,
    /// Number of cursors.
    pub cursors: usize,
    /// Bound account.
    pub identity: Option<String>,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Highest logical time issued or observed.
    pub clock: Timestamp,
}

/// Durable store of user-data entities with an integrated change log.
pub struct LocalStore {
    state: RwLock<StoreState>,
    journal: Mutex<Journal>,
    config: StoreConfig,
    time: Arc<dyn TimeSource>,
    feed: ChangeFeed,
    needs_repair: AtomicBool,
}

impl LocalStore {
    /// Opens a store over `backend`, replaying its journal.
    pub fn open(backend: Box<dyn StorageBackend>, config: StoreConfig) -> CoreResult<Self> {
        Self::open_with_clock(backend, config, Arc::new(SystemClock))
    }

    /// Opens a store with an explicit time source.
    pub fn open_with_clock(
        backend: Box<dyn StorageBackend>,
        config: StoreConfig,
        time: Arc<dyn TimeSource>,
    ) -> CoreResult<Self> {
        let mut journal = Journal::new(backend, config.sync_on_commit);
        let replay = journal.replay()?;

        let mut state = StoreState::new();
        let records = replay.records.len();
        for (_, record) in replay.records {
            state.replay(record);
        }
        info!(
            records,
            entities = state.entities.len(),
            pending_changes = state.tracker.len(),
            "local store opened"
        );

        Ok(Self {
            state: RwLock::new(state),
            journal: Mutex::new(journal),
            config,
            time,
            feed: ChangeFeed::new(),
            needs_repair: AtomicBool::new(false),
        })
    }

    /// Opens (or creates) the store kept in `dir`.
    pub fn open_dir(dir: impl AsRef<Path>, config: StoreConfig) -> CoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(&dir.as_ref().join(JOURNAL_FILE))?;
        Self::open(Box::new(backend), config)
    }

    /// Opens an empty, non-durable store.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open(Box::new(InMemoryBackend::new()), StoreConfig::default())
    }

    /// Returns the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Subscribes to post-commit events.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        self.feed.subscribe()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Returns the stored entity, tombstones included.
    pub fn get(&self, id: &EntityId) -> Option<Entity> {
        self.state.read().entities.get(id).cloned()
    }

    /// Returns the entity unless it is missing or a tombstone.
    pub fn get_visible(&self, id: &EntityId) -> Option<Entity> {
        self.get(id).filter(Entity::is_visible)
    }

    /// Lists entities of `kind` (all kinds for `None`) matching `filter`.
    pub fn list(&self, kind: Option<&EntityKind>, filter: &ListFilter) -> Vec<Entity> {
        let state = self.state.read();
        let selected = state
            .entities
            .values()
            .filter(|e| kind.map_or(true, |k| &e.kind == k))
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        filter.finish(selected)
    }

    /// Pending local changes in insertion order.
    pub fn pending_changes(&self) -> Vec<ChangeRecord> {
        self.state.read().tracker.pending()
    }

    /// Id of the newest pending change.
    pub fn last_change_id(&self) -> Option<u64> {
        self.state.read().tracker.last_change_id()
    }

    /// Returns the cursor of a sync scope.
    pub fn cursor(&self, scope: &str) -> Option<SyncCursor> {
        self.state.read().cursors.get(scope).cloned()
    }

    /// Returns the account the store is bound to.
    pub fn bound_identity(&self) -> Option<String> {
        self.state.read().identity.clone()
    }

    /// Returns true if a failed write left the journal in need of repair.
    pub fn needs_repair(&self) -> bool {
        self.needs_repair.load(Ordering::Acquire)
    }

    /// Returns summary counters.
    pub fn stats(&self) -> StoreStats {
        let state = self.state.read();
        let journal_bytes = self.journal.lock().size().unwrap_or(0);
        StoreStats {
            entities: state.entities.len(),
            tombstones: state.entities.values().filter(|e| e.deleted).count(),
            dirty: state
                .entities
                .values()
                .filter(|e| e.has_local_changes())
                .count(),
            conflicts: state
                .entities
                .values()
                .filter(|e| e.sync_state == SyncState::Conflict)
                .count(),
            pending_changes: state.tracker.len(),
            cursors: state.cursors.len(),
            identity: state.identity.clone(),
            journal_bytes,
            clock: state.clock.last(),
        }
    }

    // ------------------------------------------------------------------
    // Local writes
    // ------------------------------------------------------------------

    /// Inserts or replaces an entity on behalf of the application.
    ///
    /// Assigns a fresh logical timestamp, marks the entity dirty and records
    /// the change in the same commit. Returns the stored version.
    pub fn put(&self, entity: Entity) -> CoreResult<Entity> {
        let mut state = self.state.write();
        let mut batch = LocalBatch::new(&state);
        let stored = batch.write(&mut state, entity, self.time.now())?;
        let sequence = self.commit(&mut state, batch.ops)?;
        drop(state);

        self.feed.emit(StoreEvent::changed(
            sequence,
            WriteOrigin::Local,
            vec![stored.id.clone()],
        ));
        Ok(stored)
    }

    /// Writes a tombstone for `id`.
    ///
    /// Returns false if there was no visible entity to delete.
    pub fn delete(&self, id: &EntityId) -> CoreResult<bool> {
        let mut state = self.state.write();
        let Some(existing) = state.entities.get(id).filter(|e| e.is_visible()).cloned() else {
            return Ok(false);
        };

        let mut tombstone = existing;
        tombstone.deleted = true;
        tombstone.payload = Payload::empty();

        let mut batch = LocalBatch::new(&state);
        batch.write(&mut state, tombstone, self.time.now())?;
        let sequence = self.commit(&mut state, batch.ops)?;
        drop(state);

        self.feed.emit(StoreEvent::changed(
            sequence,
            WriteOrigin::Local,
            vec![id.clone()],
        ));
        Ok(true)
    }

    /// Writes several entities in one atomic, durable commit.
    ///
    /// With [`WriteOrigin::Local`] each entity is written as by [`put`]
    /// (tombstones as by [`delete`]). With [`WriteOrigin::Remote`] the
    /// entities are already reconciled remote versions: they are stored
    /// clean, their pending local changes are dropped, and nothing is
    /// recorded in the change log.
    ///
    /// [`put`]: Self::put
    /// [`delete`]: Self::delete
    pub fn apply_batch(&self, entities: Vec<Entity>, origin: WriteOrigin) -> CoreResult<()> {
        if entities.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write();
        let ids: Vec<EntityId> = entities.iter().map(|e| e.id.clone()).collect();
        let ops = match origin {
            WriteOrigin::Local => {
                let mut batch = LocalBatch::new(&state);
                let now = self.time.now();
                for entity in entities {
                    batch.write(&mut state, entity, now)?;
                }
                batch.ops
            }
            WriteOrigin::Remote => {
                let mut ops = Vec::with_capacity(entities.len() + 1);
                let mut dropped = HashSet::new();
                for entity in entities {
                    let stale: Vec<u64> = state
                        .tracker
                        .pending_for(&entity.id)
                        .into_iter()
                        .map(|c| c.change_id)
                        .filter(|id| dropped.insert(*id))
                        .collect();
                    if !stale.is_empty() {
                        ops.push(JournalOp::Acknowledge(stale));
                    }
                    ops.push(JournalOp::Put(Entity::from_remote(entity.to_remote())));
                }
                ops
            }
        };

        let sequence = self.commit(&mut state, ops)?;
        drop(state);
        self.feed.emit(StoreEvent::changed(sequence, origin, ids));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sync support
    // ------------------------------------------------------------------

    /// Reconciles one pulled page against local state.
    ///
    /// `decide` is called for every remote version with the current local
    /// version (reflecting earlier entries of the same page) and must return
    /// which side wins. The whole page is applied as a single commit while
    /// the store lock is held, so local writes cannot interleave with it.
    ///
    /// Accepting a remote version drops the entity's pending local changes.
    /// Keeping the local version guarantees that a pending change exists so
    /// that it is pushed.
    pub fn reconcile_page<F>(
        &self,
        remote: Vec<RemoteEntity>,
        mut decide: F,
    ) -> CoreResult<ReconcileOutcome>
    where
        F: FnMut(Option<&Entity>, &RemoteEntity) -> Resolution,
    {
        let mut outcome = ReconcileOutcome::default();
        if remote.is_empty() {
            return Ok(outcome);
        }

        let mut state = self.state.write();
        let mut ops = Vec::new();
        let mut working: HashMap<EntityId, Entity> = HashMap::new();
        let mut dropped: HashSet<u64> = HashSet::new();
        let mut requeued: HashSet<EntityId> = HashSet::new();
        let mut changed = Vec::new();
        let mut next_change_id = state.tracker.next_change_id();
        let mut newest = Timestamp::ZERO;

        for version in remote {
            newest = newest.max(version.modified);
            let local = working
                .get(&version.id)
                .or_else(|| state.entities.get(&version.id))
                .cloned();

            let resolution = match (&local, decide(local.as_ref(), &version)) {
                (None, Resolution::KeepLocal) => {
                    warn!(entity_id = %version.id, "no local version to keep; accepting remote");
                    Resolution::AcceptRemote
                }
                (_, resolution) => resolution,
            };

            match resolution {
                Resolution::AcceptRemote => {
                    let incoming = Entity::from_remote(version);
                    if let Some(current) = &local {
                        if current.sync_state == SyncState::Clean && current.same_content(&incoming)
                        {
                            outcome.unchanged += 1;
                            continue;
                        }
                    }

                    let stale: Vec<u64> = state
                        .tracker
                        .pending_for(&incoming.id)
                        .into_iter()
                        .map(|c| c.change_id)
                        .filter(|id| dropped.insert(*id))
                        .collect();
                    if !stale.is_empty() {
                        debug!(entity_id = %incoming.id, changes = stale.len(), "discarding local changes");
                        outcome.discarded_changes += stale.len();
                        ops.push(JournalOp::Acknowledge(stale));
                    }
                    requeued.remove(&incoming.id);

                    outcome.applied += 1;
                    changed.push(incoming.id.clone());
                    ops.push(JournalOp::Put(incoming.clone()));
                    working.insert(incoming.id.clone(), incoming);
                }
                Resolution::KeepLocal => {
                    outcome.kept_local += 1;
                    let Some(mut current) = local else { continue };

                    let still_pending = requeued.contains(&current.id)
                        || state
                            .tracker
                            .pending_for(&current.id)
                            .iter()
                            .any(|c| !dropped.contains(&c.change_id));
                    if still_pending {
                        continue;
                    }

                    let operation = if current.deleted {
                        Operation::Delete
                    } else {
                        Operation::Update
                    };
                    ops.push(JournalOp::Record(ChangeRecord::new(
                        next_change_id,
                        current.id.clone(),
                        operation,
                        current.modified,
                    )));
                    next_change_id += 1;
                    current.sync_state = SyncState::Dirty;
                    requeued.insert(current.id.clone());
                    ops.push(JournalOp::Put(current.clone()));
                    working.insert(current.id.clone(), current);
                }
            }
        }

        if newest > state.clock.last() {
            ops.push(JournalOp::Observe(newest));
        }
        if ops.is_empty() {
            return Ok(outcome);
        }

        let sequence = self.commit(&mut state, ops)?;
        drop(state);
        if !changed.is_empty() {
            self.feed
                .emit(StoreEvent::changed(sequence, WriteOrigin::Remote, changed));
        }
        Ok(outcome)
    }

    /// Captures every pending change together with the entity version to
    /// send, and marks those entities as pending push.
    ///
    /// Changes recorded after this call are not part of the snapshot.
    pub fn snapshot_for_push(&self) -> PushSnapshot {
        let mut state = self.state.write();
        let pending = state.tracker.pending();
        let mut changes = Vec::with_capacity(pending.len());

        for change in pending {
            let Some(entity) = state.entities.get_mut(&change.entity_id) else {
                warn!(change_id = change.change_id, entity_id = %change.entity_id, "change without entity");
                continue;
            };
            if entity.sync_state == SyncState::Dirty {
                entity.sync_state = SyncState::PendingPush;
            }
            let version = entity.to_remote();
            let sent = version.modified;
            changes.push(OutgoingChange {
                change_id: change.change_id,
                operation: change.operation,
                entity: version,
            });
            state.in_flight.insert(change.change_id, sent);
        }

        PushSnapshot {
            high_water: changes.last().map(|c| c.change_id),
            changes,
        }
    }

    /// Removes acknowledged changes from the log.
    ///
    /// Entities with no remaining pending change become clean and remember
    /// the acknowledged version as the last common point. Unknown ids are
    /// ignored. Returns the number of changes removed.
    pub fn acknowledge(&self, change_ids: &[u64]) -> CoreResult<usize> {
        self.settle(change_ids, SyncState::Clean)
    }

    /// Drops changes the remote rejected and marks their entities as
    /// conflicting, so the next pulled version replaces them.
    pub fn mark_rejected(&self, change_ids: &[u64]) -> CoreResult<usize> {
        self.settle(change_ids, SyncState::Conflict)
    }

    fn settle(&self, change_ids: &[u64], settled: SyncState) -> CoreResult<usize> {
        let mut state = self.state.write();
        let present: Vec<ChangeRecord> = change_ids
            .iter()
            .filter_map(|id| state.tracker.get(*id).cloned())
            .collect();
        if present.is_empty() {
            return Ok(0);
        }

        let removed: HashSet<u64> = present.iter().map(|c| c.change_id).collect();
        let mut sent_versions: HashMap<EntityId, Timestamp> = HashMap::new();
        for change in &present {
            let sent = state
                .in_flight
                .get(&change.change_id)
                .copied()
                .unwrap_or(change.timestamp);
            let entry = sent_versions.entry(change.entity_id.clone()).or_insert(sent);
            *entry = (*entry).max(sent);
        }

        let mut ops = vec![JournalOp::Acknowledge(removed.iter().copied().collect())];
        for (id, sent) in sent_versions {
            let Some(mut entity) = state.entities.get(&id).cloned() else {
                continue;
            };
            let remaining = state
                .tracker
                .pending_for(&id)
                .iter()
                .any(|c| !removed.contains(&c.change_id));

            match settled {
                SyncState::Conflict => {
                    warn!(entity_id = %id, "push rejected; waiting for remote version");
                    if !remaining {
                        entity.sync_state = SyncState::Conflict;
                    }
                }
                _ => {
                    entity.synced_at = Some(entity.synced_at.map_or(sent, |at| at.max(sent)));
                    entity.sync_state = if remaining {
                        SyncState::Dirty
                    } else {
                        SyncState::Clean
                    };
                }
            }
            ops.push(JournalOp::Put(entity));
        }

        let count = present.len();
        self.commit(&mut state, ops)?;
        Ok(count)
    }

    /// Returns entities left in pending-push state to dirty after a push
    /// ended early.
    pub fn abandon_push(&self) {
        let mut state = self.state.write();
        state.in_flight.clear();
        for entity in state.entities.values_mut() {
            if entity.sync_state == SyncState::PendingPush {
                entity.sync_state = SyncState::Dirty;
            }
        }
    }

    /// Persists the cursor of a sync scope.
    pub fn set_cursor(&self, scope: &str, cursor: Option<SyncCursor>) -> CoreResult<()> {
        let mut state = self.state.write();
        if state.cursors.get(scope) == cursor.as_ref() {
            return Ok(());
        }
        debug!(scope, cursor = ?cursor, "persisting cursor");
        self.commit(
            &mut state,
            vec![JournalOp::SetCursor {
                scope: scope.to_string(),
                cursor,
            }],
        )?;
        Ok(())
    }

    /// Physically removes tombstones older than the retention window that
    /// the remote already knows about.
    pub fn purge_tombstones(&self) -> CoreResult<usize> {
        let cutoff = self
            .time
            .now()
            .saturating_sub(self.config.tombstone_retention);
        let mut state = self.state.write();
        let ops: Vec<JournalOp> = state
            .entities
            .values()
            .filter(|e| {
                e.deleted
                    && e.sync_state == SyncState::Clean
                    && e.modified < cutoff
                    && !state.tracker.has_pending_for(&e.id)
            })
            .map(|e| JournalOp::Purge(e.id.clone()))
            .collect();

        let count = ops.len();
        if count > 0 {
            self.commit(&mut state, ops)?;
            info!(count, "purged expired tombstones");
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// Binds the store to an account.
    pub fn bind_identity(&self, account_id: &str) -> CoreResult<()> {
        let mut state = self.state.write();
        if state.identity.as_deref() == Some(account_id) {
            return Ok(());
        }
        self.commit(
            &mut state,
            vec![JournalOp::BindIdentity(Some(account_id.to_string()))],
        )?;
        Ok(())
    }

    /// Tears down the sync state of the bound account.
    pub fn reset(&self, mode: ResetMode) -> CoreResult<()> {
        let mut state = self.state.write();
        let ops = match mode {
            ResetMode::Erase => vec![JournalOp::Clear],
            ResetMode::Dissociate => {
                let mut ops: Vec<JournalOp> = state
                    .cursors
                    .keys()
                    .map(|scope| JournalOp::SetCursor {
                        scope: scope.clone(),
                        cursor: None,
                    })
                    .collect();
                let pending: Vec<u64> = state
                    .tracker
                    .pending()
                    .iter()
                    .map(|c| c.change_id)
                    .collect();
                if !pending.is_empty() {
                    ops.push(JournalOp::Acknowledge(pending));
                }
                ops.push(JournalOp::BindIdentity(None));

                let mut next_change_id = state.tracker.next_change_id();
                for entity in state.entities.values() {
                    if entity.deleted {
                        ops.push(JournalOp::Purge(entity.id.clone()));
                        continue;
                    }
                    let mut requeued = entity.clone();
                    requeued.sync_state = SyncState::Dirty;
                    requeued.synced_at = None;
                    ops.push(JournalOp::Record(ChangeRecord::new(
                        next_change_id,
                        entity.id.clone(),
                        Operation::Create,
                        entity.modified,
                    )));
                    next_change_id += 1;
                    ops.push(JournalOp::Put(requeued));
                }
                ops
            }
        };

        let sequence = self.commit(&mut state, ops)?;
        info!(?mode, "local store reset");

        if mode == ResetMode::Erase {
            if let Err(err) = self.compact_locked(&state) {
                warn!(error = %err, "compaction after erase failed");
            }
        }
        drop(state);
        self.feed
            .emit(StoreEvent::cleared(sequence, WriteOrigin::Local));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Rewrites the journal as a single snapshot of the current state.
    pub fn compact(&self) -> CoreResult<()> {
        let state = self.state.read();
        self.compact_locked(&state)
    }

    /// Rewrites the journal from the last committed in-memory state after a
    /// failed write, and re-enables mutations.
    pub fn repair(&self) -> CoreResult<()> {
        let state = self.state.read();
        self.compact_locked(&state)?;
        if self.needs_repair.swap(false, Ordering::AcqRel) {
            info!("local store repaired");
        }
        Ok(())
    }

    fn compact_locked(&self, state: &StoreState) -> CoreResult<()> {
        let mut journal = self.journal.lock();
        let before = journal.size()?;
        journal.write_snapshot(state.to_snapshot())?;
        debug!(before, after = journal.size()?, "journal compacted");
        Ok(())
    }

    /// Appends `ops` as one commit and applies them to `state`.
    fn commit(&self, state: &mut StoreState, ops: Vec<JournalOp>) -> CoreResult<u64> {
        if self.needs_repair.load(Ordering::Acquire) {
            return Err(CoreError::RepairRequired);
        }

        let mut journal = self.journal.lock();
        let sequence = match journal.append(&ops) {
            Ok(sequence) => sequence,
            Err(err) => {
                // A cleanly rolled back append leaves journal and state in
                // step; only a poisoned journal blocks further writes.
                if journal.is_poisoned() {
                    warn!(error = %err, "journal append failed; store needs repair");
                    self.needs_repair.store(true, Ordering::Release);
                } else {
                    warn!(error = %err, "journal append failed and was rolled back");
                }
                return Err(err);
            }
        };

        for op in &ops {
            state.apply(op);
        }

        let threshold = self.config.compact_threshold_bytes;
        if threshold > 0 && journal.size().map_or(false, |size| size > threshold) {
            if let Err(err) = journal.write_snapshot(state.to_snapshot()) {
                warn!(error = %err, "automatic compaction failed");
            }
        }
        Ok(sequence)
    }
}

/// Accumulates the ops of a local write batch, tracking ids and the working
/// view so several writes to one entity in a batch behave like sequential
/// puts.
struct LocalBatch {
    ops: Vec<JournalOp>,
    next_change_id: u64,
    working: HashMap<EntityId, Entity>,
}

impl LocalBatch {
    fn new(state: &StoreState) -> Self {
        Self {
            ops: Vec::new(),
            next_change_id: state.tracker.next_change_id(),
            working: HashMap::new(),
        }
    }

    fn write(&mut self, state: &mut StoreState, entity: Entity, now: Timestamp) -> CoreResult<Entity> {
        let existing = self
            .working
            .get(&entity.id)
            .or_else(|| state.entities.get(&entity.id));

        if let Some(existing) = existing {
            if existing.kind != entity.kind {
                return Err(CoreError::KindMismatch {
                    entity_id: entity.id,
                    stored: existing.kind.clone(),
                    requested: entity.kind,
                });
            }
        }

        let operation = match existing {
            _ if entity.deleted => Operation::Delete,
            Some(e) if e.is_visible() => Operation::Update,
            _ => Operation::Create,
        };
        let synced_at = existing.and_then(|e| e.synced_at);

        let modified = state.clock.tick(now);
        let stored = Entity {
            modified,
            sync_state: SyncState::Dirty,
            synced_at,
            payload: if entity.deleted {
                Payload::empty()
            } else {
                entity.payload
            },
            ..entity
        };

        self.ops.push(JournalOp::Put(stored.clone()));
        self.ops.push(JournalOp::Record(ChangeRecord::new(
            self.next_change_id,
            stored.id.clone(),
            operation,
            modified,
        )));
        self.next_change_id += 1;
        self.working.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }
}
