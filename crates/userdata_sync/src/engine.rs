//! Sync engine state machine.
//!
//! One [`SyncEngine::sync`] call runs a complete cycle for one identity:
//!
//! ```text
//! Idle -> Pulling -> Reconciling -> (Pulling ...) -> Pushing -> Idle
//!              \__________ Suspended / Failed __________/
//! ```
//!
//! The cycle is blocking; [`SyncScheduler`](crate::SyncScheduler) runs it on
//! a blocking worker and makes sure only one runs at a time.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::identity::IdentityGate;
use crate::reconcile::{reconcile, Verdict};
use crate::remote::{RemoteClient, RemoteResult};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use userdata_core::{CoreResult, LocalStore, PushSnapshot, ResetMode};
use userdata_model::{ConflictRecord, Identity, PullRequest, PushRequest, SyncCursor};

/// Capacity of the status event channel.
const EVENT_CAPACITY: usize = 64;

/// Granularity of interruptible backoff sleeps.
const PAUSE_SLICE: Duration = Duration::from_millis(20);

/// The current phase of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No cycle running.
    Idle,
    /// Fetching remote pages.
    Pulling,
    /// Applying a pulled page to the local store.
    Reconciling,
    /// Sending local changes.
    Pushing,
    /// Waiting for an identity, for connectivity, or for a refreshed
    /// identity after a permanent failure.
    Suspended,
    /// The last cycle failed; a later one will retry.
    Failed,
}

impl SyncPhase {
    /// Returns true while a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncPhase::Pulling | SyncPhase::Reconciling | SyncPhase::Pushing
        )
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles completed successfully.
    pub cycles_completed: u64,
    /// Cycles that ended with an error.
    pub cycles_failed: u64,
    /// Remote versions received.
    pub entities_pulled: u64,
    /// Local changes acknowledged by the remote.
    pub changes_pushed: u64,
    /// True conflicts resolved.
    pub conflicts_resolved: u64,
    /// Remote calls retried after a transient failure.
    pub retries: u64,
    /// End of the last successful cycle.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Remote versions received.
    pub pulled: usize,
    /// Remote versions written locally.
    pub applied: usize,
    /// Remote versions that lost against a local version.
    pub kept_local: usize,
    /// Remote versions identical to the stored one.
    pub unchanged: usize,
    /// True conflicts, with their outcome.
    pub conflicts: Vec<ConflictRecord>,
    /// Changes acknowledged by the remote.
    pub pushed: usize,
    /// Changes rejected by the remote.
    pub rejected: usize,
    /// Changes sent but neither acknowledged nor rejected; they stay queued.
    pub deferred: usize,
    /// Pages pulled.
    pub pages: usize,
    /// Tombstones purged after the cycle.
    pub purged: usize,
    /// Wall time of the cycle.
    pub duration: Duration,
    /// Cursor at the end of the cycle.
    pub cursor: Option<SyncCursor>,
}

impl SyncReport {
    /// Returns true if the cycle changed nothing locally or remotely.
    pub fn is_noop(&self) -> bool {
        self.applied == 0 && self.kept_local == 0 && self.pushed == 0 && self.rejected == 0
    }
}

/// Status notifications published by the engine.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The engine moved to another phase.
    PhaseChanged(SyncPhase),
    /// A cycle completed.
    CycleCompleted(SyncReport),
    /// A cycle failed.
    CycleFailed {
        /// Rendered error.
        error: String,
        /// Whether a later cycle may succeed on its own.
        retryable: bool,
        /// Whether the failure should be shown to the user.
        surfaced: bool,
    },
    /// Local sync state was torn down for an identity change.
    IdentityReset {
        /// Reset applied to the local store.
        mode: ResetMode,
    },
}

/// The sync engine reconciles the local store with the remote service.
pub struct SyncEngine<R: RemoteClient + ?Sized, G: IdentityGate + ?Sized> {
    config: SyncConfig,
    remote: Arc<R>,
    gate: Arc<G>,
    store: Arc<LocalStore>,
    phase: RwLock<SyncPhase>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
    suspended_for: Mutex<Option<Identity>>,
    consecutive_failures: AtomicU32,
    events: broadcast::Sender<SyncEvent>,
}

impl<R: RemoteClient + ?Sized, G: IdentityGate + ?Sized> SyncEngine<R, G> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, remote: Arc<R>, gate: Arc<G>, store: Arc<LocalStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            remote,
            gate,
            store,
            phase: RwLock::new(SyncPhase::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
            suspended_for: Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
            events,
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the local store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Gets the remote client.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Gets the identity gate.
    pub fn gate(&self) -> &Arc<G> {
        &self.gate
    }

    /// Gets the current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Number of cycles that failed in a row.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Subscribes to status events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Returns true if sync is suspended for `identity` after a permanent
    /// failure.
    pub fn is_suspended_for(&self, identity: &Identity) -> bool {
        self.suspended_for.lock().as_ref() == Some(identity)
    }

    /// Lifts a suspension without waiting for an identity change.
    pub fn clear_suspension(&self) {
        if self.suspended_for.lock().take().is_some() {
            info!("sync suspension cleared");
        }
    }

    /// Cancels the running cycle at its next checkpoint.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        let previous = std::mem::replace(&mut *self.phase.write(), phase);
        if previous != phase {
            debug!(from = ?previous, to = ?phase, "sync phase changed");
            let _ = self.events.send(SyncEvent::PhaseChanged(phase));
        }
    }

    /// Runs a cycle for the gate's current identity.
    pub fn run_cycle(&self) -> SyncResult<SyncReport> {
        match self.gate.current_identity() {
            Some(identity) => self.sync(&identity),
            None => {
                let err = SyncError::NoIdentity;
                self.handle_error(None, &err);
                Err(err)
            }
        }
    }

    /// Performs a full sync cycle for `identity`: pull every page, then push
    /// every pending change.
    pub fn sync(&self, identity: &Identity) -> SyncResult<SyncReport> {
        self.reset_cancel();
        self.sync_uncancelled(identity)
    }

    /// Like [`sync`](Self::sync), but honours a cancellation requested
    /// before the cycle started.
    pub(crate) fn sync_uncancelled(&self, identity: &Identity) -> SyncResult<SyncReport> {
        let start = Instant::now();
        let mut report = SyncReport::default();

        match self.run(identity, &mut report) {
            Ok(()) => {
                report.duration = start.elapsed();
                report.cursor = self.store.cursor(&self.config.scope);
                self.set_phase(SyncPhase::Idle);
                self.consecutive_failures.store(0, Ordering::SeqCst);
                {
                    let mut stats = self.stats.write();
                    stats.cycles_completed += 1;
                    stats.entities_pulled += report.pulled as u64;
                    stats.changes_pushed += report.pushed as u64;
                    stats.conflicts_resolved += report.conflicts.len() as u64;
                    stats.last_sync_time = Some(Instant::now());
                    stats.last_error = None;
                }
                info!(
                    account_id = %identity.account_id,
                    pulled = report.pulled,
                    applied = report.applied,
                    pushed = report.pushed,
                    conflicts = report.conflicts.len(),
                    duration_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
                    "sync cycle completed"
                );
                let _ = self.events.send(SyncEvent::CycleCompleted(report.clone()));
                Ok(report)
            }
            Err(err) => {
                self.handle_error(Some(identity), &err);
                Err(err)
            }
        }
    }

    fn run(&self, identity: &Identity, report: &mut SyncReport) -> SyncResult<()> {
        {
            let mut suspended = self.suspended_for.lock();
            match suspended.as_ref() {
                Some(rejected) if rejected == identity => return Err(SyncError::Suspended),
                Some(_) => {
                    info!(account_id = %identity.account_id, "identity refreshed; resuming sync");
                    *suspended = None;
                }
                None => {}
            }
        }

        if let Some(bound) = self.store.bound_identity() {
            if bound != identity.account_id {
                info!(previous = %bound, account_id = %identity.account_id, "store bound to another account");
                self.reset_for_identity_change(self.config.logout_policy.reset_mode())?;
            }
        }
        self.with_storage_retry(|| self.store.bind_identity(&identity.account_id))?;

        if !self.remote.is_reachable() {
            return Err(SyncError::Offline);
        }

        self.pull_all(identity, report)?;
        self.push_all(identity, report)?;

        match self.store.purge_tombstones() {
            Ok(purged) => report.purged = purged,
            Err(err) => warn!(error = %err, "tombstone purge failed"),
        }
        Ok(())
    }

    /// Pulls and reconciles every page after the stored cursor.
    ///
    /// The cursor of a page is persisted only after the page is applied, in
    /// a separate commit, so a crash in between re-pulls the same page.
    fn pull_all(&self, identity: &Identity, report: &mut SyncReport) -> SyncResult<()> {
        let scope = self.config.scope.as_str();

        loop {
            self.check_cancelled()?;
            self.set_phase(SyncPhase::Pulling);

            let cursor = self.store.cursor(scope);
            let request = PullRequest::new(
                self.config.device_id.clone(),
                cursor.clone(),
                self.config.pull_batch_size,
            );
            let page = self.with_retry("pull", || self.remote.pull(identity, &request))?;
            debug!(entities = page.entities.len(), has_more = page.has_more, cursor = ?page.next_cursor, "page pulled");

            // A page pulled but not applied is dropped with the cursor untouched.
            self.check_cancelled()?;
            self.set_phase(SyncPhase::Reconciling);

            report.pages += 1;
            report.pulled += page.entities.len();

            let mut conflicts = Vec::new();
            let outcome = self.with_storage_retry(|| {
                conflicts.clear();
                self.store
                    .reconcile_page(page.entities.clone(), |local, remote| {
                        let verdict = reconcile(local, remote).unwrap_or_else(|err| {
                            error!(entity_id = %remote.id, error = %err, "cannot reconcile; accepting remote");
                            Verdict::fallback()
                        });
                        if let Some(conflict) = verdict.conflict {
                            info!(
                                entity_id = %conflict.entity_id(),
                                resolution = ?verdict.resolution,
                                reason = ?verdict.reason,
                                "conflict resolved"
                            );
                            conflicts.push(conflict);
                        }
                        verdict.resolution
                    })
            })?;
            report.applied += outcome.applied;
            report.kept_local += outcome.kept_local;
            report.unchanged += outcome.unchanged;
            report.conflicts.extend(conflicts);

            let advanced = cursor.as_ref() != Some(&page.next_cursor);
            self.with_storage_retry(|| self.store.set_cursor(scope, Some(page.next_cursor.clone())))?;

            if !page.has_more {
                return Ok(());
            }
            if !advanced {
                warn!(cursor = ?page.next_cursor, "remote reported more pages without advancing the cursor");
                return Ok(());
            }
        }
    }

    /// Pushes a consistent snapshot of the pending changes.
    ///
    /// Changes recorded while the push runs are left for the next cycle.
    fn push_all(&self, identity: &Identity, report: &mut SyncReport) -> SyncResult<()> {
        self.check_cancelled()?;
        let snapshot = self.store.snapshot_for_push();
        if snapshot.is_empty() {
            return Ok(());
        }

        self.set_phase(SyncPhase::Pushing);
        let result = self.push_snapshot(identity, &snapshot, report);
        self.store.abandon_push();
        result
    }

    fn push_snapshot(
        &self,
        identity: &Identity,
        snapshot: &PushSnapshot,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        for batch in snapshot.changes.chunks(self.config.push_batch_size) {
            self.check_cancelled()?;

            let request = PushRequest::new(self.config.device_id.clone(), batch.to_vec());
            let ack = self.with_retry("push", || self.remote.push(identity, &request))?;

            // Ids outside the batch are ignored; an id both acknowledged and
            // rejected counts as acknowledged.
            let sent: HashSet<u64> = batch.iter().map(|c| c.change_id).collect();
            let acknowledged: BTreeSet<u64> = ack
                .acknowledged
                .into_iter()
                .filter(|id| sent.contains(id))
                .collect();
            let rejected: BTreeSet<u64> = ack
                .rejected
                .into_iter()
                .filter(|id| sent.contains(id) && !acknowledged.contains(id))
                .collect();
            let acknowledged: Vec<u64> = acknowledged.into_iter().collect();
            let rejected: Vec<u64> = rejected.into_iter().collect();

            if !acknowledged.is_empty() {
                self.with_storage_retry(|| self.store.acknowledge(&acknowledged))?;
            }
            if !rejected.is_empty() {
                warn!(count = rejected.len(), "remote rejected pushed changes");
                self.with_storage_retry(|| self.store.mark_rejected(&rejected))?;
            }

            let deferred = sent
                .len()
                .saturating_sub(acknowledged.len() + rejected.len());
            if deferred > 0 {
                debug!(deferred, "changes left unconfirmed; kept for the next cycle");
            }
            report.pushed += acknowledged.len();
            report.rejected += rejected.len();
            report.deferred += deferred;
        }
        Ok(())
    }

    /// Calls the remote, retrying transient failures with backoff.
    fn with_retry<T>(
        &self,
        operation: &'static str,
        mut call: impl FnMut() -> RemoteResult<T>,
    ) -> SyncResult<T> {
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt + 1 < retry.max_attempts => {
                    attempt += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "remote call failed; retrying"
                    );
                    self.stats.write().retries += 1;
                    self.pause(delay)?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Runs a store operation, repairing the store and retrying once after
    /// a storage failure.
    fn with_storage_retry<T>(&self, mut op: impl FnMut() -> CoreResult<T>) -> SyncResult<T> {
        match op() {
            Ok(value) => Ok(value),
            Err(err) if err.is_storage_failure() => {
                warn!(error = %err, "local store write failed; repairing and retrying once");
                self.store.repair()?;
                Ok(op()?)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Sleeps for `delay`, waking early on cancellation.
    fn pause(&self, delay: Duration) -> SyncResult<()> {
        let deadline = Instant::now() + delay;
        loop {
            self.check_cancelled()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(PAUSE_SLICE.min(deadline - now));
        }
    }

    /// Tears down local sync state after a logout or an account switch.
    ///
    /// Cursors and pending changes never carry over to another account.
    /// With [`ResetMode::Dissociate`] visible entities stay and are queued
    /// for upload to the next account.
    pub fn reset_for_identity_change(&self, mode: ResetMode) -> SyncResult<()> {
        self.with_storage_retry(|| self.store.reset(mode))?;
        *self.suspended_for.lock() = None;
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.set_phase(SyncPhase::Idle);
        info!(?mode, "sync state reset for identity change");
        let _ = self.events.send(SyncEvent::IdentityReset { mode });
        Ok(())
    }

    /// Handles an error by updating phase, stats and suspension.
    fn handle_error(&self, identity: Option<&Identity>, err: &SyncError) {
        if matches!(err, SyncError::Cancelled) {
            info!("sync cycle cancelled");
            self.set_phase(SyncPhase::Idle);
            return;
        }

        let phase = if err.suspends() || matches!(err, SyncError::Offline) {
            SyncPhase::Suspended
        } else {
            SyncPhase::Failed
        };
        self.set_phase(phase);

        if let (SyncError::Permanent(remote_err), Some(identity)) = (err, identity) {
            error!(account_id = %identity.account_id, error = %remote_err, "permanent sync failure; suspending");
            self.gate.report_rejected(identity, remote_err);
            *self.suspended_for.lock() = Some(identity.clone());
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let retryable = err.is_retryable();
        let surfaced = !retryable || failures >= self.config.retry.failure_ceiling;
        if retryable && !surfaced {
            warn!(error = %err, failures, "sync cycle failed; will retry");
        } else {
            error!(error = %err, failures, "sync cycle failed");
        }

        {
            let mut stats = self.stats.write();
            stats.cycles_failed += 1;
            stats.last_error = Some(err.to_string());
        }
        let _ = self.events.send(SyncEvent::CycleFailed {
            error: err.to_string(),
            retryable,
            surfaced,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogoutPolicy, RetryConfig, DEFAULT_SCOPE};
    use crate::identity::SessionGate;
    use crate::remote::{MockRemote, RemoteError};
    use std::sync::{OnceLock, Weak};
    use userdata_model::{
        Entity, EntityId, EntityKind, PullPage, PushAck, RemoteEntity, SyncState, Timestamp,
    };

    type TestEngine = SyncEngine<MockRemote, SessionGate>;

    fn engine_with(config: SyncConfig) -> (TestEngine, Arc<MockRemote>, Arc<SessionGate>) {
        let remote = Arc::new(MockRemote::new());
        let gate = Arc::new(SessionGate::with_identity(Some(identity())));
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let engine = SyncEngine::new(config, remote.clone(), gate.clone(), store);
        (engine, remote, gate)
    }

    fn engine() -> (TestEngine, Arc<MockRemote>, Arc<SessionGate>) {
        engine_with(
            SyncConfig::new("device-a").with_retry(
                RetryConfig::new(3)
                    .with_initial_delay(Duration::from_millis(1))
                    .with_jitter(false),
            ),
        )
    }

    fn identity() -> Identity {
        Identity::new("acct-1", "token-1")
    }

    fn remote_entity(id: &str, ms: u64) -> RemoteEntity {
        RemoteEntity::new(id, EntityKind::History, vec![ms as u8], Timestamp::from_millis(ms))
    }

    #[test]
    fn empty_cycle_is_idle_noop() {
        let (engine, _, _) = engine();
        let report = engine.sync(&identity()).unwrap();
        assert!(report.is_noop());
        assert_eq!(engine.phase(), SyncPhase::Idle);
        assert_eq!(engine.stats().cycles_completed, 1);
        assert_eq!(engine.store().bound_identity().as_deref(), Some("acct-1"));
    }

    #[test]
    fn pulls_every_page_and_advances_cursor() {
        let (engine, remote, _) = engine();
        remote.queue_pull(Ok(PullPage::new(
            vec![remote_entity("urn:a", 10)],
            SyncCursor::new("1"),
            true,
        )));
        remote.queue_pull(Ok(PullPage::new(
            vec![remote_entity("urn:b", 11)],
            SyncCursor::new("2"),
            false,
        )));

        let report = engine.sync(&identity()).unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(report.applied, 2);
        assert_eq!(report.cursor, Some(SyncCursor::new("2")));

        let stored = engine.store().get(&EntityId::new("urn:a")).unwrap();
        assert_eq!(stored.sync_state, SyncState::Clean);
        assert!(engine.store().pending_changes().is_empty());

        let requests = remote.pull_requests();
        assert_eq!(requests[0].cursor, None);
        assert_eq!(requests[1].cursor, Some(SyncCursor::new("1")));
    }

    #[test]
    fn pushes_local_changes_and_empties_log() {
        let (engine, remote, _) = engine();
        engine
            .store()
            .put(Entity::new("urn:e1", EntityKind::Bookmark, vec![1]))
            .unwrap();

        let report = engine.sync(&identity()).unwrap();
        assert_eq!(report.pushed, 1);
        assert!(engine.store().pending_changes().is_empty());
        assert_eq!(remote.pushed().len(), 1);

        let stored = engine.store().get(&EntityId::new("urn:e1")).unwrap();
        assert_eq!(stored.sync_state, SyncState::Clean);
        assert_eq!(stored.synced_at, Some(stored.modified));
    }

    #[test]
    fn push_batches_respect_batch_size() {
        let (engine, remote, _) = engine_with(SyncConfig::new("d").with_push_batch_size(2));
        for i in 0..5 {
            engine
                .store()
                .put(Entity::new(format!("urn:{i}"), EntityKind::History, vec![i]))
                .unwrap();
        }
        let report = engine.sync(&identity()).unwrap();
        assert_eq!(report.pushed, 5);
        let sizes: Vec<usize> = remote.pushed().iter().map(|r| r.changes.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn transient_failures_are_retried() {
        let (engine, remote, _) = engine();
        remote.queue_pull(Err(RemoteError::Timeout));
        remote.queue_pull(Err(RemoteError::Server {
            status: 503,
            message: "busy".into(),
        }));

        engine.sync(&identity()).unwrap();
        assert_eq!(engine.stats().retries, 2);
        assert_eq!(remote.pull_requests().len(), 3);
    }

    #[test]
    fn exhausted_retries_fail_the_cycle() {
        let (engine, remote, _) = engine();
        for _ in 0..3 {
            remote.queue_pull(Err(RemoteError::Unreachable("down".into())));
        }
        let mut events = engine.subscribe();

        let err = engine.sync(&identity()).unwrap_err();
        assert!(matches!(err, SyncError::Transient(_)));
        assert!(err.is_retryable());
        assert_eq!(engine.phase(), SyncPhase::Failed);
        assert_eq!(engine.consecutive_failures(), 1);

        let mut failed = None;
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::CycleFailed { surfaced, .. } = event {
                failed = Some(surfaced);
            }
        }
        assert_eq!(failed, Some(false));
    }

    #[test]
    fn permanent_failure_suspends_until_identity_refresh() {
        let (engine, remote, gate) = engine();
        remote.queue_pull(Err(RemoteError::Unauthorized("expired".into())));

        let err = engine.sync(&identity()).unwrap_err();
        assert!(matches!(err, SyncError::Permanent(_)));
        assert_eq!(engine.phase(), SyncPhase::Suspended);
        assert_eq!(gate.rejections().len(), 1);
        assert!(engine.is_suspended_for(&identity()));

        // Same identity: no remote call at all.
        assert!(matches!(
            engine.sync(&identity()),
            Err(SyncError::Suspended)
        ));
        assert_eq!(remote.pull_requests().len(), 1);

        let refreshed = Identity::new("acct-1", "token-2");
        engine.sync(&refreshed).unwrap();
        assert!(!engine.is_suspended_for(&identity()));
    }

    #[test]
    fn partial_ack_keeps_unconfirmed_changes() {
        let (engine, remote, _) = engine();
        engine
            .store()
            .put(Entity::new("urn:a", EntityKind::History, vec![1]))
            .unwrap();
        engine
            .store()
            .put(Entity::new("urn:b", EntityKind::History, vec![2]))
            .unwrap();
        let first = engine.store().pending_changes()[0].change_id;
        remote.queue_push(Ok(PushAck {
            acknowledged: vec![first],
            rejected: Vec::new(),
        }));

        let report = engine.sync(&identity()).unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(report.deferred, 1);

        let pending = engine.store().pending_changes();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entity_id, EntityId::new("urn:b"));
        let b = engine.store().get(&EntityId::new("urn:b")).unwrap();
        assert_eq!(b.sync_state, SyncState::Dirty);
    }

    #[test]
    fn malformed_acks_are_normalised() {
        let (engine, remote, _) = engine();
        engine
            .store()
            .put(Entity::new("urn:a", EntityKind::History, vec![1]))
            .unwrap();
        engine
            .store()
            .put(Entity::new("urn:b", EntityKind::History, vec![2]))
            .unwrap();
        let pending = engine.store().pending_changes();
        let (a, b) = (pending[0].change_id, pending[1].change_id);
        // Duplicate and unknown acknowledgements, plus an id both
        // acknowledged and rejected.
        remote.queue_push(Ok(PushAck {
            acknowledged: vec![a, a, 9_999, a],
            rejected: vec![a, b, b, 4_242],
        }));

        let report = engine.sync(&identity()).unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.deferred, 0);
        assert_eq!(engine.phase(), SyncPhase::Idle);
        assert!(engine.store().pending_changes().is_empty());

        let stored_a = engine.store().get(&EntityId::new("urn:a")).unwrap();
        let stored_b = engine.store().get(&EntityId::new("urn:b")).unwrap();
        assert_eq!(stored_a.sync_state, SyncState::Clean);
        assert_eq!(stored_b.sync_state, SyncState::Conflict);
    }

    #[test]
    fn duplicate_ack_of_single_change() {
        let (engine, remote, _) = engine();
        engine
            .store()
            .put(Entity::new("urn:a", EntityKind::History, vec![1]))
            .unwrap();
        let id = engine.store().pending_changes()[0].change_id;
        remote.queue_push(Ok(PushAck {
            acknowledged: vec![id, id],
            rejected: Vec::new(),
        }));

        let report = engine.sync(&identity()).unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(report.deferred, 0);
        assert_eq!(engine.phase(), SyncPhase::Idle);
        let a = engine.store().get(&EntityId::new("urn:a")).unwrap();
        assert_eq!(a.sync_state, SyncState::Clean);
    }

    /// Acknowledges every push, then cancels the engine it serves.
    #[derive(Default)]
    struct CancellingRemote {
        inner: MockRemote,
        engine: OnceLock<Weak<SyncEngine<CancellingRemote, SessionGate>>>,
    }

    impl RemoteClient for CancellingRemote {
        fn pull(&self, identity: &Identity, request: &PullRequest) -> RemoteResult<PullPage> {
            self.inner.pull(identity, request)
        }

        fn push(&self, identity: &Identity, request: &PushRequest) -> RemoteResult<PushAck> {
            let ack = self.inner.push(identity, request);
            if let Some(engine) = self.engine.get().and_then(Weak::upgrade) {
                engine.cancel();
            }
            ack
        }
    }

    #[test]
    fn cancel_between_push_batches_keeps_acknowledged_subset() {
        let remote = Arc::new(CancellingRemote::default());
        let gate = Arc::new(SessionGate::with_identity(Some(identity())));
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let engine = Arc::new(SyncEngine::new(
            SyncConfig::new("d").with_push_batch_size(1),
            remote.clone(),
            gate,
            store,
        ));
        let _ = remote.engine.set(Arc::downgrade(&engine));

        for id in ["urn:a", "urn:b", "urn:c"] {
            engine
                .store()
                .put(Entity::new(id, EntityKind::Bookmark, vec![1]))
                .unwrap();
        }

        let err = engine.sync(&identity()).unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(engine.phase(), SyncPhase::Idle);
        assert_eq!(remote.inner.pushed().len(), 1);

        let pending = engine.store().pending_changes();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].entity_id, EntityId::new("urn:b"));
        assert_eq!(pending[1].entity_id, EntityId::new("urn:c"));

        let state = |id: &str| engine.store().get(&EntityId::new(id)).unwrap().sync_state;
        assert_eq!(state("urn:a"), SyncState::Clean);
        assert_eq!(state("urn:b"), SyncState::Dirty);
        assert_eq!(state("urn:c"), SyncState::Dirty);

        // The pull stored its cursor before the push; the push never moves it.
        assert_eq!(
            engine.store().cursor(DEFAULT_SCOPE),
            Some(SyncCursor::new("0"))
        );
    }

    #[test]
    fn rejected_changes_mark_conflict() {
        let (engine, remote, _) = engine();
        engine
            .store()
            .put(Entity::new("urn:a", EntityKind::History, vec![1]))
            .unwrap();
        let id = engine.store().pending_changes()[0].change_id;
        remote.queue_push(Ok(PushAck {
            acknowledged: Vec::new(),
            rejected: vec![id],
        }));

        let report = engine.sync(&identity()).unwrap();
        assert_eq!(report.rejected, 1);
        assert!(engine.store().pending_changes().is_empty());
        let a = engine.store().get(&EntityId::new("urn:a")).unwrap();
        assert_eq!(a.sync_state, SyncState::Conflict);
    }

    #[test]
    fn offline_suspends_without_remote_calls() {
        let (engine, remote, _) = engine();
        remote.set_reachable(false);

        let err = engine.sync(&identity()).unwrap_err();
        assert!(matches!(err, SyncError::Offline));
        assert_eq!(engine.phase(), SyncPhase::Suspended);
        assert!(remote.pull_requests().is_empty());
    }

    #[test]
    fn no_identity_suspends() {
        let (engine, _, gate) = engine();
        gate.logout();
        assert!(matches!(engine.run_cycle(), Err(SyncError::NoIdentity)));
        assert_eq!(engine.phase(), SyncPhase::Suspended);
    }

    #[test]
    fn cancelled_cycle_does_not_advance_cursor() {
        let (engine, remote, _) = engine();
        remote.queue_pull(Ok(PullPage::new(
            vec![remote_entity("urn:a", 10)],
            SyncCursor::new("1"),
            false,
        )));

        engine.cancel();
        let err = engine.sync_uncancelled(&identity()).unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(engine.phase(), SyncPhase::Idle);
        assert_eq!(engine.store().cursor(DEFAULT_SCOPE), None);
        assert!(engine.store().get(&EntityId::new("urn:a")).is_none());
    }

    #[test]
    fn account_switch_dissociates_local_data() {
        let (engine, _, _) = engine_with(
            SyncConfig::new("d").with_logout_policy(LogoutPolicy::KeepLocalData),
        );
        engine
            .store()
            .put(Entity::new("urn:a", EntityKind::Bookmark, vec![1]))
            .unwrap();
        engine.sync(&identity()).unwrap();
        assert!(engine.store().pending_changes().is_empty());

        let mut events = engine.subscribe();
        let other = Identity::new("acct-2", "token");
        let report = engine.sync(&other).unwrap();

        // The kept entity is uploaded to the new account.
        assert_eq!(report.pushed, 1);
        assert_eq!(engine.store().bound_identity().as_deref(), Some("acct-2"));
        let mut reset = false;
        while let Ok(event) = events.try_recv() {
            reset |= matches!(event, SyncEvent::IdentityReset { mode: ResetMode::Dissociate });
        }
        assert!(reset);
    }

    #[test]
    fn account_switch_with_erase_policy_wipes_store() {
        let (engine, _, _) = engine_with(
            SyncConfig::new("d").with_logout_policy(LogoutPolicy::EraseLocalData),
        );
        engine
            .store()
            .put(Entity::new("urn:a", EntityKind::Bookmark, vec![1]))
            .unwrap();
        engine.sync(&identity()).unwrap();

        let report = engine.sync(&Identity::new("acct-2", "t")).unwrap();
        assert_eq!(report.pushed, 0);
        assert!(engine.store().get(&EntityId::new("urn:a")).is_none());
    }

    #[test]
    fn conflicts_are_reported() {
        let (engine, remote, _) = engine();
        let local = engine
            .store()
            .put(Entity::new("urn:a", EntityKind::History, vec![1]))
            .unwrap();
        // Remote edit strictly newer than the local one.
        let newer = local.modified.as_millis() + 1_000;
        remote.queue_pull(Ok(PullPage::new(
            vec![remote_entity("urn:a", newer)],
            SyncCursor::new("1"),
            false,
        )));

        let report = engine.sync(&identity()).unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.applied, 1);
        assert_eq!(report.pushed, 0);
        let stored = engine.store().get(&EntityId::new("urn:a")).unwrap();
        assert_eq!(stored.modified.as_millis(), newer);
    }

    #[test]
    fn phase_events_follow_the_cycle() {
        let (engine, _, _) = engine();
        engine
            .store()
            .put(Entity::new("urn:a", EntityKind::History, vec![1]))
            .unwrap();
        let mut events = engine.subscribe();
        engine.sync(&identity()).unwrap();

        let mut phases = Vec::new();
        let mut completed = false;
        while let Ok(event) = events.try_recv() {
            match event {
                SyncEvent::PhaseChanged(phase) => phases.push(phase),
                SyncEvent::CycleCompleted(_) => completed = true,
                _ => {}
            }
        }
        assert_eq!(
            phases,
            vec![
                SyncPhase::Pulling,
                SyncPhase::Reconciling,
                SyncPhase::Pushing,
                SyncPhase::Idle
            ]
        );
        assert!(completed);
    }
}
