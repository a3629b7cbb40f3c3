//! Async scheduling of sync cycles.
//!
//! A single worker task owns the decision of when a cycle runs, so at most
//! one cycle is active per engine. Triggers arrive as messages:
//!
//! - [`Trigger::Foreground`] and [`Trigger::Periodic`] join a running cycle
//!   and complete with it.
//! - [`Trigger::UserRefresh`] schedules exactly one follow-up cycle when one
//!   is already running, so the user sees changes made after it started.
//! - [`Trigger::LocalMutation`] is debounced; a burst of edits produces one
//!   push.
//!
//! Cycles run on tokio's blocking pool. Failed cycles that may succeed later
//! are re-scheduled with exponential backoff. Identity changes cancel the
//! running cycle and reset local sync state before the next one starts.
//! [`SyncScheduler::reset`] does the same on demand, for an explicit
//! dissociate or erase.

use crate::engine::{SyncEngine, SyncEvent, SyncReport};
use crate::error::{SyncError, SyncResult};
use crate::identity::IdentityGate;
use crate::remote::RemoteClient;
use parking_lot::Mutex;
use std::future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use userdata_core::ResetMode;
use userdata_model::Identity;

/// Outcome of a cycle, shared by every caller waiting on it.
pub type SharedSyncResult = Result<SyncReport, Arc<SyncError>>;

/// What asked for a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// The application came to the foreground.
    Foreground,
    /// The user explicitly asked for a refresh.
    UserRefresh,
    /// The periodic timer fired.
    Periodic,
    /// Local data changed.
    LocalMutation,
}

impl Trigger {
    /// Returns true if the trigger is satisfied by a cycle already running.
    pub fn joins_running(self) -> bool {
        matches!(self, Trigger::Foreground | Trigger::Periodic)
    }
}

enum Command {
    Sync {
        trigger: Trigger,
        reply: Option<oneshot::Sender<SharedSyncResult>>,
    },
    Reset {
        mode: ResetMode,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    Shutdown,
}

/// Handle to the background sync worker.
pub struct SyncScheduler<R, G>
where
    R: RemoteClient + ?Sized + 'static,
    G: IdentityGate + ?Sized + 'static,
{
    engine: Arc<SyncEngine<R, G>>,
    commands: mpsc::UnboundedSender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<R, G> SyncScheduler<R, G>
where
    R: RemoteClient + ?Sized + 'static,
    G: IdentityGate + ?Sized + 'static,
{
    /// Starts the worker on the current tokio runtime.
    pub fn spawn(engine: Arc<SyncEngine<R, G>>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let worker = Worker::new(engine.clone(), rx);
        let handle = tokio::spawn(worker.run());
        Self {
            engine,
            commands,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Gets the engine.
    pub fn engine(&self) -> &Arc<SyncEngine<R, G>> {
        &self.engine
    }

    /// Subscribes to the engine's status events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.engine.subscribe()
    }

    /// Requests a cycle and waits for the cycle that satisfies it.
    pub async fn request_sync(&self, trigger: Trigger) -> SharedSyncResult {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Sync {
                trigger,
                reply: Some(reply),
            })
            .map_err(|_| Arc::new(SyncError::Worker("scheduler stopped".into())))?;
        rx.await
            .map_err(|_| Arc::new(SyncError::Worker("scheduler dropped the request".into())))?
    }

    /// Requests a cycle without waiting for it.
    pub fn notify(&self, trigger: Trigger) {
        if self
            .commands
            .send(Command::Sync {
                trigger,
                reply: None,
            })
            .is_err()
        {
            debug!(?trigger, "scheduler stopped; trigger ignored");
        }
    }

    /// Cancels the running cycle and resets local sync state with `mode`.
    ///
    /// Pending debounced, retried and follow-up cycles are dropped; the next
    /// cycle runs on the next trigger.
    pub async fn reset(&self, mode: ResetMode) -> SyncResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Reset { mode, reply })
            .map_err(|_| SyncError::Worker("scheduler stopped".into()))?;
        rx.await
            .map_err(|_| SyncError::Worker("scheduler dropped the request".into()))?
    }

    /// Cancels the running cycle, if any, and stops the worker.
    pub async fn shutdown(&self) -> SyncResult<()> {
        let _ = self.commands.send(Command::Shutdown);
        let handle = self.worker.lock().take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|err| SyncError::Worker(err.to_string())),
            None => Ok(()),
        }
    }
}

type CycleHandle = JoinHandle<SyncResult<SyncReport>>;

struct Worker<R: RemoteClient + ?Sized + 'static, G: IdentityGate + ?Sized + 'static> {
    engine: Arc<SyncEngine<R, G>>,
    commands: mpsc::UnboundedReceiver<Command>,
    identity_rx: watch::Receiver<Option<Identity>>,
    identity: Option<Identity>,
    running: Option<CycleHandle>,
    /// Waiters completed by the running cycle.
    current: Vec<oneshot::Sender<SharedSyncResult>>,
    /// Waiters completed by the next cycle.
    next: Vec<oneshot::Sender<SharedSyncResult>>,
    follow_up: bool,
    debounce_at: Option<Instant>,
    retry_at: Option<Instant>,
    failures: u32,
}

impl<R, G> Worker<R, G>
where
    R: RemoteClient + ?Sized + 'static,
    G: IdentityGate + ?Sized + 'static,
{
    fn new(engine: Arc<SyncEngine<R, G>>, commands: mpsc::UnboundedReceiver<Command>) -> Self {
        let mut identity_rx = engine.gate().subscribe();
        let identity = identity_rx.borrow_and_update().clone();
        Self {
            engine,
            commands,
            identity_rx,
            identity,
            running: None,
            current: Vec::new(),
            next: Vec::new(),
            follow_up: false,
            debounce_at: None,
            retry_at: None,
            failures: 0,
        }
    }

    async fn run(mut self) {
        let mut ticker = self.engine.config().sync_interval.map(|period| {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut gate_open = true;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Sync { trigger, reply }) => self.on_trigger(trigger, reply),
                    Some(Command::Reset { mode, reply }) => {
                        self.debounce_at = None;
                        self.follow_up = false;
                        let result = self.reset_store(mode).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown) | None => break,
                },
                joined = join_cycle(&mut self.running) => {
                    self.running = None;
                    self.finish_cycle(joined);
                    if self.follow_up || !self.next.is_empty() {
                        self.start_cycle();
                    }
                }
                _ = sleep_until(self.debounce_at) => {
                    self.debounce_at = None;
                    self.start_or_follow_up();
                }
                _ = sleep_until(self.retry_at) => {
                    self.retry_at = None;
                    debug!(failures = self.failures, "retrying failed sync");
                    self.start_or_follow_up();
                }
                _ = tick(&mut ticker) => self.on_trigger(Trigger::Periodic, None),
                changed = self.identity_rx.changed(), if gate_open => match changed {
                    Ok(()) => self.on_identity_changed().await,
                    Err(_) => {
                        warn!("identity gate closed");
                        gate_open = false;
                    }
                },
            }
        }

        self.engine.cancel();
        if let Some(handle) = self.running.take() {
            let joined = handle.await;
            self.finish_cycle(joined);
        }
        let stopped = Arc::new(SyncError::Worker("scheduler stopped".into()));
        for waiter in self.next.drain(..) {
            let _ = waiter.send(Err(stopped.clone()));
        }
        info!("sync scheduler stopped");
    }

    fn on_trigger(&mut self, trigger: Trigger, reply: Option<oneshot::Sender<SharedSyncResult>>) {
        debug!(?trigger, running = self.running.is_some(), "sync requested");

        if trigger == Trigger::LocalMutation {
            self.next.extend(reply);
            self.debounce_at = Some(Instant::now() + self.engine.config().debounce);
            return;
        }

        if self.running.is_some() {
            if trigger.joins_running() {
                self.current.extend(reply);
            } else {
                self.follow_up = true;
                self.next.extend(reply);
            }
            return;
        }

        if trigger == Trigger::Periodic && self.retry_at.is_some() {
            // Backoff decides when the next attempt runs.
            self.next.extend(reply);
            return;
        }

        self.next.extend(reply);
        self.retry_at = None;
        self.start_cycle();
    }

    fn start_or_follow_up(&mut self) {
        if self.running.is_some() {
            self.follow_up = true;
        } else {
            self.start_cycle();
        }
    }

    fn start_cycle(&mut self) {
        self.follow_up = false;
        self.debounce_at = None;

        let Some(identity) = self.identity.clone() else {
            debug!("no identity; sync suspended");
            let err = Arc::new(SyncError::NoIdentity);
            for waiter in self.next.drain(..) {
                let _ = waiter.send(Err(err.clone()));
            }
            return;
        };

        self.current.append(&mut self.next);
        self.engine.reset_cancel();
        let engine = self.engine.clone();
        self.running = Some(tokio::task::spawn_blocking(move || {
            engine.sync_uncancelled(&identity)
        }));
    }

    fn finish_cycle(&mut self, joined: Result<SyncResult<SyncReport>, JoinError>) {
        let result: SharedSyncResult = match joined {
            Ok(result) => result.map_err(Arc::new),
            Err(err) => {
                error!(error = %err, "sync cycle panicked");
                Err(Arc::new(SyncError::Worker(err.to_string())))
            }
        };

        match &result {
            Ok(_) => {
                self.failures = 0;
                self.retry_at = None;
            }
            Err(err) if err.is_retryable() => {
                self.failures = self.failures.saturating_add(1);
                let delay = self.engine.config().retry.delay_for_attempt(self.failures);
                info!(
                    failures = self.failures,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "sync failed; backing off"
                );
                self.retry_at = Some(Instant::now() + delay);
            }
            Err(err) => {
                debug!(error = %err, "sync failed; not rescheduled");
                self.retry_at = None;
            }
        }

        for waiter in self.current.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    async fn on_identity_changed(&mut self) {
        let next = self.identity_rx.borrow_and_update().clone();
        let previous = std::mem::replace(&mut self.identity, next.clone());
        if previous == next {
            return;
        }

        match (&previous, &next) {
            (Some(before), Some(after)) if before.account_id == after.account_id => {
                info!(account_id = %after.account_id, "identity refreshed");
                self.engine.clear_suspension();
                self.failures = 0;
                self.retry_at = None;
                self.start_or_follow_up();
            }
            (None, Some(after)) => {
                info!(account_id = %after.account_id, "identity available");
                self.failures = 0;
                self.retry_at = None;
                self.start_or_follow_up();
            }
            (Some(before), _) => {
                info!(account_id = %before.account_id, "identity changed; cancelling sync");
                if self.engine.store().bound_identity().is_some() {
                    let mode = self.engine.config().logout_policy.reset_mode();
                    if let Err(err) = self.reset_store(mode).await {
                        error!(error = %err, "failed to reset sync state");
                    }
                } else {
                    self.stop_cycle().await;
                }

                if next.is_some() || self.follow_up || !self.next.is_empty() {
                    self.start_cycle();
                }
            }
            (None, None) => {}
        }
    }

    /// Cancels and awaits the running cycle.
    async fn stop_cycle(&mut self) {
        self.engine.cancel();
        if let Some(handle) = self.running.take() {
            let joined = handle.await;
            self.finish_cycle(joined);
        }
        self.failures = 0;
        self.retry_at = None;
    }

    async fn reset_store(&mut self, mode: ResetMode) -> SyncResult<()> {
        self.stop_cycle().await;
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || engine.reset_for_identity_change(mode))
            .await
            .map_err(|err| SyncError::Worker(err.to_string()))?
    }
}

async fn join_cycle(running: &mut Option<CycleHandle>) -> Result<SyncResult<SyncReport>, JoinError> {
    match running.as_mut() {
        Some(handle) => handle.await,
        None => future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker.as_mut() {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryConfig, SyncConfig};
    use crate::identity::SessionGate;
    use crate::remote::{MockRemote, RemoteError};
    use std::time::Duration;
    use userdata_core::LocalStore;
    use userdata_model::{Entity, EntityKind};

    fn scheduler(
        config: SyncConfig,
        identity: Option<Identity>,
    ) -> (
        SyncScheduler<MockRemote, SessionGate>,
        Arc<MockRemote>,
        Arc<SessionGate>,
    ) {
        let remote = Arc::new(MockRemote::new());
        let gate = Arc::new(SessionGate::with_identity(identity));
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let engine = Arc::new(SyncEngine::new(config, remote.clone(), gate.clone(), store));
        (SyncScheduler::spawn(engine), remote, gate)
    }

    fn config() -> SyncConfig {
        SyncConfig::new("device").with_debounce(Duration::from_millis(30)).with_retry(
            RetryConfig::new(1)
                .with_initial_delay(Duration::from_millis(10))
                .with_jitter(false),
        )
    }

    fn account() -> Identity {
        Identity::new("acct", "token")
    }

    #[tokio::test]
    async fn request_sync_returns_report() {
        let (scheduler, _, _) = scheduler(config(), Some(account()));
        scheduler
            .engine()
            .store()
            .put(Entity::new("urn:a", EntityKind::History, vec![1]))
            .unwrap();

        let report = scheduler.request_sync(Trigger::UserRefresh).await.unwrap();
        assert_eq!(report.pushed, 1);
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn no_identity_fails_fast() {
        let (scheduler, remote, _) = scheduler(config(), None);
        let err = scheduler.request_sync(Trigger::Foreground).await.unwrap_err();
        assert!(matches!(*err, SyncError::NoIdentity));
        assert!(remote.pull_requests().is_empty());
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn mutation_burst_is_debounced_into_one_cycle() {
        let (scheduler, remote, _) = scheduler(config(), Some(account()));
        let store = scheduler.engine().store().clone();
        for i in 0..5u8 {
            store
                .put(Entity::new(format!("urn:{i}"), EntityKind::Bookmark, vec![i]))
                .unwrap();
            scheduler.notify(Trigger::LocalMutation);
        }

        let report = scheduler
            .request_sync(Trigger::LocalMutation)
            .await
            .unwrap();
        assert_eq!(report.pushed, 5);
        assert_eq!(remote.pushed().len(), 1);
        assert_eq!(remote.pull_requests().len(), 1);
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn retryable_failure_is_rescheduled() {
        let (scheduler, remote, _) = scheduler(config(), Some(account()));
        remote.queue_pull(Err(RemoteError::Timeout));
        let mut events = scheduler.subscribe();

        let err = scheduler.request_sync(Trigger::UserRefresh).await.unwrap_err();
        assert!(err.is_retryable());

        // The backoff retry runs without any further trigger.
        loop {
            match events.recv().await.unwrap() {
                SyncEvent::CycleCompleted(_) => break,
                _ => continue,
            }
        }
        assert_eq!(remote.pull_requests().len(), 2);
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn logout_resets_and_suspends() {
        let (scheduler, remote, gate) = scheduler(config(), Some(account()));
        scheduler.request_sync(Trigger::Foreground).await.unwrap();
        assert_eq!(
            scheduler.engine().store().bound_identity().as_deref(),
            Some("acct")
        );

        let mut events = scheduler.subscribe();
        gate.logout();
        loop {
            if let SyncEvent::IdentityReset { .. } = events.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(scheduler.engine().store().bound_identity(), None);

        let err = scheduler.request_sync(Trigger::UserRefresh).await.unwrap_err();
        assert!(matches!(*err, SyncError::NoIdentity));
        assert_eq!(remote.pull_requests().len(), 1);
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn login_starts_a_cycle() {
        let (scheduler, remote, gate) = scheduler(config(), None);
        let mut events = scheduler.subscribe();
        gate.login(account());
        loop {
            if let SyncEvent::CycleCompleted(_) = events.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(remote.pull_requests().len(), 1);
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn explicit_reset_keeps_the_identity() {
        let (scheduler, remote, _) = scheduler(config(), Some(account()));
        let store = scheduler.engine().store().clone();
        store
            .put(Entity::new("urn:a", EntityKind::Bookmark, vec![1]))
            .unwrap();
        scheduler.request_sync(Trigger::UserRefresh).await.unwrap();

        scheduler.reset(ResetMode::Erase).await.unwrap();
        assert!(store.get(&"urn:a".into()).is_none());
        assert_eq!(store.bound_identity(), None);

        scheduler.request_sync(Trigger::UserRefresh).await.unwrap();
        assert_eq!(store.bound_identity().as_deref(), Some("acct"));
        assert_eq!(remote.pull_requests().len(), 2);
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn requests_after_shutdown_fail() {
        let (scheduler, _, _) = scheduler(config(), Some(account()));
        scheduler.shutdown().await.unwrap();
        let err = scheduler.request_sync(Trigger::UserRefresh).await.unwrap_err();
        assert!(matches!(*err, SyncError::Worker(_)));
    }
}
