//! Test fixtures: stores that can be reopened, crashed, and wired to a
//! shared in-memory remote.

use crate::crash::{CrashSwitch, CrashableBackend};
use crate::remote::InMemoryRemote;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;
use userdata_core::{LocalStore, ManualClock, StoreConfig, TimeSource};
use userdata_model::{Entity, EntityId, EntityKind, Identity, Payload};
use userdata_storage::InMemoryBackend;
use userdata_sync::{SessionGate, SyncConfig, SyncEngine, SyncReport, SyncResult};

/// A store over shared in-memory bytes.
///
/// [`reopen`](Self::reopen) drops nothing: it opens a second store on the
/// same bytes, which is what a restarted process would see.
pub struct TestStore {
    /// The store.
    pub store: Arc<LocalStore>,
    bytes: InMemoryBackend,
    switch: Option<CrashSwitch>,
    config: StoreConfig,
    clock: Option<Arc<ManualClock>>,
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates an in-memory store.
    pub fn memory() -> Self {
        Self::build(StoreConfig::default(), false, None)
    }

    /// Creates an in-memory store that can be crashed through
    /// [`switch`](Self::switch).
    pub fn crashable() -> Self {
        Self::build(StoreConfig::default(), true, None)
    }

    /// Creates an in-memory store reading time from a manual clock.
    pub fn with_clock(clock: Arc<ManualClock>, config: StoreConfig) -> Self {
        Self::build(config, false, Some(clock))
    }

    /// Creates a store in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = LocalStore::open_dir(temp_dir.path(), StoreConfig::default())
            .expect("Failed to open file store");
        Self {
            store: Arc::new(store),
            bytes: InMemoryBackend::new(),
            switch: None,
            config: StoreConfig::default(),
            clock: None,
            _temp_dir: Some(temp_dir),
        }
    }

    fn build(config: StoreConfig, crashable: bool, clock: Option<Arc<ManualClock>>) -> Self {
        let bytes = InMemoryBackend::new();
        let (store, switch) = open(&bytes, &config, crashable, clock.clone());
        Self {
            store: Arc::new(store),
            bytes,
            switch,
            config,
            clock,
            _temp_dir: None,
        }
    }

    /// Returns the crash switch of a crashable store.
    pub fn switch(&self) -> Option<&CrashSwitch> {
        self.switch.as_ref()
    }

    /// Returns the raw journal bytes of an in-memory store.
    pub fn bytes(&self) -> &InMemoryBackend {
        &self.bytes
    }

    /// Opens a fresh store on the same bytes, as after a restart.
    ///
    /// The new store is crashable again if the old one was, with a disarmed
    /// switch.
    pub fn reopen(&self) -> Self {
        let (store, switch) = open(
            &self.bytes,
            &self.config,
            self.switch.is_some(),
            self.clock.clone(),
        );
        Self {
            store: Arc::new(store),
            bytes: self.bytes.clone(),
            switch,
            config: self.config.clone(),
            clock: self.clock.clone(),
            _temp_dir: None,
        }
    }
}

fn open(
    bytes: &InMemoryBackend,
    config: &StoreConfig,
    crashable: bool,
    clock: Option<Arc<ManualClock>>,
) -> (LocalStore, Option<CrashSwitch>) {
    let (backend, switch): (Box<dyn userdata_storage::StorageBackend>, _) = if crashable {
        let backend = CrashableBackend::new(Box::new(bytes.clone()));
        let switch = backend.switch();
        (Box::new(backend), Some(switch))
    } else {
        (Box::new(bytes.clone()), None)
    };

    let store = match clock {
        Some(clock) => {
            let time: Arc<dyn TimeSource> = clock;
            LocalStore::open_with_clock(backend, config.clone(), time)
        }
        None => LocalStore::open(backend, config.clone()),
    }
    .expect("Failed to open test store");
    (store, switch)
}

impl std::ops::Deref for TestStore {
    type Target = LocalStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Engine type used by [`TestDevice`].
pub type TestEngine = SyncEngine<InMemoryRemote, SessionGate>;

/// One device: a store and an engine syncing against a shared remote.
pub struct TestDevice {
    /// Device name, also used as device id.
    pub name: String,
    /// The device's store.
    pub store: TestStore,
    /// The identity gate.
    pub gate: Arc<SessionGate>,
    /// The engine.
    pub engine: Arc<TestEngine>,
    remote: Arc<InMemoryRemote>,
    config: SyncConfig,
}

impl TestDevice {
    /// Creates a device logged in as `account_id`.
    pub fn new(name: &str, remote: Arc<InMemoryRemote>, account_id: &str) -> Self {
        Self::with_store(name, remote, account_id, TestStore::memory(), fast_config(name))
    }

    /// Creates a device over an existing store with a custom configuration.
    pub fn with_store(
        name: &str,
        remote: Arc<InMemoryRemote>,
        account_id: &str,
        store: TestStore,
        config: SyncConfig,
    ) -> Self {
        let gate = Arc::new(SessionGate::with_identity(Some(identity(account_id))));
        let engine = Arc::new(SyncEngine::new(
            config.clone(),
            remote.clone(),
            gate.clone(),
            store.store.clone(),
        ));
        Self {
            name: name.to_string(),
            store,
            gate,
            engine,
            remote,
            config,
        }
    }

    /// Runs one cycle for the gate's identity.
    pub fn sync(&self) -> SyncResult<SyncReport> {
        self.engine.run_cycle()
    }

    /// Simulates a process restart: reopens the store from its bytes and
    /// builds a new engine on it.
    pub fn restart(&self) -> Self {
        let store = self.store.reopen();
        let engine = Arc::new(SyncEngine::new(
            self.config.clone(),
            self.remote.clone(),
            self.gate.clone(),
            store.store.clone(),
        ));
        Self {
            name: self.name.clone(),
            store,
            gate: self.gate.clone(),
            engine,
            remote: self.remote.clone(),
            config: self.config.clone(),
        }
    }

    /// Writes an entity locally.
    pub fn put(&self, id: &str, kind: EntityKind, payload: &[u8]) -> Entity {
        self.store
            .put(Entity::new(id, kind, payload.to_vec()))
            .expect("Failed to put entity")
    }

    /// Deletes an entity locally.
    pub fn delete(&self, id: &str) -> bool {
        self.store
            .delete(&EntityId::new(id))
            .expect("Failed to delete entity")
    }

    /// The visible entities, keyed by id, without local bookkeeping.
    pub fn visible(&self) -> BTreeMap<EntityId, (EntityKind, Payload)> {
        visible_set(&self.store)
    }
}

/// Visible entities of a store, keyed by id, without local bookkeeping.
pub fn visible_set(store: &LocalStore) -> BTreeMap<EntityId, (EntityKind, Payload)> {
    store
        .list(None, &userdata_core::ListFilter::default())
        .into_iter()
        .map(|e| (e.id, (e.kind, e.payload)))
        .collect()
}

/// An identity for `account_id` with a fixed token.
pub fn identity(account_id: &str) -> Identity {
    Identity::new(account_id, format!("{account_id}-token"))
}

/// A sync configuration with millisecond retry delays.
pub fn fast_config(device_id: &str) -> SyncConfig {
    SyncConfig::new(device_id)
        .with_pull_batch_size(10)
        .with_push_batch_size(10)
        .with_debounce(std::time::Duration::from_millis(20))
        .with_retry(
            userdata_sync::RetryConfig::new(3)
                .with_initial_delay(std::time::Duration::from_millis(1))
                .with_max_delay(std::time::Duration::from_millis(20))
                .with_jitter(false),
        )
}
