//! The [`UserData`] handle.

use crate::bookmarks::Bookmarks;
use crate::config::UserDataConfig;
use crate::context::{MutationListener, ServiceContext};
use crate::error::UserDataResult;
use crate::history::History;
use crate::playlists::Playlists;
use crate::preferences::Preferences;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use userdata_core::{LocalStore, ResetMode, StoreEvent};
use userdata_sync::{
    RemoteClient, SessionGate, SyncConfig, SyncEngine, SyncEvent, SyncReport, SyncScheduler,
    Trigger,
};

/// User data of one local user, optionally bound to a remote account.
///
/// Local writes go through the services and are durable when they return;
/// each one schedules a debounced push. Sync runs in the background for
/// whatever identity the [`SessionGate`] holds. Without an identity the
/// data simply stays local.
///
/// The sync worker is spawned on the tokio runtime current when the handle
/// is created.
///
/// ```rust,ignore
/// let gate = Arc::new(SessionGate::new());
/// let user_data = UserData::open(dir, UserDataConfig::new("phone"), remote, gate.clone())?;
///
/// user_data.history().save_entry("urn:media:1", 42_000, Some("phone"))?;
/// gate.login(Identity::new("account", token));
/// let report = user_data.synchronize().await?;
/// ```
pub struct UserData<R: RemoteClient + ?Sized + 'static = dyn RemoteClient> {
    store: Arc<LocalStore>,
    gate: Arc<SessionGate>,
    scheduler: Arc<SyncScheduler<R, SessionGate>>,
    history: History,
    bookmarks: Bookmarks,
    playlists: Playlists,
    preferences: Preferences,
}

impl<R: RemoteClient + ?Sized + 'static> UserData<R> {
    /// Opens or creates the store in `dir` and starts syncing.
    pub fn open(
        dir: impl AsRef<Path>,
        config: UserDataConfig,
        remote: Arc<R>,
        gate: Arc<SessionGate>,
    ) -> UserDataResult<Self> {
        let store = Arc::new(LocalStore::open_dir(dir.as_ref(), config.store)?);
        info!(path = %dir.as_ref().display(), device_id = %config.sync.device_id, "user data opened");
        Ok(Self::with_store(store, config.sync, remote, gate))
    }

    /// Wraps an already opened store.
    pub fn with_store(
        store: Arc<LocalStore>,
        sync: SyncConfig,
        remote: Arc<R>,
        gate: Arc<SessionGate>,
    ) -> Self {
        let engine = Arc::new(SyncEngine::new(sync, remote, gate.clone(), store.clone()));
        let scheduler = Arc::new(SyncScheduler::spawn(engine));
        let listener: Arc<dyn MutationListener> = scheduler.clone();
        let ctx = ServiceContext::new(store.clone(), Some(listener));

        Self {
            store,
            gate,
            scheduler,
            history: History::new(ctx.clone()),
            bookmarks: Bookmarks::new(ctx.clone()),
            playlists: Playlists::new(ctx.clone()),
            preferences: Preferences::new(ctx),
        }
    }

    /// Playback history.
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Bookmarks.
    pub fn bookmarks(&self) -> &Bookmarks {
        &self.bookmarks
    }

    /// Playlists.
    pub fn playlists(&self) -> &Playlists {
        &self.playlists
    }

    /// Preferences.
    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// The identity gate driving sync.
    pub fn gate(&self) -> &Arc<SessionGate> {
        &self.gate
    }

    /// The background scheduler.
    pub fn scheduler(&self) -> &Arc<SyncScheduler<R, SessionGate>> {
        &self.scheduler
    }

    /// Sync status events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.scheduler.subscribe()
    }

    /// Committed store changes, local and remote.
    pub fn store_events(&self) -> Receiver<StoreEvent> {
        self.store.subscribe()
    }

    /// Asks for a cycle without waiting, e.g. when the app comes to the
    /// foreground.
    pub fn notify(&self, trigger: Trigger) {
        self.scheduler.notify(trigger);
    }

    /// Runs a user-requested cycle and waits for it.
    pub async fn synchronize(&self) -> UserDataResult<SyncReport> {
        Ok(self.scheduler.request_sync(Trigger::UserRefresh).await?)
    }

    /// Logs out while keeping local data; it is uploaded to the next
    /// account that logs in.
    pub async fn dissociate_identity(&self) -> UserDataResult<()> {
        self.scheduler.reset(ResetMode::Dissociate).await?;
        self.gate.logout();
        info!("identity dissociated from local user data");
        Ok(())
    }

    /// Logs out and erases every local record. Remote data is untouched and
    /// comes back on the next login.
    pub async fn erase(&self) -> UserDataResult<()> {
        self.scheduler.reset(ResetMode::Erase).await?;
        self.gate.logout();
        info!("local user data erased");
        Ok(())
    }

    /// Stops background sync.
    pub async fn close(&self) -> UserDataResult<()> {
        self.scheduler.shutdown().await?;
        Ok(())
    }
}
