//! Plumbing shared by the services.

use crate::error::UserDataResult;
use std::sync::Arc;
use tracing::warn;
use userdata_core::{CoreResult, ListFilter, LocalStore, WriteOrigin};
use userdata_model::{Entity, EntityId, Payload, Timestamp, TypedPayload};
use userdata_sync::{IdentityGate, RemoteClient, SyncScheduler, Trigger};

/// Told about every local write made through a service.
pub trait MutationListener: Send + Sync {
    /// Called after the write is durable.
    fn mutated(&self);
}

impl<R, G> MutationListener for SyncScheduler<R, G>
where
    R: RemoteClient + ?Sized + 'static,
    G: IdentityGate + ?Sized + 'static,
{
    fn mutated(&self) {
        self.notify(Trigger::LocalMutation);
    }
}

/// A decoded record together with its id and modification time.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord<T> {
    /// Entity id.
    pub id: EntityId,
    /// Logical time of the last change, local or remote.
    pub modified: Timestamp,
    /// Decoded payload.
    pub value: T,
}

impl<T: TypedPayload> UserRecord<T> {
    fn decode(entity: &Entity) -> UserDataResult<Self> {
        Ok(Self {
            id: entity.id.clone(),
            modified: entity.modified,
            value: entity.decode()?,
        })
    }
}

#[derive(Clone)]
pub(crate) struct ServiceContext {
    store: Arc<LocalStore>,
    listener: Option<Arc<dyn MutationListener>>,
}

impl ServiceContext {
    pub(crate) fn new(store: Arc<LocalStore>, listener: Option<Arc<dyn MutationListener>>) -> Self {
        Self { store, listener }
    }

    pub(crate) fn get<T: TypedPayload>(&self, id: &EntityId) -> UserDataResult<Option<UserRecord<T>>> {
        self.store
            .get_visible(id)
            .filter(|e| e.kind == T::KIND)
            .map(|e| UserRecord::decode(&e))
            .transpose()
    }

    pub(crate) fn contains<T: TypedPayload>(&self, id: &EntityId) -> bool {
        self.store
            .get_visible(id)
            .is_some_and(|e| e.kind == T::KIND)
    }

    /// Visible records of `T`'s kind whose id starts with `prefix`.
    ///
    /// Payloads that fail to decode are skipped.
    pub(crate) fn list<T: TypedPayload>(&self, prefix: &str, filter: &ListFilter) -> Vec<UserRecord<T>> {
        self.store
            .list(Some(&T::KIND), filter)
            .iter()
            .filter(|e| e.id.as_str().starts_with(prefix))
            .filter_map(|e| match UserRecord::decode(e) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(entity_id = %e.id, error = %err, "skipping undecodable payload");
                    None
                }
            })
            .collect()
    }

    pub(crate) fn put<T: TypedPayload>(&self, id: EntityId, value: T) -> UserDataResult<UserRecord<T>> {
        let entity = Entity::typed(id, &value)?;
        let stored = self.with_repair(|| self.store.put(entity.clone()))?;
        self.notify();
        Ok(UserRecord {
            id: stored.id,
            modified: stored.modified,
            value,
        })
    }

    pub(crate) fn delete(&self, id: &EntityId) -> UserDataResult<bool> {
        let deleted = self.with_repair(|| self.store.delete(id))?;
        if deleted {
            self.notify();
        }
        Ok(deleted)
    }

    /// Writes `puts` and deletes `deletes` in one atomic commit.
    ///
    /// Ids without a visible entity are skipped. Returns the number of
    /// entities written.
    pub(crate) fn write_batch(&self, puts: Vec<Entity>, deletes: &[EntityId]) -> UserDataResult<usize> {
        let mut batch = puts;
        for id in deletes {
            if let Some(mut tombstone) = self.store.get_visible(id) {
                tombstone.deleted = true;
                tombstone.payload = Payload::empty();
                batch.push(tombstone);
            }
        }

        let written = batch.len();
        if written > 0 {
            self.with_repair(|| self.store.apply_batch(batch.clone(), WriteOrigin::Local))?;
            self.notify();
        }
        Ok(written)
    }

    /// Runs a store write, repairing the store and retrying once after a
    /// storage failure.
    fn with_repair<T>(&self, mut write: impl FnMut() -> CoreResult<T>) -> CoreResult<T> {
        match write() {
            Err(err) if err.is_storage_failure() => {
                warn!(error = %err, "local write failed; repairing and retrying once");
                self.store.repair()?;
                write()
            }
            result => result,
        }
    }

    fn notify(&self) {
        if let Some(listener) = &self.listener {
            listener.mutated();
        }
    }
}
