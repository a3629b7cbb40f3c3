//! Property-based test generators using proptest.
//!
//! Identifiers are drawn from a small pool so that generated operations
//! collide on the same entities, which is where sync gets interesting.

use proptest::prelude::*;
use userdata_core::{CoreResult, LocalStore};
use userdata_model::{Entity, EntityId, EntityKind, RemoteEntity, Timestamp};

/// Strategy for entity ids from a pool of eight URNs.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    (0u8..8).prop_map(|n| EntityId::new(format!("urn:test:media:{n}")))
}

/// Strategy for the built-in kinds.
pub fn entity_kind_strategy() -> impl Strategy<Value = EntityKind> {
    prop_oneof![
        Just(EntityKind::History),
        Just(EntityKind::Bookmark),
        Just(EntityKind::Playlist),
        Just(EntityKind::PlaylistEntry),
        Just(EntityKind::Preference),
    ]
}

/// Strategy for opaque payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..32)
}

/// Strategy for logical timestamps in a narrow window, so ties happen.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (1u64..64).prop_map(Timestamp::from_millis)
}

/// Strategy for remote versions of history entries.
pub fn remote_entity_strategy() -> impl Strategy<Value = RemoteEntity> {
    (
        entity_id_strategy(),
        payload_strategy(),
        timestamp_strategy(),
        any::<bool>(),
    )
        .prop_map(|(id, payload, modified, deleted)| {
            if deleted {
                RemoteEntity::tombstone(id, EntityKind::History, modified)
            } else {
                RemoteEntity::new(id, EntityKind::History, payload, modified)
            }
        })
}

/// One local edit.
#[derive(Debug, Clone)]
pub enum LocalOp {
    /// Create or update a history entry.
    Put(EntityId, Vec<u8>),
    /// Delete an entity.
    Delete(EntityId),
}

impl LocalOp {
    /// Applies the edit to `store`.
    pub fn apply(&self, store: &LocalStore) -> CoreResult<()> {
        match self {
            LocalOp::Put(id, payload) => {
                store.put(Entity::new(id.clone(), EntityKind::History, payload.clone()))?;
            }
            LocalOp::Delete(id) => {
                store.delete(id)?;
            }
        }
        Ok(())
    }
}

/// Strategy for local edits, mostly puts.
pub fn local_op_strategy() -> impl Strategy<Value = LocalOp> {
    prop_oneof![
        3 => (entity_id_strategy(), payload_strategy()).prop_map(|(id, p)| LocalOp::Put(id, p)),
        1 => entity_id_strategy().prop_map(LocalOp::Delete),
    ]
}

/// Strategy for a sequence of local edits.
pub fn local_ops_strategy(max: usize) -> impl Strategy<Value = Vec<LocalOp>> {
    prop::collection::vec(local_op_strategy(), 0..max)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn local_ops_apply_cleanly(ops in local_ops_strategy(20)) {
            let store = LocalStore::open_in_memory().unwrap();
            for op in &ops {
                op.apply(&store).unwrap();
            }
            prop_assert!(store.pending_changes().len() <= ops.len());
        }
    }
}
