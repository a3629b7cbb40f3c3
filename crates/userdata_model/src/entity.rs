//! The entity record shared by every user-data kind.

use crate::codec::{from_cbor, to_cbor, CodecResult};
use crate::ids::{EntityId, EntityKind};
use crate::payloads::TypedPayload;
use crate::timestamp::Timestamp;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Local synchronization state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Matches the last version shared with the remote.
    Clean,
    /// Changed locally, not yet picked up for push.
    Dirty,
    /// Included in a push batch awaiting acknowledgment.
    PendingPush,
    /// The remote rejected the last push; the next pulled version replaces it.
    Conflict,
}

impl SyncState {
    /// Returns true if the entity carries local changes the remote has not
    /// acknowledged.
    pub fn has_local_changes(&self) -> bool {
        matches!(self, SyncState::Dirty | SyncState::PendingPush)
    }
}

/// Opaque payload bytes, serialized as a CBOR byte string.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Payload(Vec<u8>);

impl Payload {
    /// Wraps raw bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Empty payload, used by tombstones.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Borrows the bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the payload length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for an empty payload.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PayloadVisitor;

        impl<'de> Visitor<'de> for PayloadVisitor {
            type Value = Payload;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte string")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Payload, E> {
                Ok(Payload(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Payload, E> {
                Ok(Payload(v))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Payload, A::Error> {
                let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(b) = seq.next_element::<u8>()? {
                    bytes.push(b);
                }
                Ok(Payload(bytes))
            }
        }

        deserializer.deserialize_byte_buf(PayloadVisitor)
    }
}

/// An entity as the remote service sees it.
///
/// Only `id`, `modified` and `deleted` are interpreted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntity {
    /// Stable identifier.
    pub id: EntityId,
    /// User-data kind.
    pub kind: EntityKind,
    /// Opaque payload.
    pub payload: Payload,
    /// Logical timestamp of this version.
    pub modified: Timestamp,
    /// Tombstone flag.
    pub deleted: bool,
}

impl RemoteEntity {
    /// Creates a live remote version.
    pub fn new(
        id: impl Into<EntityId>,
        kind: EntityKind,
        payload: impl Into<Payload>,
        modified: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            payload: payload.into(),
            modified,
            deleted: false,
        }
    }

    /// Creates a remote tombstone.
    pub fn tombstone(id: impl Into<EntityId>, kind: EntityKind, modified: Timestamp) -> Self {
        Self {
            id: id.into(),
            kind,
            payload: Payload::empty(),
            modified,
            deleted: true,
        }
    }
}

/// One user-data record in the local store.
///
/// `synced_at` remembers the timestamp of the last version known to be
/// shared with the remote, which is how reconciliation tells "remote
/// unchanged since the last common point" apart from a true conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier.
    pub id: EntityId,
    /// User-data kind.
    pub kind: EntityKind,
    /// Opaque payload.
    pub payload: Payload,
    /// Logical timestamp of the last modification.
    pub modified: Timestamp,
    /// Tombstone flag.
    pub deleted: bool,
    /// Local synchronization state.
    pub sync_state: SyncState,
    /// Timestamp of the last version shared with the remote.
    pub synced_at: Option<Timestamp>,
}

impl Entity {
    /// Creates a new, not yet stored entity.
    ///
    /// The store assigns `modified` and `sync_state` on `put`.
    pub fn new(id: impl Into<EntityId>, kind: EntityKind, payload: impl Into<Payload>) -> Self {
        Self {
            id: id.into(),
            kind,
            payload: payload.into(),
            modified: Timestamp::ZERO,
            deleted: false,
            sync_state: SyncState::Dirty,
            synced_at: None,
        }
    }

    /// Creates an entity from a typed payload.
    pub fn typed<T: TypedPayload>(id: impl Into<EntityId>, value: &T) -> CodecResult<Self> {
        Ok(Self::new(id, T::KIND, to_cbor(value)?))
    }

    /// Decodes the payload as `T`.
    pub fn decode<T: TypedPayload>(&self) -> CodecResult<T> {
        from_cbor(self.payload.as_bytes())
    }

    /// Builds the local, clean copy of a version received from the remote.
    pub fn from_remote(remote: RemoteEntity) -> Self {
        Self {
            id: remote.id,
            kind: remote.kind,
            payload: remote.payload,
            modified: remote.modified,
            deleted: remote.deleted,
            sync_state: SyncState::Clean,
            synced_at: Some(remote.modified),
        }
    }

    /// Returns the wire representation of this version.
    pub fn to_remote(&self) -> RemoteEntity {
        RemoteEntity {
            id: self.id.clone(),
            kind: self.kind.clone(),
            payload: self.payload.clone(),
            modified: self.modified,
            deleted: self.deleted,
        }
    }

    /// Returns true if the entity is not a tombstone.
    pub fn is_visible(&self) -> bool {
        !self.deleted
    }

    /// Returns true if the entity has unacknowledged local changes.
    pub fn has_local_changes(&self) -> bool {
        self.sync_state.has_local_changes()
    }

    /// Compares the user-visible content of two versions, ignoring local
    /// bookkeeping.
    pub fn same_content(&self, other: &Entity) -> bool {
        self.id == other.id
            && self.kind == other.kind
            && self.deleted == other.deleted
            && self.modified == other.modified
            && (self.deleted || self.payload == other.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::Bookmark;

    #[test]
    fn payload_encodes_as_byte_string() {
        let bytes = to_cbor(&Payload::new(vec![1, 2, 3])).unwrap();
        // major type 2 (byte string), length 3
        assert_eq!(bytes, vec![0x43, 1, 2, 3]);
        assert_eq!(from_cbor::<Payload>(&bytes).unwrap().as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn remote_copy_is_clean_and_synced() {
        let remote = RemoteEntity::new(
            "urn:rts:audio:9",
            EntityKind::History,
            vec![7],
            Timestamp::from_millis(40),
        );
        let local = Entity::from_remote(remote.clone());

        assert_eq!(local.sync_state, SyncState::Clean);
        assert_eq!(local.synced_at, Some(Timestamp::from_millis(40)));
        assert_eq!(local.to_remote(), remote);
    }

    #[test]
    fn typed_payload_roundtrip() {
        let bookmark = Bookmark {
            urn: "urn:rsi:video:5".into(),
        };
        let entity = Entity::typed("urn:rsi:video:5", &bookmark).unwrap();
        assert_eq!(entity.kind, EntityKind::Bookmark);
        assert_eq!(entity.decode::<Bookmark>().unwrap(), bookmark);
    }

    #[test]
    fn tombstones_compare_without_payload() {
        let mut a = Entity::new("x", EntityKind::Bookmark, vec![1]);
        a.deleted = true;
        let mut b = a.clone();
        b.payload = Payload::empty();
        b.sync_state = SyncState::Clean;
        assert!(a.same_content(&b));
    }

    #[test]
    fn local_change_states() {
        assert!(SyncState::Dirty.has_local_changes());
        assert!(SyncState::PendingPush.has_local_changes());
        assert!(!SyncState::Clean.has_local_changes());
        assert!(!SyncState::Conflict.has_local_changes());
    }
}
