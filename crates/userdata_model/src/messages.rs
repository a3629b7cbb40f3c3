//! Messages exchanged with the remote service.
//!
//! All messages encode to CBOR. The exact HTTP framing belongs to the
//! transport collaborator.

use crate::change::Operation;
use crate::codec::{from_cbor, to_cbor, CodecError, CodecResult};
use crate::cursor::SyncCursor;
use crate::entity::RemoteEntity;
use serde::{Deserialize, Serialize};

/// Request for the page of remote changes after `cursor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Requesting device.
    pub device_id: String,
    /// Last applied cursor, `None` for a first pull.
    pub cursor: Option<SyncCursor>,
    /// Maximum number of entities in the page.
    pub limit: u32,
}

impl PullRequest {
    /// Creates a pull request.
    pub fn new(device_id: impl Into<String>, cursor: Option<SyncCursor>, limit: u32) -> Self {
        Self {
            device_id: device_id.into(),
            cursor,
            limit,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let request: Self = from_cbor(bytes)?;
        if request.limit == 0 {
            return Err(CodecError::InvalidField {
                field: "limit",
                reason: "must be positive".into(),
            });
        }
        Ok(request)
    }
}

/// One page of remote changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullPage {
    /// Latest remote versions changed after the request cursor.
    pub entities: Vec<RemoteEntity>,
    /// Cursor covering everything in this page.
    pub next_cursor: SyncCursor,
    /// True if another page follows.
    pub has_more: bool,
}

impl PullPage {
    /// Creates a page.
    pub fn new(entities: Vec<RemoteEntity>, next_cursor: SyncCursor, has_more: bool) -> Self {
        Self {
            entities,
            next_cursor,
            has_more,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

/// A pending local change, paired with the entity version it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingChange {
    /// Change-log identifier, echoed back in [`PushAck`].
    pub change_id: u64,
    /// Operation performed locally.
    pub operation: Operation,
    /// Version to publish.
    pub entity: RemoteEntity,
}

/// A batch of local changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Pushing device.
    pub device_id: String,
    /// Changes in change-log order.
    pub changes: Vec<OutgoingChange>,
}

impl PushRequest {
    /// Creates a push request.
    pub fn new(device_id: impl Into<String>, changes: Vec<OutgoingChange>) -> Self {
        Self {
            device_id: device_id.into(),
            changes,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

/// Remote verdict on a push batch.
///
/// A change id missing from both lists was not confirmed and stays in the
/// local log for the next cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    /// Changes durably accepted.
    pub acknowledged: Vec<u64>,
    /// Changes refused; they will not be retried.
    pub rejected: Vec<u64>,
}

impl PushAck {
    /// Acknowledges every change in the batch.
    pub fn all(changes: &[OutgoingChange]) -> Self {
        Self {
            acknowledged: changes.iter().map(|c| c.change_id).collect(),
            rejected: Vec::new(),
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::EntityKind;
    use crate::timestamp::Timestamp;

    #[test]
    fn pull_page_roundtrip_keeps_tombstones() {
        let page = PullPage::new(
            vec![
                RemoteEntity::new(
                    "urn:a",
                    EntityKind::History,
                    vec![1, 2],
                    Timestamp::from_millis(5),
                ),
                RemoteEntity::tombstone("urn:b", EntityKind::Bookmark, Timestamp::from_millis(6)),
            ],
            SyncCursor::new("17"),
            true,
        );

        let decoded = PullPage::decode(&page.encode().unwrap()).unwrap();
        assert_eq!(decoded, page);
        assert!(decoded.entities[1].deleted);
    }

    #[test]
    fn zero_limit_pull_is_rejected() {
        let bytes = PullRequest::new("device", None, 0).encode().unwrap();
        assert!(matches!(
            PullRequest::decode(&bytes),
            Err(CodecError::InvalidField { field: "limit", .. })
        ));
    }

    #[test]
    fn ack_all_lists_every_change() {
        let change = |id| OutgoingChange {
            change_id: id,
            operation: Operation::Update,
            entity: RemoteEntity::new("e", EntityKind::Playlist, vec![], Timestamp::from_millis(1)),
        };
        let ack = PushAck::all(&[change(3), change(4)]);
        assert_eq!(ack.acknowledged, vec![3, 4]);
        assert!(ack.rejected.is_empty());
    }
}
