//! Journal record types and the on-disk envelope.
//!
//! Every record is framed as
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload | crc32 (4) |
//! ```
//!
//! with little-endian integers, a CBOR payload, and a CRC over everything
//! that precedes it.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use userdata_model::{from_cbor, to_cbor, ChangeRecord, Entity, EntityId, SyncCursor, Timestamp};

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"UDJL";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

/// Trailing checksum size.
pub(crate) const CRC_SIZE: usize = 4;

/// Type of journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// One atomic group of operations.
    Commit = 1,
    /// Full store state written by compaction.
    Snapshot = 2,
}

impl RecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Commit),
            2 => Some(Self::Snapshot),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A single state change inside a commit.
///
/// Replaying the ops of every commit in order rebuilds the store exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalOp {
    /// Insert or overwrite an entity version.
    Put(Entity),
    /// Physically remove an entity (tombstone purge).
    Purge(EntityId),
    /// Append a change to the dirty tracker.
    Record(ChangeRecord),
    /// Remove changes from the dirty tracker.
    Acknowledge(Vec<u64>),
    /// Set or clear the cursor of a sync scope.
    SetCursor {
        /// Scope name.
        scope: String,
        /// New cursor, `None` to clear.
        cursor: Option<SyncCursor>,
    },
    /// Bind the store to an account, or unbind it.
    BindIdentity(Option<String>),
    /// Advance the logical clock past a remote timestamp.
    Observe(Timestamp),
    /// Drop all entities, changes, cursors and the identity binding.
    Clear,
}

/// One committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommitRecord {
    /// Journal sequence number.
    pub sequence: u64,
    /// Operations, applied in order.
    pub ops: Vec<JournalOp>,
}

#[derive(Serialize)]
struct CommitRef<'a> {
    sequence: u64,
    ops: &'a [JournalOp],
}

/// Full store state, written as the first record of a compacted journal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Sequence of the last commit folded into this snapshot.
    pub sequence: u64,
    /// Every stored entity, tombstones included.
    pub entities: Vec<Entity>,
    /// Pending changes in insertion order.
    pub changes: Vec<ChangeRecord>,
    /// Next change id to assign.
    pub next_change_id: u64,
    /// Cursor per sync scope.
    pub cursors: Vec<(String, SyncCursor)>,
    /// Bound account, if any.
    pub identity: Option<String>,
    /// Highest logical time issued or observed.
    pub clock: Timestamp,
}

/// A decoded journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// See [`CommitRecord`].
    Commit(CommitRecord),
    /// See [`Snapshot`].
    Snapshot(Snapshot),
}

impl JournalRecord {
    /// Returns the record type.
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Commit(_) => RecordType::Commit,
            Self::Snapshot(_) => RecordType::Snapshot,
        }
    }

    /// Returns the sequence number carried by the record.
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Commit(commit) => commit.sequence,
            Self::Snapshot(snapshot) => snapshot.sequence,
        }
    }
}

/// Frames a commit.
pub(crate) fn encode_commit(sequence: u64, ops: &[JournalOp]) -> CoreResult<Vec<u8>> {
    let payload = to_cbor(&CommitRef { sequence, ops })?;
    frame(RecordType::Commit, &payload)
}

/// Frames a snapshot.
pub(crate) fn encode_snapshot(snapshot: &Snapshot) -> CoreResult<Vec<u8>> {
    let payload = to_cbor(snapshot)?;
    frame(RecordType::Snapshot, &payload)
}

fn frame(record_type: RecordType, payload: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_operation("journal record exceeds 4 GiB"))?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    buf.extend_from_slice(&JOURNAL_MAGIC);
    buf.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
    buf.push(record_type.as_byte());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    let crc = compute_crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Result of decoding the bytes at one offset.
#[derive(Debug)]
pub(crate) enum Decoded {
    /// A complete record and its framed length.
    Record(JournalRecord, usize),
    /// Too few bytes for a complete record: a torn tail.
    Torn,
}

/// Decodes the record starting at `bytes[0]`; `offset` is only used for
/// error reporting.
pub(crate) fn decode_record(bytes: &[u8], offset: u64) -> CoreResult<Decoded> {
    if bytes.len() < HEADER_SIZE {
        return Ok(Decoded::Torn);
    }

    if bytes[0..4] != JOURNAL_MAGIC {
        return Err(CoreError::corruption(offset, "invalid magic"));
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != JOURNAL_VERSION {
        return Err(CoreError::corruption(
            offset,
            format!("unsupported journal version {version}"),
        ));
    }

    let record_type = RecordType::from_byte(bytes[6])
        .ok_or_else(|| CoreError::corruption(offset, format!("unknown record type {}", bytes[6])))?;

    let len = u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]) as usize;
    let total = HEADER_SIZE + len + CRC_SIZE;
    if bytes.len() < total {
        return Ok(Decoded::Torn);
    }

    let payload_end = HEADER_SIZE + len;
    let stored_crc = u32::from_le_bytes([
        bytes[payload_end],
        bytes[payload_end + 1],
        bytes[payload_end + 2],
        bytes[payload_end + 3],
    ]);
    let computed_crc = compute_crc32(&bytes[..payload_end]);
    if stored_crc != computed_crc {
        return Err(CoreError::ChecksumMismatch {
            offset,
            expected: stored_crc,
            actual: computed_crc,
        });
    }

    let payload = &bytes[HEADER_SIZE..payload_end];
    let record = match record_type {
        RecordType::Commit => JournalRecord::Commit(
            from_cbor(payload).map_err(|e| CoreError::corruption(offset, e.to_string()))?,
        ),
        RecordType::Snapshot => JournalRecord::Snapshot(
            from_cbor(payload).map_err(|e| CoreError::corruption(offset, e.to_string()))?,
        ),
    };
    Ok(Decoded::Record(record, total))
}

/// Computes the IEEE CRC32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use userdata_model::{EntityKind, Operation};

    fn sample_ops() -> Vec<JournalOp> {
        vec![
            JournalOp::Put(Entity::new("urn:a", EntityKind::Bookmark, vec![1, 2])),
            JournalOp::Record(ChangeRecord::new(
                1,
                "urn:a".into(),
                Operation::Create,
                Timestamp::from_millis(9),
            )),
            JournalOp::SetCursor {
                scope: "default".into(),
                cursor: Some(SyncCursor::new("c1")),
            },
        ]
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn commit_decodes_back() {
        let ops = sample_ops();
        let bytes = encode_commit(4, &ops).unwrap();
        match decode_record(&bytes, 0).unwrap() {
            Decoded::Record(JournalRecord::Commit(commit), len) => {
                assert_eq!(len, bytes.len());
                assert_eq!(commit.sequence, 4);
                assert_eq!(commit.ops, ops);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn short_input_is_torn() {
        let bytes = encode_commit(1, &sample_ops()).unwrap();
        for cut in [0, 5, HEADER_SIZE, bytes.len() - 1] {
            assert!(matches!(
                decode_record(&bytes[..cut], 0).unwrap(),
                Decoded::Torn
            ));
        }
    }

    #[test]
    fn flipped_payload_byte_fails_checksum() {
        let mut bytes = encode_commit(1, &sample_ops()).unwrap();
        bytes[HEADER_SIZE + 2] ^= 0xFF;
        let err = decode_record(&bytes, 128).unwrap_err();
        assert!(matches!(err, CoreError::ChecksumMismatch { offset: 128, .. }));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut bytes = encode_commit(1, &sample_ops()).unwrap();
        bytes[0] = b'X';
        assert!(decode_record(&bytes, 0).unwrap_err().is_corruption());
    }

    #[test]
    fn snapshot_decodes_back() {
        let snapshot = Snapshot {
            sequence: 12,
            entities: vec![Entity::new("p", EntityKind::Playlist, vec![3])],
            changes: Vec::new(),
            next_change_id: 40,
            cursors: vec![("default".into(), SyncCursor::new("99"))],
            identity: Some("account-1".into()),
            clock: Timestamp::from_millis(1_000),
        };
        let bytes = encode_snapshot(&snapshot).unwrap();
        match decode_record(&bytes, 0).unwrap() {
            Decoded::Record(JournalRecord::Snapshot(decoded), _) => assert_eq!(decoded, snapshot),
            other => panic!("unexpected {other:?}"),
        }
    }
}
