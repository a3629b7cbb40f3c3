//! The append-only journal over a storage backend.

use super::record::{decode_record, encode_commit, encode_snapshot, Decoded, JournalOp, JournalRecord, Snapshot};
use crate::error::{CoreError, CoreResult};
use tracing::{debug, warn};
use userdata_storage::StorageBackend;

/// Outcome of scanning a journal from the start.
#[derive(Debug, Default)]
pub struct Replay {
    /// Valid records with their offsets, in order.
    pub records: Vec<(u64, JournalRecord)>,
    /// Length of the valid prefix.
    pub valid_len: u64,
    /// Bytes after the valid prefix that belong to an incomplete record.
    pub torn_bytes: u64,
}

/// Summary produced by [`Journal::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Number of commit records.
    pub commits: usize,
    /// Number of snapshot records.
    pub snapshots: usize,
    /// Length of the valid prefix.
    pub valid_len: u64,
    /// Incomplete trailing bytes.
    pub torn_bytes: u64,
    /// First fatal error, if any.
    pub error: Option<String>,
}

impl VerifyReport {
    /// Returns true if every byte belongs to a valid record.
    pub fn is_clean(&self) -> bool {
        self.error.is_none() && self.torn_bytes == 0
    }
}

/// Append-only record log.
///
/// A failed append is rolled back by truncating to the previous length.
/// If the rollback fails too, the journal is poisoned and refuses appends
/// until a snapshot rewrites it.
pub struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
    next_sequence: u64,
    poisoned: bool,
}

impl Journal {
    /// Wraps a backend.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend,
            sync_on_commit,
            next_sequence: 1,
            poisoned: false,
        }
    }

    /// Reads every record and truncates a torn tail.
    ///
    /// # Errors
    ///
    /// Fails on backend errors and on corruption that cannot be a torn
    /// write (bad magic, checksum mismatch, undecodable payload).
    pub fn replay(&mut self) -> CoreResult<Replay> {
        let replay = scan(self.backend.as_ref())?;

        if replay.torn_bytes > 0 {
            warn!(
                valid_len = replay.valid_len,
                torn_bytes = replay.torn_bytes,
                "truncating torn journal tail"
            );
            self.backend.truncate(replay.valid_len)?;
        }

        if let Some((_, last)) = replay.records.last() {
            self.next_sequence = last.sequence() + 1;
        }
        debug!(
            records = replay.records.len(),
            next_sequence = self.next_sequence,
            "journal replayed"
        );
        Ok(replay)
    }

    /// Appends one commit and makes it durable.
    ///
    /// Returns the commit's sequence number.
    pub fn append(&mut self, ops: &[JournalOp]) -> CoreResult<u64> {
        if self.poisoned {
            return Err(CoreError::RepairRequired);
        }

        let sequence = self.next_sequence;
        let bytes = encode_commit(sequence, ops)?;
        let start = self.backend.size()?;

        let written = self
            .backend
            .append(&bytes)
            .and_then(|_| self.backend.flush())
            .and_then(|()| {
                if self.sync_on_commit {
                    self.backend.sync()
                } else {
                    Ok(())
                }
            });

        if let Err(err) = written {
            if let Err(rollback) = self.backend.truncate(start) {
                warn!(error = %rollback, "journal rollback failed; repair required");
                self.poisoned = true;
            }
            return Err(err.into());
        }

        self.next_sequence += 1;
        Ok(sequence)
    }

    /// Replaces the whole journal with a single snapshot record.
    pub fn write_snapshot(&mut self, mut snapshot: Snapshot) -> CoreResult<()> {
        snapshot.sequence = self.next_sequence.saturating_sub(1);
        let bytes = encode_snapshot(&snapshot)?;
        self.backend.replace(&bytes)?;
        self.backend.sync()?;
        self.poisoned = false;
        debug!(bytes = bytes.len(), sequence = snapshot.sequence, "journal compacted");
        Ok(())
    }

    /// Returns true if an append failed without rollback.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Current journal size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Scans a backend without modifying it.
    pub fn verify(backend: &dyn StorageBackend) -> CoreResult<VerifyReport> {
        let bytes = backend.read_all()?;
        let mut report = VerifyReport::default();
        let mut offset = 0usize;

        while offset < bytes.len() {
            match decode_record(&bytes[offset..], offset as u64) {
                Ok(Decoded::Record(record, len)) => {
                    match record {
                        JournalRecord::Commit(_) => report.commits += 1,
                        JournalRecord::Snapshot(_) => report.snapshots += 1,
                    }
                    offset += len;
                }
                Ok(Decoded::Torn) => {
                    report.torn_bytes = (bytes.len() - offset) as u64;
                    break;
                }
                Err(err) => {
                    report.error = Some(err.to_string());
                    break;
                }
            }
        }
        report.valid_len = offset as u64;
        Ok(report)
    }
}

fn scan(backend: &dyn StorageBackend) -> CoreResult<Replay> {
    let bytes = backend.read_all()?;
    let mut replay = Replay::default();
    let mut offset = 0usize;

    while offset < bytes.len() {
        match decode_record(&bytes[offset..], offset as u64)? {
            Decoded::Record(record, len) => {
                replay.records.push((offset as u64, record));
                offset += len;
            }
            Decoded::Torn => {
                replay.torn_bytes = (bytes.len() - offset) as u64;
                break;
            }
        }
    }
    replay.valid_len = offset as u64;
    Ok(replay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use userdata_model::{Entity, EntityKind};
    use userdata_storage::InMemoryBackend;

    fn put(id: &str) -> JournalOp {
        JournalOp::Put(Entity::new(id, EntityKind::Bookmark, vec![1]))
    }

    #[test]
    fn append_and_replay() {
        let backend = InMemoryBackend::new();
        let mut journal = Journal::new(Box::new(backend.clone()), true);
        assert_eq!(journal.append(&[put("a")]).unwrap(), 1);
        assert_eq!(journal.append(&[put("b"), put("c")]).unwrap(), 2);

        let mut reopened = Journal::new(Box::new(backend), true);
        let replay = reopened.replay().unwrap();
        assert_eq!(replay.records.len(), 2);
        assert_eq!(replay.torn_bytes, 0);
        assert_eq!(reopened.append(&[put("d")]).unwrap(), 3);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let backend = InMemoryBackend::new();
        let mut journal = Journal::new(Box::new(backend.clone()), false);
        journal.append(&[put("a")]).unwrap();
        let good_len = journal.size().unwrap();
        journal.append(&[put("b")]).unwrap();

        // Chop the second record in half.
        let full = backend.data();
        let cut = good_len as usize + (full.len() - good_len as usize) / 2;
        let torn = InMemoryBackend::with_data(full[..cut].to_vec());

        let mut reopened = Journal::new(Box::new(torn.clone()), false);
        let replay = reopened.replay().unwrap();
        assert_eq!(replay.records.len(), 1);
        assert!(replay.torn_bytes > 0);
        assert_eq!(torn.data().len() as u64, good_len);
    }

    #[test]
    fn corruption_is_fatal() {
        let backend = InMemoryBackend::new();
        let mut journal = Journal::new(Box::new(backend.clone()), false);
        journal.append(&[put("a")]).unwrap();
        backend.corrupt_byte(14);

        let mut reopened = Journal::new(Box::new(backend.clone()), false);
        assert!(reopened.replay().unwrap_err().is_corruption());

        let report = Journal::verify(&backend).unwrap();
        assert!(report.error.is_some());
        assert!(!report.is_clean());
    }

    #[test]
    fn snapshot_replaces_history() {
        let backend = InMemoryBackend::new();
        let mut journal = Journal::new(Box::new(backend.clone()), false);
        for id in ["a", "b", "c"] {
            journal.append(&[put(id)]).unwrap();
        }
        journal.write_snapshot(Snapshot::default()).unwrap();
        journal.append(&[put("d")]).unwrap();

        let report = Journal::verify(&backend).unwrap();
        assert_eq!(report.snapshots, 1);
        assert_eq!(report.commits, 1);
        assert!(report.is_clean());

        let mut reopened = Journal::new(Box::new(backend), false);
        let replay = reopened.replay().unwrap();
        assert_eq!(replay.records[0].1.sequence(), 3);
        assert_eq!(replay.records[1].1.sequence(), 4);
    }
}
