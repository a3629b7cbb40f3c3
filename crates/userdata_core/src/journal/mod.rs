//! Write-ahead journal for the local store.
//!
//! The store keeps its whole state in memory and persists it as a log of
//! commits. Each commit is one framed record, so a multi-entity write is
//! either entirely in the log or entirely absent after a crash. Compaction
//! replaces the log with a single snapshot record.

mod log;
mod record;

pub use log::{Journal, Replay, VerifyReport};
pub use record::{
    compute_crc32, CommitRecord, JournalOp, JournalRecord, RecordType, Snapshot, JOURNAL_MAGIC,
    JOURNAL_VERSION,
};
