//! Error types for the sync engine.

use crate::remote::RemoteError;
use thiserror::Error;
use userdata_core::CoreError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that end a sync cycle.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or server hiccup; retried with backoff.
    #[error("transient sync failure: {0}")]
    Transient(RemoteError),

    /// Authentication or payload rejection; sync suspends until the
    /// identity changes.
    #[error("permanent sync failure: {0}")]
    Permanent(RemoteError),

    /// Local store failure that survived one repair-and-retry.
    #[error("storage error: {0}")]
    Storage(#[from] CoreError),

    /// The remote is not reachable right now.
    #[error("remote not reachable")]
    Offline,

    /// No authenticated identity.
    #[error("no authenticated identity")]
    NoIdentity,

    /// A permanent failure was reported for this identity.
    #[error("sync suspended until the identity is refreshed")]
    Suspended,

    /// The cycle was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// The background worker is gone.
    #[error("sync worker stopped: {0}")]
    Worker(String),
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        if err.is_transient() {
            SyncError::Transient(err)
        } else {
            SyncError::Permanent(err)
        }
    }
}

impl SyncError {
    /// Returns true if a later cycle may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transient(_) | SyncError::Offline | SyncError::Storage(_)
        )
    }

    /// Returns true if sync stays suspended until the identity changes.
    pub fn suspends(&self) -> bool {
        matches!(
            self,
            SyncError::Permanent(_) | SyncError::Suspended | SyncError::NoIdentity
        )
    }
}
