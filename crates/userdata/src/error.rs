//! Error types for the user-data services.

use std::sync::Arc;
use thiserror::Error;
use userdata_core::CoreError;
use userdata_model::CodecError;
use userdata_sync::SyncError;

/// Result type for user-data operations.
pub type UserDataResult<T> = Result<T, UserDataError>;

/// Errors returned by the services and the [`UserData`](crate::UserData)
/// facade.
#[derive(Error, Debug)]
pub enum UserDataError {
    /// The local store failed.
    #[error("store error: {0}")]
    Store(#[from] CoreError),

    /// A payload could not be encoded or decoded.
    #[error("payload error: {0}")]
    Payload(#[from] CodecError),

    /// A sync cycle failed. Shared because several callers may wait on the
    /// same cycle.
    #[error("sync error: {0}")]
    Sync(Arc<SyncError>),

    /// The referenced record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up.
        kind: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A domain or key path is not usable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl UserDataError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        UserDataError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Returns the sync failure behind this error, if any.
    pub fn sync_error(&self) -> Option<&SyncError> {
        match self {
            UserDataError::Sync(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SyncError> for UserDataError {
    fn from(err: SyncError) -> Self {
        UserDataError::Sync(Arc::new(err))
    }
}

impl From<Arc<SyncError>> for UserDataError {
    fn from(err: Arc<SyncError>) -> Self {
        UserDataError::Sync(err)
    }
}
