//! Error types for the local store.

use thiserror::Error;
use userdata_model::{CodecError, EntityId, EntityKind};
use userdata_storage::StorageError;

/// Result type for store operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the journal and the local store.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The journal contains bytes that cannot be a torn tail.
    #[error("journal corruption at offset {offset}: {message}")]
    JournalCorruption {
        /// Offset of the offending record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// A journal record failed its checksum.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the offending record.
        offset: u64,
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed over the record.
        actual: u32,
    },

    /// A previous write failed and the journal must be rewritten first.
    #[error("store requires repair after a failed write")]
    RepairRequired,

    /// An entity id is already bound to a different kind.
    #[error("entity {entity_id} is a {stored}, not a {requested}")]
    KindMismatch {
        /// The entity id.
        entity_id: EntityId,
        /// Kind already stored.
        stored: EntityKind,
        /// Kind of the rejected write.
        requested: EntityKind,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a journal corruption error.
    pub fn corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for failures of the durable layer, which the sync
    /// engine recovers from with one repair-and-retry.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::RepairRequired)
    }

    /// Returns true if the journal itself is damaged.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::JournalCorruption { .. } | Self::ChecksumMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let io = CoreError::from(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )));
        assert!(io.is_storage_failure());
        assert!(CoreError::RepairRequired.is_storage_failure());
        assert!(CoreError::corruption(12, "bad magic").is_corruption());
        assert!(!CoreError::invalid_operation("nope").is_storage_failure());
    }

    #[test]
    fn display_includes_offset() {
        let err = CoreError::ChecksumMismatch {
            offset: 40,
            expected: 0xdead_beef,
            actual: 0x0bad_f00d,
        };
        let msg = err.to_string();
        assert!(msg.contains("offset 40"));
        assert!(msg.contains("deadbeef"));
    }
}
