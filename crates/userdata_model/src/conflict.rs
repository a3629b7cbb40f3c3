//! Conflict records and resolution outcomes.

use crate::entity::{Entity, RemoteEntity};
use crate::ids::EntityId;
use serde::{Deserialize, Serialize};

/// A local and a remote version of the same entity that both changed
/// since their last common point.
///
/// Conflict records are transient: they live for one reconciliation and
/// are reported in the cycle result, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    /// Local version, including local sync bookkeeping.
    pub local: Entity,
    /// Remote version as pulled.
    pub remote: RemoteEntity,
    /// Outcome, once resolved.
    pub resolution: Option<Resolution>,
    /// Rule that produced the outcome.
    pub reason: Option<ResolutionReason>,
}

impl ConflictRecord {
    /// Pairs two diverged versions.
    pub fn new(local: Entity, remote: RemoteEntity) -> Self {
        Self {
            local,
            remote,
            resolution: None,
            reason: None,
        }
    }

    /// Entity identifier shared by both versions.
    pub fn entity_id(&self) -> &EntityId {
        &self.remote.id
    }

    /// Records the outcome.
    pub fn resolve(&mut self, resolution: Resolution, reason: ResolutionReason) {
        self.resolution = Some(resolution);
        self.reason = Some(reason);
    }

    /// Returns true once an outcome is recorded.
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

/// Which version survives a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    /// Keep the local version and push it.
    KeepLocal,
    /// Apply the remote version and discard the local one.
    AcceptRemote,
}

/// Why a conflict was resolved the way it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionReason {
    /// No unacknowledged local change; the remote version is applied as is.
    NoLocalChanges,
    /// Only the local side changed since the last common point.
    RemoteUnchanged,
    /// The winning side carried the greater timestamp.
    NewerTimestamp,
    /// Equal timestamps; the remote is the tie-break authority.
    TieGoesToRemote,
    /// A tombstone beat a concurrent edit at an equal or earlier timestamp.
    TombstonePrecedence,
    /// The versions could not be compared; the remote was applied.
    InvariantFallback,
}
