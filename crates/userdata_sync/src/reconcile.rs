//! Deterministic reconciliation rules.
//!
//! Given the local version of an entity (if any) and a pulled remote
//! version, decide which one survives:
//!
//! 1. No local version, or no unacknowledged local change: apply the remote.
//! 2. Local changed, remote unchanged since the last common point
//!    (`remote.modified <= local.synced_at`): keep local and push it.
//! 3. Both changed (a true conflict):
//!    - a tombstone at `T` beats a non-delete edit at a timestamp `<= T`;
//!    - otherwise the greater timestamp wins;
//!    - on an exact tie the remote wins.
//!
//! The rules depend only on the two versions, so every device reaches the
//! same outcome.

use thiserror::Error;
use userdata_model::{
    ConflictRecord, Entity, EntityId, EntityKind, RemoteEntity, Resolution, ResolutionReason,
};

/// The two versions cannot be compared.
///
/// This signals a broken invariant; callers log it and fall back to the
/// remote version.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConflictResolutionError {
    /// Local and remote disagree on the entity kind.
    #[error("entity {entity_id} is a {local} locally but a {remote} remotely")]
    KindMismatch {
        /// The entity.
        entity_id: EntityId,
        /// Local kind.
        local: EntityKind,
        /// Remote kind.
        remote: EntityKind,
    },
    /// The versions carry different identifiers.
    #[error("cannot reconcile {local} against {remote}")]
    IdMismatch {
        /// Local id.
        local: EntityId,
        /// Remote id.
        remote: EntityId,
    },
}

/// Outcome of reconciling one remote version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Surviving side.
    pub resolution: Resolution,
    /// Rule that decided.
    pub reason: ResolutionReason,
    /// Set when both sides changed since the last common point.
    pub conflict: Option<ConflictRecord>,
}

impl Verdict {
    fn simple(resolution: Resolution, reason: ResolutionReason) -> Self {
        Self {
            resolution,
            reason,
            conflict: None,
        }
    }

    /// The verdict used when the rules cannot be applied.
    pub fn fallback() -> Self {
        Self::simple(Resolution::AcceptRemote, ResolutionReason::InvariantFallback)
    }
}

/// Decides which version of an entity survives.
pub fn reconcile(
    local: Option<&Entity>,
    remote: &RemoteEntity,
) -> Result<Verdict, ConflictResolutionError> {
    let Some(local) = local else {
        return Ok(Verdict::simple(
            Resolution::AcceptRemote,
            ResolutionReason::NoLocalChanges,
        ));
    };

    if local.id != remote.id {
        return Err(ConflictResolutionError::IdMismatch {
            local: local.id.clone(),
            remote: remote.id.clone(),
        });
    }
    if local.kind != remote.kind {
        return Err(ConflictResolutionError::KindMismatch {
            entity_id: local.id.clone(),
            local: local.kind.clone(),
            remote: remote.kind.clone(),
        });
    }

    if !local.has_local_changes() {
        return Ok(Verdict::simple(
            Resolution::AcceptRemote,
            ResolutionReason::NoLocalChanges,
        ));
    }

    if let Some(synced_at) = local.synced_at {
        if remote.modified <= synced_at {
            return Ok(Verdict::simple(
                Resolution::KeepLocal,
                ResolutionReason::RemoteUnchanged,
            ));
        }
    }

    let (resolution, reason) = resolve_conflict(local, remote);
    let mut record = ConflictRecord::new(local.clone(), remote.clone());
    record.resolve(resolution, reason);
    Ok(Verdict {
        resolution,
        reason,
        conflict: Some(record),
    })
}

fn resolve_conflict(local: &Entity, remote: &RemoteEntity) -> (Resolution, ResolutionReason) {
    if remote.deleted && !local.deleted && local.modified <= remote.modified {
        return (Resolution::AcceptRemote, ResolutionReason::TombstonePrecedence);
    }
    if local.deleted && !remote.deleted && remote.modified <= local.modified {
        return (Resolution::KeepLocal, ResolutionReason::TombstonePrecedence);
    }

    match local.modified.cmp(&remote.modified) {
        std::cmp::Ordering::Greater => (Resolution::KeepLocal, ResolutionReason::NewerTimestamp),
        std::cmp::Ordering::Less => (Resolution::AcceptRemote, ResolutionReason::NewerTimestamp),
        std::cmp::Ordering::Equal => (Resolution::AcceptRemote, ResolutionReason::TieGoesToRemote),
    }
}
