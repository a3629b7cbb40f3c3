//! Listing filters.

use userdata_model::{Entity, SyncState, Timestamp};

/// Selects and orders entities returned by [`LocalStore::list`](crate::LocalStore::list).
///
/// The default lists visible entities in id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Include tombstones.
    pub include_tombstones: bool,
    /// Only entities modified strictly after this time.
    pub modified_after: Option<Timestamp>,
    /// Only entities in this sync state.
    pub sync_state: Option<SyncState>,
    /// Order by modification time, newest first, instead of by id.
    pub newest_first: bool,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl ListFilter {
    /// Visible entities in id order.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Includes tombstones.
    #[must_use]
    pub const fn with_tombstones(mut self) -> Self {
        self.include_tombstones = true;
        self
    }

    /// Keeps entities modified after `time`.
    #[must_use]
    pub const fn modified_after(mut self, time: Timestamp) -> Self {
        self.modified_after = Some(time);
        self
    }

    /// Keeps entities in `state`.
    #[must_use]
    pub const fn in_state(mut self, state: SyncState) -> Self {
        self.sync_state = Some(state);
        self
    }

    /// Orders newest first.
    #[must_use]
    pub const fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn matches(&self, entity: &Entity) -> bool {
        if entity.deleted && !self.include_tombstones {
            return false;
        }
        if let Some(after) = self.modified_after {
            if entity.modified <= after {
                return false;
            }
        }
        match self.sync_state {
            Some(state) => entity.sync_state == state,
            None => true,
        }
    }

    pub(crate) fn finish(&self, mut entities: Vec<Entity>) -> Vec<Entity> {
        if self.newest_first {
            entities.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.id.cmp(&b.id)));
        }
        if let Some(limit) = self.limit {
            entities.truncate(limit);
        }
        entities
    }
}
