//! Playback history and resume positions.

use crate::context::{ServiceContext, UserRecord};
use crate::error::UserDataResult;
use userdata_core::ListFilter;
use userdata_model::payloads::HistoryEntry;
use userdata_model::EntityId;

const PREFIX: &str = "history:";

/// Playback history, one entry per media URN.
///
/// Entry ids are derived from the URN, so devices playing the same media
/// write the same entity and the latest playback wins.
#[derive(Clone)]
pub struct History {
    ctx: ServiceContext,
}

impl History {
    pub(crate) fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn id(urn: &str) -> EntityId {
        EntityId::new(format!("{PREFIX}{urn}"))
    }

    /// Records a playback of `urn` stopped at `last_playback_ms`.
    pub fn save_entry(
        &self,
        urn: &str,
        last_playback_ms: u64,
        device_name: Option<&str>,
    ) -> UserDataResult<UserRecord<HistoryEntry>> {
        let entry = HistoryEntry {
            urn: urn.to_string(),
            last_playback_ms,
            device_name: device_name.map(str::to_string),
        };
        self.ctx.put(Self::id(urn), entry)
    }

    /// The entry for `urn`, if any.
    pub fn entry(&self, urn: &str) -> UserDataResult<Option<UserRecord<HistoryEntry>>> {
        self.ctx.get(&Self::id(urn))
    }

    /// All entries, most recently played first.
    pub fn entries(&self) -> Vec<UserRecord<HistoryEntry>> {
        self.ctx.list(PREFIX, &ListFilter::new().newest_first())
    }

    /// The `limit` most recent entries.
    pub fn recent(&self, limit: usize) -> Vec<UserRecord<HistoryEntry>> {
        self.ctx
            .list(PREFIX, &ListFilter::new().newest_first().limit(limit))
    }

    /// Discards the entries for `urns`, or every entry for `None`.
    ///
    /// Returns the number of entries removed.
    pub fn discard(&self, urns: Option<&[&str]>) -> UserDataResult<usize> {
        let ids: Vec<EntityId> = match urns {
            Some(urns) => urns.iter().map(|urn| Self::id(urn)).collect(),
            None => self
                .ctx
                .list::<HistoryEntry>(PREFIX, &ListFilter::new())
                .into_iter()
                .map(|record| record.id)
                .collect(),
        };
        self.ctx.write_batch(Vec::new(), &ids)
    }
}
