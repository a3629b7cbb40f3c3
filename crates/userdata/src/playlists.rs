//! Playlists and their entries.
//!
//! A playlist and each of its entries are separate entities, so renaming a
//! playlist on one device and adding media to it on another merge cleanly.
//! Entry ids embed the playlist id and the URN; the same media appears at
//! most once per playlist.

use crate::context::{ServiceContext, UserRecord};
use crate::error::{UserDataError, UserDataResult};
use userdata_core::ListFilter;
use userdata_model::payloads::{Playlist, PlaylistEntry};
use userdata_model::{Entity, EntityId};

const PREFIX: &str = "playlist:";
const ENTRY_PREFIX: &str = "playlist-entry:";

/// User playlists.
#[derive(Clone)]
pub struct Playlists {
    ctx: ServiceContext,
}

impl Playlists {
    pub(crate) fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn entries_prefix(playlist_id: &EntityId) -> String {
        format!("{ENTRY_PREFIX}{playlist_id}:")
    }

    fn entry_id(playlist_id: &EntityId, urn: &str) -> EntityId {
        EntityId::new(format!("{}{urn}", Self::entries_prefix(playlist_id)))
    }

    fn require(&self, playlist_id: &EntityId) -> UserDataResult<UserRecord<Playlist>> {
        self.ctx
            .get(playlist_id)?
            .ok_or_else(|| UserDataError::not_found("playlist", playlist_id.as_str()))
    }

    /// Creates a playlist with a fresh id.
    pub fn create(&self, name: &str) -> UserDataResult<UserRecord<Playlist>> {
        let id = EntityId::new(format!("{PREFIX}{}", EntityId::generate()));
        self.ctx.put(
            id,
            Playlist {
                name: name.to_string(),
            },
        )
    }

    /// The playlist with `playlist_id`, if any.
    pub fn get(&self, playlist_id: &EntityId) -> UserDataResult<Option<UserRecord<Playlist>>> {
        self.ctx.get(playlist_id)
    }

    /// All playlists, ordered by name.
    pub fn list(&self) -> Vec<UserRecord<Playlist>> {
        let mut playlists: Vec<UserRecord<Playlist>> = self.ctx.list(PREFIX, &ListFilter::new());
        playlists.sort_by(|a, b| a.value.name.cmp(&b.value.name).then_with(|| a.id.cmp(&b.id)));
        playlists
    }

    /// Renames a playlist.
    pub fn rename(&self, playlist_id: &EntityId, name: &str) -> UserDataResult<UserRecord<Playlist>> {
        self.require(playlist_id)?;
        self.ctx.put(
            playlist_id.clone(),
            Playlist {
                name: name.to_string(),
            },
        )
    }

    /// Deletes a playlist together with its entries, in one commit.
    ///
    /// Returns false if the playlist did not exist.
    pub fn delete(&self, playlist_id: &EntityId) -> UserDataResult<bool> {
        if self.ctx.get::<Playlist>(playlist_id)?.is_none() {
            return Ok(false);
        }
        let mut ids: Vec<EntityId> = self
            .entries(playlist_id)
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        ids.push(playlist_id.clone());
        self.ctx.write_batch(Vec::new(), &ids)?;
        Ok(true)
    }

    /// Appends `urn` to a playlist. Adding media already in the playlist
    /// returns the existing entry.
    pub fn add_entry(
        &self,
        playlist_id: &EntityId,
        urn: &str,
    ) -> UserDataResult<UserRecord<PlaylistEntry>> {
        self.require(playlist_id)?;
        let id = Self::entry_id(playlist_id, urn);
        if let Some(existing) = self.ctx.get(&id)? {
            return Ok(existing);
        }

        let position = self
            .entries(playlist_id)
            .last()
            .map_or(0, |last| last.value.position.saturating_add(1));
        self.ctx.put(
            id,
            PlaylistEntry {
                playlist_id: playlist_id.to_string(),
                urn: urn.to_string(),
                position,
            },
        )
    }

    /// Removes `urn` from a playlist. Returns false if it was not there.
    pub fn remove_entry(&self, playlist_id: &EntityId, urn: &str) -> UserDataResult<bool> {
        self.ctx.delete(&Self::entry_id(playlist_id, urn))
    }

    /// Rewrites entry positions so the playlist follows `urns`.
    ///
    /// Entries not named keep their relative order after the named ones.
    pub fn reorder(&self, playlist_id: &EntityId, urns: &[&str]) -> UserDataResult<()> {
        self.require(playlist_id)?;
        let mut entries = self.entries(playlist_id);
        entries.sort_by_key(|entry| {
            urns.iter()
                .position(|urn| *urn == entry.value.urn)
                .unwrap_or(usize::MAX)
        });

        let mut updates = Vec::new();
        for (position, mut entry) in entries.into_iter().enumerate() {
            let position = u32::try_from(position).unwrap_or(u32::MAX);
            if entry.value.position != position {
                entry.value.position = position;
                updates.push(Entity::typed(entry.id, &entry.value)?);
            }
        }
        self.ctx.write_batch(updates, &[])?;
        Ok(())
    }

    /// Entries of a playlist in position order.
    pub fn entries(&self, playlist_id: &EntityId) -> Vec<UserRecord<PlaylistEntry>> {
        let mut entries: Vec<UserRecord<PlaylistEntry>> = self
            .ctx
            .list(&Self::entries_prefix(playlist_id), &ListFilter::new());
        entries.sort_by(|a, b| {
            a.value
                .position
                .cmp(&b.value.position)
                .then_with(|| a.value.urn.cmp(&b.value.urn))
        });
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use userdata_core::LocalStore;

    fn playlists() -> (Playlists, Arc<LocalStore>) {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        (
            Playlists::new(ServiceContext::new(store.clone(), None)),
            store,
        )
    }

    fn urns(entries: Vec<UserRecord<PlaylistEntry>>) -> Vec<String> {
        entries.into_iter().map(|e| e.value.urn).collect()
    }

    #[test]
    fn create_rename_list() {
        let (playlists, _) = playlists();
        let b = playlists.create("b").unwrap();
        playlists.create("a").unwrap();
        playlists.rename(&b.id, "c").unwrap();

        let names: Vec<_> = playlists.list().into_iter().map(|p| p.value.name).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert!(b.id.as_str().starts_with(PREFIX));
    }

    #[test]
    fn rename_missing_playlist_fails() {
        let (playlists, _) = playlists();
        let err = playlists.rename(&EntityId::new("playlist:nope"), "x").unwrap_err();
        assert!(matches!(err, UserDataError::NotFound { kind: "playlist", .. }));
    }

    #[test]
    fn entries_keep_insertion_order() {
        let (playlists, _) = playlists();
        let list = playlists.create("mix").unwrap();
        for urn in ["urn:c", "urn:a", "urn:b"] {
            playlists.add_entry(&list.id, urn).unwrap();
        }
        let again = playlists.add_entry(&list.id, "urn:a").unwrap();

        assert_eq!(again.value.position, 1);
        assert_eq!(urns(playlists.entries(&list.id)), vec!["urn:c", "urn:a", "urn:b"]);

        assert!(playlists.remove_entry(&list.id, "urn:a").unwrap());
        playlists.add_entry(&list.id, "urn:d").unwrap();
        assert_eq!(urns(playlists.entries(&list.id)), vec!["urn:c", "urn:b", "urn:d"]);
    }

    #[test]
    fn reorder_moves_named_entries_first() {
        let (playlists, _) = playlists();
        let list = playlists.create("mix").unwrap();
        for urn in ["urn:a", "urn:b", "urn:c"] {
            playlists.add_entry(&list.id, urn).unwrap();
        }
        playlists.reorder(&list.id, &["urn:c", "urn:a"]).unwrap();
        assert_eq!(urns(playlists.entries(&list.id)), vec!["urn:c", "urn:a", "urn:b"]);
    }

    #[test]
    fn delete_cascades_to_entries() {
        let (playlists, store) = playlists();
        let list = playlists.create("mix").unwrap();
        let other = playlists.create("other").unwrap();
        playlists.add_entry(&list.id, "urn:a").unwrap();
        playlists.add_entry(&list.id, "urn:b").unwrap();
        playlists.add_entry(&other.id, "urn:a").unwrap();

        let before = store.last_change_id();
        assert!(playlists.delete(&list.id).unwrap());
        assert!(!playlists.delete(&list.id).unwrap());

        assert!(playlists.get(&list.id).unwrap().is_none());
        assert!(playlists.entries(&list.id).is_empty());
        assert_eq!(playlists.entries(&other.id).len(), 1);
        // One change per tombstone.
        assert_eq!(store.last_change_id(), before.map(|id| id + 3));
    }
}
