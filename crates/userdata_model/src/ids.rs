//! Entity identifiers and kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Globally unique, device-independent entity identifier.
///
/// History entries and bookmarks use the media URN directly so that two
/// devices recording the same media converge on one entity. Records with
/// no natural key use [`EntityId::generate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The user-data kind an entity belongs to.
///
/// The engine never looks inside payloads; the kind only routes entities to
/// services and filters `list` queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Playback history entry.
    History,
    /// Bookmarked media.
    Bookmark,
    /// Playlist header.
    Playlist,
    /// Media inside a playlist.
    PlaylistEntry,
    /// One preference leaf.
    Preference,
    /// Application-defined kind.
    Custom(String),
}

impl EntityKind {
    /// Returns a stable lowercase name.
    pub fn as_str(&self) -> &str {
        match self {
            EntityKind::History => "history",
            EntityKind::Bookmark => "bookmark",
            EntityKind::Playlist => "playlist",
            EntityKind::PlaylistEntry => "playlist_entry",
            EntityKind::Preference => "preference",
            EntityKind::Custom(name) => name,
        }
    }

    /// Parses a name produced by [`EntityKind::as_str`].
    pub fn parse(name: &str) -> Self {
        match name {
            "history" => EntityKind::History,
            "bookmark" => EntityKind::Bookmark,
            "playlist" => EntityKind::Playlist,
            "playlist_entry" => EntityKind::PlaylistEntry,
            "preference" => EntityKind::Preference,
            other => EntityKind::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
