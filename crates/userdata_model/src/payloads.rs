//! Typed payloads for the built-in user-data kinds.
//!
//! The engine treats payloads as opaque bytes; these types exist for the
//! services layer and for tools that want to render entities.

use crate::ids::EntityKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A payload type bound to one [`EntityKind`].
pub trait TypedPayload: Serialize + DeserializeOwned {
    /// Kind of the entities carrying this payload.
    const KIND: EntityKind;
}

/// Playback history entry for one media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Media URN.
    pub urn: String,
    /// Resume position in milliseconds.
    pub last_playback_ms: u64,
    /// Device the media was last played on.
    pub device_name: Option<String>,
}

impl TypedPayload for HistoryEntry {
    const KIND: EntityKind = EntityKind::History;
}

/// Bookmarked media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Media URN.
    pub urn: String,
}

impl TypedPayload for Bookmark {
    const KIND: EntityKind = EntityKind::Bookmark;
}

/// Playlist header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    /// Display name.
    pub name: String,
}

impl TypedPayload for Playlist {
    const KIND: EntityKind = EntityKind::Playlist;
}

/// One media inside a playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    /// Owning playlist entity id.
    pub playlist_id: String,
    /// Media URN.
    pub urn: String,
    /// Sort position inside the playlist.
    pub position: u32,
}

impl TypedPayload for PlaylistEntry {
    const KIND: EntityKind = EntityKind::PlaylistEntry;
}

/// One preference leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    /// Preference domain, e.g. an application module.
    pub domain: String,
    /// Dotted key path inside the domain.
    pub key_path: String,
    /// JSON value stored at the key path.
    pub value: serde_json::Value,
}

impl TypedPayload for Preference {
    const KIND: EntityKind = EntityKind::Preference;
}
