//! # User Data
//!
//! Offline-first user data for media applications: playback history,
//! bookmarks, playlists and preferences, stored locally and kept in sync
//! with a remote service when the user is logged in.
//!
//! Every write is durable locally before it returns, whether or not the
//! device is online. A background scheduler pulls remote changes, resolves
//! conflicts by last-writer-wins with tombstone precedence, and pushes local
//! changes.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use userdata::{SessionGate, UserData, UserDataConfig};
//!
//! let gate = Arc::new(SessionGate::new());
//! let user_data = UserData::open("user_data", UserDataConfig::new("phone"), remote, gate)?;
//!
//! user_data.bookmarks().add("urn:media:1")?;
//! let playlist = user_data.playlists().create("Later")?;
//! user_data.playlists().add_entry(&playlist.id, "urn:media:2")?;
//! user_data.preferences().set("player", "subtitles.language", "fr".into())?;
//! ```
//!
//! ## Crates
//!
//! - `userdata_core`: the journaled local store and change log
//! - `userdata_sync`: the sync engine, remote adapter and scheduler
//! - `userdata_model`: shared types

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bookmarks;
mod config;
mod context;
mod error;
mod history;
mod playlists;
mod preferences;
mod user_data;

pub use bookmarks::Bookmarks;
pub use config::UserDataConfig;
pub use context::{MutationListener, UserRecord};
pub use error::{UserDataError, UserDataResult};
pub use history::History;
pub use playlists::Playlists;
pub use preferences::Preferences;
pub use user_data::UserData;

pub use userdata_core::{LocalStore, ResetMode, StoreConfig, StoreEvent};
pub use userdata_model::payloads::{Bookmark, HistoryEntry, Playlist, PlaylistEntry, Preference};
pub use userdata_model::{EntityId, Identity, Timestamp};
pub use userdata_sync::{
    LogoutPolicy, RemoteClient, RetryConfig, SessionGate, SyncConfig, SyncEvent, SyncReport,
    Trigger,
};
