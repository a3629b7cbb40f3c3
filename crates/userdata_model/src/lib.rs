//! # User Data Model
//!
//! Types shared by the local store, the synchronization engine and the
//! remote adapter.
//!
//! This crate provides:
//! - [`Entity`], the tagged user-data record (`id`, `kind`, opaque payload,
//!   logical timestamp, tombstone flag, local sync state)
//! - [`ChangeRecord`], one entry of the local change log
//! - [`SyncCursor`], the opaque remote progress token
//! - [`ConflictRecord`] and [`Resolution`]
//! - Remote messages ([`PullRequest`], [`PullPage`], [`PushRequest`],
//!   [`PushAck`]) and their CBOR codec
//! - Typed payloads for history, bookmarks, playlists and preferences
//!
//! This is a pure data crate with no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod codec;
mod conflict;
mod cursor;
mod entity;
mod identity;
mod ids;
mod messages;
pub mod payloads;
mod timestamp;

pub use change::{ChangeRecord, Operation};
pub use codec::{from_cbor, to_cbor, CodecError, CodecResult};
pub use conflict::{ConflictRecord, Resolution, ResolutionReason};
pub use cursor::SyncCursor;
pub use entity::{Entity, Payload, RemoteEntity, SyncState};
pub use identity::Identity;
pub use ids::{EntityId, EntityKind};
pub use messages::{OutgoingChange, PullPage, PullRequest, PushAck, PushRequest};
pub use payloads::TypedPayload;
pub use timestamp::Timestamp;
