//! # User Data Core
//!
//! Durable, offline-first storage for user data.
//!
//! This crate provides:
//! - [`LocalStore`], the in-memory entity store persisted through an
//!   append-only, checksummed journal with atomic multi-entity commits
//! - [`DirtyTracker`], the change log of unacknowledged local mutations
//!   that doubles as the offline queue
//! - [`LogicalClock`], the hybrid clock stamping local writes
//! - [`ChangeFeed`], post-commit notifications
//!
//! Every local write is journaled together with its change record, so the
//! store and the change log can never disagree after a crash.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod changelog;
mod clock;
mod config;
mod error;
mod filter;
pub mod journal;
mod state;
mod store;

pub use change_feed::{ChangeFeed, StoreEvent, StoreEventKind};
pub use changelog::DirtyTracker;
pub use clock::{LogicalClock, ManualClock, SystemClock, TimeSource};
pub use config::StoreConfig;
pub use error::{CoreError, CoreResult};
pub use filter::ListFilter;
pub use store::{
    LocalStore, PushSnapshot, ReconcileOutcome, ResetMode, StoreStats, WriteOrigin, JOURNAL_FILE,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
