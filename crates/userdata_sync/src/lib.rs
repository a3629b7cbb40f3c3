//! # User Data Sync
//!
//! Synchronization engine keeping the local store consistent with the
//! remote user-data service.
//!
//! This crate provides:
//! - Sync state machine (idle → pulling → reconciling → pushing → idle)
//! - Deterministic conflict resolution (last writer wins, ties go to the
//!   remote, tombstones beat concurrent edits)
//! - Retry with exponential backoff and jitter
//! - Remote client and identity gate abstractions, plus a CBOR-over-HTTP
//!   adapter
//! - An async scheduler coalescing sync triggers into one running cycle
//!
//! ## Architecture
//!
//! The engine implements a **pull-then-push** model:
//! 1. Pull remote pages after the stored cursor
//! 2. Reconcile each page against the local store and persist the cursor
//! 3. Push a snapshot of the pending local changes in batches
//!
//! ## Key Invariants
//!
//! - The cursor only advances after its page is durably applied
//! - A change leaves the local log only once the remote acknowledged it
//! - Every remote call runs for an explicit identity
//! - At most one cycle runs per engine

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod http;
mod identity;
mod reconcile;
mod remote;
mod scheduler;

pub use config::{LogoutPolicy, RetryConfig, SyncConfig, DEFAULT_SCOPE};
pub use engine::{SyncEngine, SyncEvent, SyncPhase, SyncReport, SyncStats};
pub use error::{SyncError, SyncResult};
pub use http::{classify_status, HttpClient, HttpFailure, HttpRemote, HttpResponse, PULL_PATH, PUSH_PATH};
pub use identity::{IdentityGate, Rejection, SessionGate};
pub use reconcile::{reconcile, ConflictResolutionError, Verdict};
pub use remote::{MockRemote, RemoteClient, RemoteError, RemoteResult};
pub use scheduler::{SharedSyncResult, SyncScheduler, Trigger};
