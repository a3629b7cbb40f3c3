//! # User Data Testkit
//!
//! Test utilities for the user-data store and sync engine.
//!
//! This crate provides:
//! - [`InMemoryRemote`], a remote service with paged pulls, last-writer-wins
//!   pushes and fault injection
//! - [`CrashableBackend`], a storage wrapper simulating crashes and torn
//!   writes
//! - [`TestStore`] and [`TestDevice`] fixtures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use userdata_testkit::prelude::*;
//!
//! #[test]
//! fn devices_converge() {
//!     let remote = Arc::new(InMemoryRemote::new());
//!     let a = TestDevice::new("a", remote.clone(), "acct");
//!     let b = TestDevice::new("b", remote, "acct");
//!     a.put("urn:x", EntityKind::History, b"x");
//!     a.sync().unwrap();
//!     b.sync().unwrap();
//!     assert_eq!(a.visible(), b.visible());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::remote::*;
}

pub use crash::{CrashSwitch, CrashableBackend};
pub use fixtures::{fast_config, identity, visible_set, TestDevice, TestEngine, TestStore};
pub use generators::*;
pub use remote::InMemoryRemote;
