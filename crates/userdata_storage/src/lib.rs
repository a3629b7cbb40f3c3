//! # User Data Storage
//!
//! Byte-store backends underneath the user-data journal.
//!
//! Backends are **opaque**: they append, read back and durably flush
//! bytes. Record framing, checksums and replay belong to
//! `userdata_core`.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - tests and ephemeral stores; clones share bytes
//! - [`FileBackend`] - a single locked journal file on disk
//!
//! ## Example
//!
//! ```rust
//! use userdata_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"history").unwrap();
//! assert_eq!(backend.read_at(offset, 7).unwrap(), b"history");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
