//! Crash simulation for the local store.
//!
//! [`CrashableBackend`] wraps a backend and starts failing every write once
//! a configured number of appends or bytes has gone through, the way a
//! process killed mid-write leaves its journal. An append that crosses the
//! byte threshold is torn: its prefix reaches the inner backend.
//!
//! ## Usage
//!
//! ```rust
//! use userdata_storage::{InMemoryBackend, StorageBackend};
//! use userdata_testkit::CrashableBackend;
//!
//! let bytes = InMemoryBackend::new();
//! let mut backend = CrashableBackend::new(Box::new(bytes.clone()));
//! let switch = backend.switch();
//!
//! switch.crash_after_appends(1);
//! backend.append(b"first").unwrap();
//! assert!(backend.append(b"second").is_err());
//! assert!(switch.has_crashed());
//! assert_eq!(bytes.data(), b"first");
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use userdata_storage::{StorageBackend, StorageError, StorageResult};

#[derive(Debug)]
struct SwitchState {
    appends_left: AtomicU64,
    bytes_left: AtomicU64,
    crashed: AtomicBool,
    appends: AtomicU64,
}

/// Shared control of a [`CrashableBackend`].
///
/// The backend itself is owned by the store, so tests arm it through this
/// handle.
#[derive(Debug, Clone)]
pub struct CrashSwitch {
    state: Arc<SwitchState>,
}

impl CrashSwitch {
    fn new() -> Self {
        Self {
            state: Arc::new(SwitchState {
                appends_left: AtomicU64::new(u64::MAX),
                bytes_left: AtomicU64::new(u64::MAX),
                crashed: AtomicBool::new(false),
                appends: AtomicU64::new(0),
            }),
        }
    }

    /// Lets `count` more appends through, then crashes.
    pub fn crash_after_appends(&self, count: u64) {
        self.state.appends_left.store(count, Ordering::SeqCst);
    }

    /// Lets `bytes` more bytes through, then crashes. The append crossing
    /// the threshold is torn.
    pub fn crash_after_bytes(&self, bytes: u64) {
        self.state.bytes_left.store(bytes, Ordering::SeqCst);
    }

    /// Crashes immediately.
    pub fn crash_now(&self) {
        self.state.crashed.store(true, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Appends attempted so far.
    pub fn appends(&self) -> u64 {
        self.state.appends.load(Ordering::SeqCst)
    }

    /// Disarms the switch and clears the crash.
    pub fn reset(&self) {
        self.state.appends_left.store(u64::MAX, Ordering::SeqCst);
        self.state.bytes_left.store(u64::MAX, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
    }

    fn check(&self) -> StorageResult<()> {
        if self.has_crashed() {
            Err(crashed())
        } else {
            Ok(())
        }
    }
}

fn crashed() -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::Other, "simulated crash"))
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    switch: CrashSwitch,
}

impl CrashableBackend {
    /// Wraps `inner`; the switch starts disarmed.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            switch: CrashSwitch::new(),
        }
    }

    /// Returns a handle controlling this backend.
    pub fn switch(&self) -> CrashSwitch {
        self.switch.clone()
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let state = &self.switch.state;
        state.appends.fetch_add(1, Ordering::SeqCst);
        self.switch.check()?;

        let appends_left = state.appends_left.load(Ordering::SeqCst);
        if appends_left == 0 {
            self.switch.crash_now();
            return Err(crashed());
        }

        let bytes_left = state.bytes_left.load(Ordering::SeqCst);
        let len = data.len() as u64;
        if len > bytes_left {
            // Torn write: only the prefix makes it to disk.
            let prefix = usize::try_from(bytes_left).unwrap_or(data.len());
            if prefix > 0 {
                self.inner.append(&data[..prefix])?;
            }
            self.switch.crash_now();
            return Err(crashed());
        }

        let offset = self.inner.append(data)?;
        if appends_left != u64::MAX {
            state.appends_left.store(appends_left - 1, Ordering::SeqCst);
        }
        if bytes_left != u64::MAX {
            state.bytes_left.store(bytes_left - len, Ordering::SeqCst);
        }
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.switch.check()?;
        self.inner.flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.switch.check()?;
        self.inner.sync()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.switch.check()?;
        self.inner.truncate(new_size)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        self.switch.check()?;
        self.inner.replace(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use userdata_storage::InMemoryBackend;

    #[test]
    fn torn_append_keeps_prefix() {
        let bytes = InMemoryBackend::new();
        let mut backend = CrashableBackend::new(Box::new(bytes.clone()));
        let switch = backend.switch();

        switch.crash_after_bytes(6);
        backend.append(b"abcd").unwrap();
        assert!(backend.append(b"efgh").is_err());
        assert_eq!(bytes.data(), b"abcdef");

        // Everything fails after the crash, reads excepted.
        assert!(backend.truncate(0).is_err());
        assert!(backend.replace(b"x").is_err());
        assert_eq!(backend.size().unwrap(), 6);
    }

    #[test]
    fn reset_disarms() {
        let mut backend = CrashableBackend::new(Box::new(InMemoryBackend::new()));
        let switch = backend.switch();
        switch.crash_now();
        assert!(backend.append(b"a").is_err());

        switch.reset();
        backend.append(b"a").unwrap();
        assert_eq!(switch.appends(), 2);
    }
}
