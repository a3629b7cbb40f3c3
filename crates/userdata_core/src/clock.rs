//! Hybrid logical clock for local writes.

use std::sync::atomic::{AtomicU64, Ordering};
use userdata_model::Timestamp;

/// Source of wall-clock time.
pub trait TimeSource: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A manually driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `millis`.
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Sets the current reading.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Moves the reading forward.
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// Issues strictly increasing timestamps for local writes.
///
/// Every issued value is greater than anything previously issued or
/// observed, so a local edit made after seeing a remote version always
/// wins against it even when the wall clock lags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogicalClock {
    last: Timestamp,
}

impl LogicalClock {
    /// Creates a clock that has seen nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next timestamp given the current wall-clock reading.
    pub fn tick(&mut self, now: Timestamp) -> Timestamp {
        let next = now.max(self.last.next());
        self.last = next;
        next
    }

    /// Advances past a timestamp produced elsewhere.
    pub fn observe(&mut self, seen: Timestamp) {
        if seen > self.last {
            self.last = seen;
        }
    }

    /// Returns the highest timestamp issued or observed.
    pub fn last(&self) -> Timestamp {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_follows_wall_clock() {
        let mut clock = LogicalClock::new();
        assert_eq!(
            clock.tick(Timestamp::from_millis(10)),
            Timestamp::from_millis(10)
        );
        assert_eq!(
            clock.tick(Timestamp::from_millis(15)),
            Timestamp::from_millis(15)
        );
    }

    #[test]
    fn tick_is_strictly_increasing_when_wall_clock_stalls() {
        let mut clock = LogicalClock::new();
        let a = clock.tick(Timestamp::from_millis(10));
        let b = clock.tick(Timestamp::from_millis(10));
        let c = clock.tick(Timestamp::from_millis(3));
        assert!(a < b && b < c);
    }

    #[test]
    fn observe_moves_past_remote_time() {
        let mut clock = LogicalClock::new();
        clock.observe(Timestamp::from_millis(100));
        assert_eq!(
            clock.tick(Timestamp::from_millis(50)),
            Timestamp::from_millis(101)
        );

        clock.observe(Timestamp::from_millis(20));
        assert_eq!(clock.last(), Timestamp::from_millis(101));
    }

    #[test]
    fn manual_clock() {
        let clock = ManualClock::new(5);
        clock.advance(10);
        assert_eq!(clock.now(), Timestamp::from_millis(15));
        clock.set(2);
        assert_eq!(clock.now(), Timestamp::from_millis(2));
    }
}
