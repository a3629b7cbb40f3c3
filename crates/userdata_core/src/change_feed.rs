//! Post-commit notifications.
//!
//! Every commit that changes visible state emits one [`StoreEvent`] after it
//! is durable. UI layers use it for "did change" notifications; the sync
//! scheduler uses locally originated events as mutation triggers.
//!
//! ```rust,ignore
//! let events = store.subscribe();
//! std::thread::spawn(move || {
//!     while let Ok(event) = events.recv() {
//!         println!("{:?} changed {:?}", event.origin, event.entity_ids());
//!     }
//! });
//! ```

use crate::store::WriteOrigin;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};
use userdata_model::EntityId;

/// What a commit did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEventKind {
    /// These entities were written (tombstones included).
    Changed(Vec<EntityId>),
    /// The store was wiped or dissociated from its account.
    Cleared,
}

/// A committed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    /// Journal sequence of the commit.
    pub sequence: u64,
    /// Who made the change.
    pub origin: WriteOrigin,
    /// What changed.
    pub kind: StoreEventKind,
}

impl StoreEvent {
    /// Creates a change event.
    pub fn changed(sequence: u64, origin: WriteOrigin, entity_ids: Vec<EntityId>) -> Self {
        Self {
            sequence,
            origin,
            kind: StoreEventKind::Changed(entity_ids),
        }
    }

    /// Creates a clear event.
    pub fn cleared(sequence: u64, origin: WriteOrigin) -> Self {
        Self {
            sequence,
            origin,
            kind: StoreEventKind::Cleared,
        }
    }

    /// Ids of the written entities; empty for a clear.
    pub fn entity_ids(&self) -> &[EntityId] {
        match &self.kind {
            StoreEventKind::Changed(ids) => ids,
            StoreEventKind::Cleared => &[],
        }
    }
}

/// Fan-out of store events to any number of subscribers.
///
/// Events are delivered in commit order. Subscribers that dropped their
/// receiver are removed on the next emit.
#[derive(Default)]
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<StoreEvent>>>,
}

impl ChangeFeed {
    /// Creates a feed without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to all future events.
    ///
    /// The receiver should be drained regularly; the channel is unbounded.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Sends an event to every live subscriber.
    pub fn emit(&self, event: StoreEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn emit_and_receive() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();

        let event = StoreEvent::changed(1, WriteOrigin::Local, vec!["urn:a".into()]);
        feed.emit(event.clone());

        let received = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(received, event);
        assert_eq!(received.entity_ids().len(), 1);
    }

    #[test]
    fn multiple_subscribers() {
        let feed = ChangeFeed::new();
        let rx1 = feed.subscribe();
        let rx2 = feed.subscribe();

        let event = StoreEvent::cleared(3, WriteOrigin::Remote);
        feed.emit(event.clone());

        assert_eq!(rx1.recv().unwrap(), event);
        assert_eq!(rx2.recv().unwrap(), event);
        assert!(event.entity_ids().is_empty());
    }

    #[test]
    fn subscriber_cleanup() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);

        drop(rx);
        feed.emit(StoreEvent::cleared(1, WriteOrigin::Local));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn threaded_subscribe() {
        let feed = Arc::new(ChangeFeed::new());
        let rx = feed.subscribe();

        let feed_clone = Arc::clone(&feed);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            feed_clone.emit(StoreEvent::changed(
                7,
                WriteOrigin::Local,
                vec!["urn:b".into()],
            ));
        });

        let received = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(received.sequence, 7);
        handle.join().unwrap();
    }
}
