//! An in-memory remote user-data service.
//!
//! Keeps the latest version of every entity per account, stamped with a
//! server sequence number. The cursor handed to clients is that sequence
//! number in decimal, so a pull returns every version written after the
//! client's cursor.
//!
//! Pushes are merged with the same last-writer-wins rules the clients use,
//! so several devices syncing against one instance converge.
//!
//! Faults can be injected per call: transient or permanent failures,
//! unreachability, rejected entities, lost acknowledgments and latency.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use userdata_model::{
    EntityId, Identity, PullPage, PullRequest, PushAck, PushRequest, RemoteEntity, SyncCursor,
};
use userdata_sync::{RemoteClient, RemoteError, RemoteResult};

#[derive(Debug, Clone)]
struct Stored {
    seq: u64,
    entity: RemoteEntity,
}

#[derive(Debug, Default)]
struct Account {
    latest: BTreeMap<EntityId, Stored>,
    next_seq: u64,
}

impl Account {
    fn write(&mut self, entity: RemoteEntity) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.latest.insert(entity.id.clone(), Stored { seq, entity });
        seq
    }

    /// Returns true if `incoming` replaces the stored version.
    fn accepts(&self, incoming: &RemoteEntity) -> bool {
        let Some(current) = self.latest.get(&incoming.id).map(|s| &s.entity) else {
            return true;
        };
        if incoming.deleted && !current.deleted {
            return current.modified <= incoming.modified;
        }
        if current.deleted && !incoming.deleted {
            return incoming.modified > current.modified;
        }
        // Ties keep the version the server already has.
        incoming.modified > current.modified
    }
}

#[derive(Debug, Default)]
struct Faults {
    pull_failures: VecDeque<RemoteError>,
    push_failures: VecDeque<RemoteError>,
    rejected: HashSet<EntityId>,
    ack_limit: Option<usize>,
    latency: Duration,
}

/// In-memory implementation of [`RemoteClient`] for tests.
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    accounts: Mutex<HashMap<String, Account>>,
    faults: Mutex<Faults>,
    unreachable: AtomicBool,
    pulls: Mutex<Vec<(String, PullRequest)>>,
    pushes: Mutex<Vec<(String, PushRequest)>>,
}

impl InMemoryRemote {
    /// Creates an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a version directly, as another device would.
    ///
    /// The version is stored unconditionally. Returns its sequence number.
    pub fn seed(&self, account_id: &str, entity: RemoteEntity) -> u64 {
        self.accounts
            .lock()
            .entry(account_id.to_string())
            .or_default()
            .write(entity)
    }

    /// Latest version of every entity of an account, tombstones included.
    pub fn entities(&self, account_id: &str) -> Vec<RemoteEntity> {
        self.accounts
            .lock()
            .get(account_id)
            .map(|a| a.latest.values().map(|s| s.entity.clone()).collect())
            .unwrap_or_default()
    }

    /// Latest version of one entity.
    pub fn get(&self, account_id: &str, id: &EntityId) -> Option<RemoteEntity> {
        self.accounts
            .lock()
            .get(account_id)
            .and_then(|a| a.latest.get(id))
            .map(|s| s.entity.clone())
    }

    /// Visible entities of an account.
    pub fn visible(&self, account_id: &str) -> Vec<RemoteEntity> {
        self.entities(account_id)
            .into_iter()
            .filter(|e| !e.deleted)
            .collect()
    }

    /// Highest sequence number of an account.
    pub fn head(&self, account_id: &str) -> u64 {
        self.accounts
            .lock()
            .get(account_id)
            .map_or(0, |a| a.next_seq)
    }

    /// Makes the next pull fail with `error`.
    pub fn fail_next_pull(&self, error: RemoteError) {
        self.faults.lock().pull_failures.push_back(error);
    }

    /// Makes the next push fail with `error`.
    pub fn fail_next_push(&self, error: RemoteError) {
        self.faults.lock().push_failures.push_back(error);
    }

    /// Rejects every pushed change for `id`.
    pub fn reject_entity(&self, id: impl Into<EntityId>) {
        self.faults.lock().rejected.insert(id.into());
    }

    /// The next push is applied in full but only its first `count` changes
    /// are acknowledged, as if the response was cut short.
    pub fn ack_only_first(&self, count: usize) {
        self.faults.lock().ack_limit = Some(count);
    }

    /// Delays every call.
    pub fn set_latency(&self, latency: Duration) {
        self.faults.lock().latency = latency;
    }

    /// Sets the reachability probe; unreachable calls fail transiently.
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Every pull received, with the account it ran for.
    pub fn pull_log(&self) -> Vec<(String, PullRequest)> {
        self.pulls.lock().clone()
    }

    /// Every push received, with the account it ran for.
    pub fn push_log(&self) -> Vec<(String, PushRequest)> {
        self.pushes.lock().clone()
    }

    /// Number of pulls received.
    pub fn pull_count(&self) -> usize {
        self.pulls.lock().len()
    }

    /// Number of pushes received.
    pub fn push_count(&self) -> usize {
        self.pushes.lock().len()
    }

    fn delay(&self) -> RemoteResult<()> {
        let latency = self.faults.lock().latency;
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable("simulated outage".into()));
        }
        Ok(())
    }
}

impl RemoteClient for InMemoryRemote {
    fn pull(&self, identity: &Identity, request: &PullRequest) -> RemoteResult<PullPage> {
        self.pulls
            .lock()
            .push((identity.account_id.clone(), request.clone()));
        self.delay()?;
        if let Some(error) = self.faults.lock().pull_failures.pop_front() {
            return Err(error);
        }

        let after = match &request.cursor {
            None => 0,
            Some(cursor) => cursor
                .as_str()
                .parse::<u64>()
                .map_err(|_| RemoteError::Malformed(format!("unknown cursor {:?}", cursor.as_str())))?,
        };

        let accounts = self.accounts.lock();
        let mut newer: Vec<&Stored> = accounts
            .get(&identity.account_id)
            .map(|a| a.latest.values().filter(|s| s.seq > after).collect())
            .unwrap_or_default();
        newer.sort_by_key(|s| s.seq);

        let limit = request.limit.max(1) as usize;
        let has_more = newer.len() > limit;
        newer.truncate(limit);
        let next = newer.last().map_or(after, |s| s.seq);

        Ok(PullPage::new(
            newer.into_iter().map(|s| s.entity.clone()).collect(),
            SyncCursor::new(next.to_string()),
            has_more,
        ))
    }

    fn push(&self, identity: &Identity, request: &PushRequest) -> RemoteResult<PushAck> {
        self.pushes
            .lock()
            .push((identity.account_id.clone(), request.clone()));
        self.delay()?;

        let (rejected_ids, ack_limit) = {
            let mut faults = self.faults.lock();
            if let Some(error) = faults.push_failures.pop_front() {
                return Err(error);
            }
            (faults.rejected.clone(), faults.ack_limit.take())
        };

        let mut accounts = self.accounts.lock();
        let account = accounts.entry(identity.account_id.clone()).or_default();
        let mut ack = PushAck::default();

        for change in &request.changes {
            if rejected_ids.contains(&change.entity.id) {
                ack.rejected.push(change.change_id);
                continue;
            }
            if account.accepts(&change.entity) {
                account.write(change.entity.clone());
            }
            ack.acknowledged.push(change.change_id);
        }

        if let Some(limit) = ack_limit {
            ack.acknowledged.truncate(limit);
        }
        Ok(ack)
    }

    fn is_reachable(&self) -> bool {
        !self.unreachable.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use userdata_model::{EntityKind, Operation, OutgoingChange, Timestamp};

    fn identity() -> Identity {
        Identity::new("acct", "token")
    }

    fn version(id: &str, ms: u64) -> RemoteEntity {
        RemoteEntity::new(id, EntityKind::History, vec![1], Timestamp::from_millis(ms))
    }

    fn change(change_id: u64, entity: RemoteEntity) -> OutgoingChange {
        OutgoingChange {
            change_id,
            operation: Operation::Update,
            entity,
        }
    }

    #[test]
    fn pull_pages_through_sequence() {
        let remote = InMemoryRemote::new();
        for i in 0..5 {
            remote.seed("acct", version(&format!("urn:{i}"), 10 + i));
        }

        let first = remote
            .pull(&identity(), &PullRequest::new("d", None, 3))
            .unwrap();
        assert_eq!(first.entities.len(), 3);
        assert!(first.has_more);
        assert_eq!(first.next_cursor.as_str(), "3");

        let second = remote
            .pull(&identity(), &PullRequest::new("d", Some(first.next_cursor), 3))
            .unwrap();
        assert_eq!(second.entities.len(), 2);
        assert!(!second.has_more);
        assert_eq!(second.next_cursor.as_str(), "5");
    }

    #[test]
    fn accounts_are_isolated() {
        let remote = InMemoryRemote::new();
        remote.seed("other", version("urn:a", 1));
        let page = remote
            .pull(&identity(), &PullRequest::new("d", None, 10))
            .unwrap();
        assert!(page.entities.is_empty());
        assert_eq!(page.next_cursor.as_str(), "0");
    }

    #[test]
    fn push_merges_last_writer_wins() {
        let remote = InMemoryRemote::new();
        remote.seed("acct", version("urn:a", 20));

        let request = PushRequest::new("d", vec![change(1, version("urn:a", 10))]);
        let ack = remote.push(&identity(), &request).unwrap();
        assert_eq!(ack.acknowledged, vec![1]);
        assert_eq!(
            remote.get("acct", &EntityId::new("urn:a")).unwrap().modified,
            Timestamp::from_millis(20)
        );

        let tombstone = RemoteEntity::tombstone("urn:a", EntityKind::History, Timestamp::from_millis(20));
        remote
            .push(&identity(), &PushRequest::new("d", vec![change(2, tombstone)]))
            .unwrap();
        assert!(remote.get("acct", &EntityId::new("urn:a")).unwrap().deleted);
        assert!(remote.visible("acct").is_empty());
    }

    #[test]
    fn injected_faults() {
        let remote = InMemoryRemote::new();
        remote.fail_next_pull(RemoteError::Timeout);
        assert_eq!(
            remote.pull(&identity(), &PullRequest::new("d", None, 1)),
            Err(RemoteError::Timeout)
        );

        remote.reject_entity("urn:bad");
        remote.ack_only_first(1);
        let request = PushRequest::new(
            "d",
            vec![
                change(1, version("urn:a", 1)),
                change(2, version("urn:b", 1)),
                change(3, version("urn:bad", 1)),
            ],
        );
        let ack = remote.push(&identity(), &request).unwrap();
        assert_eq!(ack.acknowledged, vec![1]);
        assert_eq!(ack.rejected, vec![3]);
        // The unacknowledged change was applied anyway.
        assert!(remote.get("acct", &EntityId::new("urn:b")).is_some());

        remote.set_reachable(false);
        assert!(!remote.is_reachable());
        assert!(matches!(
            remote.pull(&identity(), &PullRequest::new("d", None, 1)),
            Err(RemoteError::Unreachable(_))
        ));
    }
}
