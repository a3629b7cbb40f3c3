//! The remote client seam.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use userdata_model::{Identity, PullPage, PullRequest, PushAck, PushRequest, SyncCursor};

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Failure of a remote call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The service could not be reached.
    #[error("remote unreachable: {0}")]
    Unreachable(String),
    /// The request did not complete in time.
    #[error("remote request timed out")]
    Timeout,
    /// The service answered with an error status.
    #[error("remote returned status {status}: {message}")]
    Server {
        /// HTTP-like status code.
        status: u16,
        /// Server-provided detail.
        message: String,
    },
    /// The credentials were refused.
    #[error("remote rejected credentials: {0}")]
    Unauthorized(String),
    /// The request or the response could not be understood.
    #[error("malformed exchange: {0}")]
    Malformed(String),
}

impl RemoteError {
    /// Returns true for failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Unreachable(_) | RemoteError::Timeout => true,
            RemoteError::Server { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            RemoteError::Unauthorized(_) | RemoteError::Malformed(_) => false,
        }
    }
}

/// The remote user-data service.
///
/// Calls are blocking; the scheduler runs them on a blocking worker. Every
/// call receives the identity it runs for.
pub trait RemoteClient: Send + Sync {
    /// Fetches the page of changes after `request.cursor`.
    fn pull(&self, identity: &Identity, request: &PullRequest) -> RemoteResult<PullPage>;

    /// Sends a batch of local changes.
    fn push(&self, identity: &Identity, request: &PushRequest) -> RemoteResult<PushAck>;

    /// Cheap connectivity probe.
    fn is_reachable(&self) -> bool {
        true
    }
}

impl<R: RemoteClient + ?Sized> RemoteClient for Arc<R> {
    fn pull(&self, identity: &Identity, request: &PullRequest) -> RemoteResult<PullPage> {
        (**self).pull(identity, request)
    }

    fn push(&self, identity: &Identity, request: &PushRequest) -> RemoteResult<PushAck> {
        (**self).push(identity, request)
    }

    fn is_reachable(&self) -> bool {
        (**self).is_reachable()
    }
}

/// A scripted remote for unit tests.
///
/// Queued results are consumed in order; once a queue is empty, pulls return
/// an empty final page and pushes acknowledge everything.
#[derive(Debug, Default)]
pub struct MockRemote {
    pulls: Mutex<VecDeque<RemoteResult<PullPage>>>,
    pushes: Mutex<VecDeque<RemoteResult<PushAck>>>,
    pushed: Mutex<Vec<PushRequest>>,
    pull_requests: Mutex<Vec<PullRequest>>,
    unreachable: Mutex<bool>,
}

impl MockRemote {
    /// Creates a mock with empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a pull result.
    pub fn queue_pull(&self, result: RemoteResult<PullPage>) {
        self.pulls.lock().push_back(result);
    }

    /// Queues a push result.
    pub fn queue_push(&self, result: RemoteResult<PushAck>) {
        self.pushes.lock().push_back(result);
    }

    /// Sets the reachability probe.
    pub fn set_reachable(&self, reachable: bool) {
        *self.unreachable.lock() = !reachable;
    }

    /// Every push request received.
    pub fn pushed(&self) -> Vec<PushRequest> {
        self.pushed.lock().clone()
    }

    /// Every pull request received.
    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.pull_requests.lock().clone()
    }
}

impl RemoteClient for MockRemote {
    fn pull(&self, _identity: &Identity, request: &PullRequest) -> RemoteResult<PullPage> {
        self.pull_requests.lock().push(request.clone());
        self.pulls.lock().pop_front().unwrap_or_else(|| {
            let cursor = request.cursor.clone().unwrap_or_else(|| SyncCursor::new("0"));
            Ok(PullPage::new(Vec::new(), cursor, false))
        })
    }

    fn push(&self, _identity: &Identity, request: &PushRequest) -> RemoteResult<PushAck> {
        self.pushed.lock().push(request.clone());
        self.pushes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(PushAck::all(&request.changes)))
    }

    fn is_reachable(&self) -> bool {
        !*self.unreachable.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(RemoteError::Unreachable("dns".into()).is_transient());
        assert!(RemoteError::Timeout.is_transient());
        for status in [500, 502, 503, 408, 429] {
            assert!(RemoteError::Server {
                status,
                message: String::new()
            }
            .is_transient());
        }
        assert!(!RemoteError::Server {
            status: 404,
            message: String::new()
        }
        .is_transient());
        assert!(!RemoteError::Unauthorized("expired".into()).is_transient());
        assert!(!RemoteError::Malformed("bad cbor".into()).is_transient());
    }

    #[test]
    fn mock_defaults() {
        let remote = MockRemote::new();
        let identity = Identity::new("acct", "token");
        let page = remote
            .pull(&identity, &PullRequest::new("d", Some(SyncCursor::new("9")), 10))
            .unwrap();
        assert!(page.entities.is_empty());
        assert_eq!(page.next_cursor, SyncCursor::new("9"));
        assert!(!page.has_more);

        remote.queue_push(Err(RemoteError::Timeout));
        let request = PushRequest::new("d", Vec::new());
        assert_eq!(remote.push(&identity, &request), Err(RemoteError::Timeout));
        assert!(remote.push(&identity, &request).is_ok());
        assert_eq!(remote.pushed().len(), 2);
    }
}
