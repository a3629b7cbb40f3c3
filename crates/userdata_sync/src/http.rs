//! HTTP remote adapter.
//!
//! The HTTP client itself is a collaborator behind [`HttpClient`]; this
//! module only frames requests as CBOR and maps status codes onto the
//! transient/permanent classification.

use crate::config::SyncConfig;
use crate::remote::{RemoteClient, RemoteError, RemoteResult};
use parking_lot::RwLock;
use std::time::Duration;
use tracing::debug;
use userdata_model::{Identity, PullPage, PullRequest, PushAck, PushRequest};

/// Path of the pull endpoint.
pub const PULL_PATH: &str = "/userdata/pull";

/// Path of the push endpoint.
pub const PUSH_PATH: &str = "/userdata/push";

/// A response received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

/// A request that produced no response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpFailure {
    /// Connection could not be established or was lost.
    Unreachable(String),
    /// No response within the timeout.
    Timeout,
}

/// HTTP client abstraction.
///
/// Implement this trait over the HTTP library of the host application.
pub trait HttpClient: Send + Sync {
    /// Sends a POST with a bearer token and a CBOR body.
    fn post(
        &self,
        url: &str,
        bearer: &str,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<HttpResponse, HttpFailure>;

    /// Checks if the network is available.
    fn is_online(&self) -> bool {
        true
    }
}

/// Remote client speaking CBOR over HTTP.
pub struct HttpRemote<C: HttpClient> {
    base_url: String,
    client: C,
    timeout: Duration,
    last_error: RwLock<Option<RemoteError>>,
}

impl<C: HttpClient> HttpRemote<C> {
    /// Creates an adapter for `base_url`.
    pub fn new(base_url: impl Into<String>, client: C, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            timeout,
            last_error: RwLock::new(None),
        }
    }

    /// Creates an adapter using the request timeout of `config`.
    pub fn from_config(base_url: impl Into<String>, client: C, config: &SyncConfig) -> Self {
        Self::new(base_url, client, config.request_timeout)
    }

    /// Returns the request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last failure, if the last call failed.
    pub fn last_error(&self) -> Option<RemoteError> {
        self.last_error.read().clone()
    }

    fn post(&self, path: &str, identity: &Identity, body: Vec<u8>) -> RemoteResult<Vec<u8>> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, bytes = body.len(), "POST");

        let result = self
            .client
            .post(&url, &identity.access_token, body, self.timeout)
            .map_err(|failure| match failure {
                HttpFailure::Unreachable(message) => RemoteError::Unreachable(message),
                HttpFailure::Timeout => RemoteError::Timeout,
            })
            .and_then(classify_status);

        *self.last_error.write() = result.as_ref().err().cloned();
        result
    }
}

/// Maps a response onto success or a classified [`RemoteError`].
pub fn classify_status(response: HttpResponse) -> RemoteResult<Vec<u8>> {
    if (200..300).contains(&response.status) {
        return Ok(response.body);
    }
    let message = String::from_utf8_lossy(&response.body).into_owned();
    match response.status {
        401 | 403 => Err(RemoteError::Unauthorized(message)),
        400 | 422 => Err(RemoteError::Malformed(message)),
        status => Err(RemoteError::Server { status, message }),
    }
}

impl<C: HttpClient> RemoteClient for HttpRemote<C> {
    fn pull(&self, identity: &Identity, request: &PullRequest) -> RemoteResult<PullPage> {
        let body = request
            .encode()
            .map_err(|e| RemoteError::Malformed(format!("failed to encode request: {e}")))?;
        let bytes = self.post(PULL_PATH, identity, body)?;
        PullPage::decode(&bytes)
            .map_err(|e| RemoteError::Malformed(format!("failed to decode page: {e}")))
    }

    fn push(&self, identity: &Identity, request: &PushRequest) -> RemoteResult<PushAck> {
        let body = request
            .encode()
            .map_err(|e| RemoteError::Malformed(format!("failed to encode request: {e}")))?;
        let bytes = self.post(PUSH_PATH, identity, body)?;
        PushAck::decode(&bytes)
            .map_err(|e| RemoteError::Malformed(format!("failed to decode ack: {e}")))
    }

    fn is_reachable(&self) -> bool {
        self.client.is_online()
    }
}
