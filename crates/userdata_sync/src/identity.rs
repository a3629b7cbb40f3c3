//! The session/identity seam.

use crate::remote::RemoteError;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, warn};
use userdata_model::Identity;

/// Supplies the authenticated identity scoping every sync operation.
pub trait IdentityGate: Send + Sync {
    /// The identity sync should run for, if any.
    fn current_identity(&self) -> Option<Identity>;

    /// Observes identity changes (login, logout, account switch, token
    /// refresh).
    fn subscribe(&self) -> watch::Receiver<Option<Identity>>;

    /// Reports that the remote permanently rejected `identity`.
    fn report_rejected(&self, identity: &Identity, error: &RemoteError);
}

/// A permanent rejection reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Account that was rejected.
    pub account_id: String,
    /// Remote failure.
    pub error: RemoteError,
}

/// Identity gate backed by a watch channel.
///
/// The application calls [`login`](Self::login) and [`logout`](Self::logout);
/// the sync scheduler follows along.
pub struct SessionGate {
    tx: watch::Sender<Option<Identity>>,
    rejections: Mutex<Vec<Rejection>>,
}

impl SessionGate {
    /// Creates a gate with nobody logged in.
    pub fn new() -> Self {
        Self::with_identity(None)
    }

    /// Creates a gate with an initial identity.
    pub fn with_identity(identity: Option<Identity>) -> Self {
        let (tx, _rx) = watch::channel(identity);
        Self {
            tx,
            rejections: Mutex::new(Vec::new()),
        }
    }

    /// Logs in, switches account, or refreshes the token.
    pub fn login(&self, identity: Identity) {
        info!(account_id = %identity.account_id, "identity set");
        self.tx.send_replace(Some(identity));
    }

    /// Logs out.
    pub fn logout(&self) {
        info!("identity cleared");
        self.tx.send_replace(None);
    }

    /// Rejections reported so far.
    pub fn rejections(&self) -> Vec<Rejection> {
        self.rejections.lock().clone()
    }
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityGate for SessionGate {
    fn current_identity(&self) -> Option<Identity> {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.tx.subscribe()
    }

    fn report_rejected(&self, identity: &Identity, error: &RemoteError) {
        warn!(account_id = %identity.account_id, error = %error, "identity rejected by remote");
        self.rejections.lock().push(Rejection {
            account_id: identity.account_id.clone(),
            error: error.clone(),
        });
    }
}
