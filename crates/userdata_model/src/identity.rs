//! Authenticated identity scoping every sync operation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The account a sync cycle runs for.
///
/// Passed explicitly into every engine call instead of living in ambient
/// state.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Stable account identifier.
    pub account_id: String,
    /// Bearer token handed to the remote adapter.
    pub access_token: String,
}

impl Identity {
    /// Creates an identity.
    pub fn new(account_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            access_token: access_token.into(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("account_id", &self.account_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}
