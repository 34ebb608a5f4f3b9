//! Session-related types.
//!
//! Types stored in the session for authentication state. Login itself is
//! handled by the account service, which writes [`CurrentUser`] into the
//! shared session store.

use serde::{Deserialize, Serialize};

use daily_fresh_core::UserId;

/// Session-stored user identity.
///
/// Minimal data stored in the session to identify the logged-in user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    /// User's database ID.
    pub id: UserId,
    /// User's display name.
    pub username: String,
}

/// Session keys for authentication data.
pub mod keys {
    /// Key for storing the current logged-in user.
    pub const CURRENT_USER: &str = "current_user";
}
