use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::jwt;
use crate::models::user::UserIdentity;

/// Represents the authenticated session of this client.
///
/// ⚠️ `token` is a bearer credential. It is never logged and never
/// serialized anywhere except the session storage scope chosen at login.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// The bearer token (a JWT).
    pub token: String,
    /// The user this session belongs to.
    pub user: UserIdentity,
    /// The expiry decoded from the token, if it carried one.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Creates a session, deriving the expiry from the token.
    pub fn new(token: String, user: UserIdentity) -> Self {
        let expires_at = jwt::decode_expiry(&token);
        Self {
            token,
            user,
            expires_at,
        }
    }

    /// The first characters of the token, for log correlation.
    pub fn token_hint(&self) -> &str {
        let end = self
            .token
            .char_indices()
            .nth(8)
            .map(|(idx, _)| idx)
            .unwrap_or(self.token.len());
        &self.token[..end]
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &"[REDACTED]")
            .field("user", &self.user)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Username and password as typed at the login prompt.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// What the identity backend hands back on a successful login.
#[derive(Clone)]
pub struct LoginGrant {
    /// The access token.
    pub token: String,
    /// The refresh token, when the backend issues one.
    pub refresh_token: Option<String>,
    /// The authenticated user.
    pub user: UserIdentity,
}

impl std::fmt::Debug for LoginGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginGrant")
            .field("token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("user", &self.user)
            .finish()
    }
}
