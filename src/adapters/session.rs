//! Token sources backed by the session collaborator.
use std::sync::RwLock;

use serde::Deserialize;

use crate::ports::token_source::TokenSource;

/// Unauthenticated calls only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoToken;

impl TokenSource for NoToken {
    fn access_token(&self) -> Option<String> {
        None
    }
}

/// A fixed bearer token, e.g. from the command line.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenSource for StaticToken {
    fn access_token(&self) -> Option<String> {
        Some(self.0.clone()).filter(|token| !token.is_empty())
    }
}

#[derive(Deserialize)]
struct StoredSession {
    user: Option<StoredUser>,
}

#[derive(Deserialize)]
struct StoredUser {
    access_token: Option<String>,
}

/// Slot holding the serialized session written by the authentication layer.
///
/// The payload is a JSON document of the form `{"user": {"access_token": "..."}}`.
/// It is parsed on every read so that logins, logouts and token refreshes take effect
/// on the next attempt.
#[derive(Debug, Default)]
pub struct SessionSlot {
    raw: RwLock<Option<String>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the serialized session (login / refresh).
    pub fn store(&self, session_json: impl Into<String>) {
        *self.raw.write().unwrap_or_else(|p| p.into_inner()) = Some(session_json.into());
    }

    /// Forget the session (logout).
    pub fn clear(&self) {
        *self.raw.write().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

impl TokenSource for SessionSlot {
    fn access_token(&self) -> Option<String> {
        let raw = self.raw.read().unwrap_or_else(|p| p.into_inner());
        let raw = raw.as_deref()?;

        match serde_json::from_str::<StoredSession>(raw) {
            Ok(session) => session
                .user
                .and_then(|user| user.access_token)
                .filter(|token| !token.is_empty()),
            Err(err) => {
                tracing::warn!("Ignoring malformed session data: {}", err);
                None
            }
        }
    }
}
