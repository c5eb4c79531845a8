use std::collections::HashMap;
use std::fmt;

use rand::RngCore;

use crate::authoring::AuthoringSession;

/// Opaque handle of an open authoring session.
///
/// Derived from the widget id with a per-manager secret, so handles cannot
/// be guessed from the slot they edit.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AuthoringKey(String);

impl AuthoringKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthoringKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthoringKey({})", &self.0[..self.0.len().min(8)])
    }
}

impl fmt::Display for AuthoringKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// In-memory store of open authoring sessions.
/// Not persisted: sessions are dropped with the engine.
pub struct SessionManager {
    secret: [u8; 32],
    sessions: HashMap<AuthoringKey, AuthoringSession>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self {
            secret,
            sessions: HashMap::new(),
        }
    }

    pub fn key_for(&self, widget_id: &str) -> AuthoringKey {
        AuthoringKey(
            blake3::keyed_hash(&self.secret, widget_id.as_bytes())
                .to_hex()
                .to_string(),
        )
    }

    /// Stores `session`, replacing any open session of the same widget.
    pub fn open(&mut self, session: AuthoringSession) -> AuthoringKey {
        let key = self.key_for(session.widget_id());
        self.sessions.insert(key.clone(), session);
        key
    }

    pub fn get(&self, key: &AuthoringKey) -> Option<&AuthoringSession> {
        self.sessions.get(key)
    }

    pub fn close(&mut self, key: &AuthoringKey) -> Option<AuthoringSession> {
        self.sessions.remove(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
