use chrono::Utc;
use std::sync::Arc;

use super::store::AuthStore;
use crate::models::Session;

/// Active-session tracking, one session per login.
///
/// Embedded inside the token service (which creates and destroys sessions as
/// part of issuance and revocation) but exposed so callers can enumerate and
/// inspect a user's logins.
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn AuthStore>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }

    pub fn insert(&self, session: Session) {
        self.store.insert_session(session);
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.store.session(id)
    }

    /// The session, if it exists and has not expired.
    pub fn active(&self, id: &str) -> Option<Session> {
        let now = Utc::now();
        self.store.session(id).filter(|s| !s.is_expired(now))
    }

    pub fn touch(&self, id: &str) {
        self.store.touch_session(id, Utc::now());
    }

    pub fn remove(&self, id: &str) -> Option<Session> {
        self.store.remove_session(id)
    }

    /// All sessions owned by an identity, expired ones included.
    pub fn for_identity(&self, identity_id: &str) -> Vec<Session> {
        self.store.sessions_for_identity(identity_id)
    }

    /// Only the live sessions for an identity.
    pub fn active_for_identity(&self, identity_id: &str) -> Vec<Session> {
        let now = Utc::now();
        self.store
            .sessions_for_identity(identity_id)
            .into_iter()
            .filter(|s| !s.is_expired(now))
            .collect()
    }
}
