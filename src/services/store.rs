//! Injectable storage for token/session state.
//!
//! Verification logic only ever talks to [`AuthStore`], so a distributed
//! backing store can replace [`MemoryStore`] without touching it. The
//! in-memory default covers the single-process deployment this subsystem
//! is designed for.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::models::{RevocationEntry, Session, TokenRecord};

/// Counts reported by one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub sessions_removed: usize,
    pub records_removed: usize,
    pub revocations_removed: usize,
}

/// Shared state behind issuance, verification, refresh, and revocation.
/// Every method is atomic with respect to the others.
pub trait AuthStore: Send + Sync {
    fn insert_session(&self, session: Session);
    fn session(&self, id: &str) -> Option<Session>;
    fn remove_session(&self, id: &str) -> Option<Session>;
    fn sessions_for_identity(&self, identity_id: &str) -> Vec<Session>;
    fn touch_session(&self, id: &str, at: DateTime<Utc>);
    /// Re-point a session at a new refresh jti (rotation). Returns false if
    /// the session is gone.
    fn set_session_refresh_token(&self, id: &str, refresh_jti: &str) -> bool;

    fn insert_record(&self, record: TokenRecord);
    fn record(&self, jti: &str) -> Option<TokenRecord>;
    /// Idempotent: marking an already revoked record is not an error.
    fn mark_record_revoked(&self, jti: &str) -> bool;
    fn records_for_identity(&self, identity_id: &str) -> Vec<TokenRecord>;

    fn add_revocation(&self, entry: RevocationEntry);
    fn is_revoked(&self, jti: &str) -> bool;
    fn revocation_count(&self) -> usize;

    /// Drop sessions and records past expiry, and revocation entries whose
    /// original expiry plus the retention buffer has elapsed.
    fn purge_expired(&self, now: DateTime<Utc>, revocation_retention: Duration) -> PurgeStats;
}

/// Default single-process store on concurrent maps.
#[derive(Default)]
pub struct MemoryStore {
    sessions: DashMap<String, Session>,
    records: DashMap<String, TokenRecord>,
    revocations: DashMap<String, RevocationEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuthStore for MemoryStore {
    fn insert_session(&self, session: Session) {
        self.sessions.insert(session.id.clone(), session);
    }

    fn session(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|s| s.clone())
    }

    fn remove_session(&self, id: &str) -> Option<Session> {
        self.sessions.remove(id).map(|(_, s)| s)
    }

    fn sessions_for_identity(&self, identity_id: &str) -> Vec<Session> {
        self.sessions
            .iter()
            .filter(|entry| entry.identity_id == identity_id)
            .map(|entry| entry.clone())
            .collect()
    }

    fn touch_session(&self, id: &str, at: DateTime<Utc>) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.last_activity = at;
        }
    }

    fn set_session_refresh_token(&self, id: &str, refresh_jti: &str) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut session) => {
                session.refresh_token_id = refresh_jti.to_string();
                true
            }
            None => false,
        }
    }

    fn insert_record(&self, record: TokenRecord) {
        self.records.insert(record.id.clone(), record);
    }

    fn record(&self, jti: &str) -> Option<TokenRecord> {
        self.records.get(jti).map(|r| r.clone())
    }

    fn mark_record_revoked(&self, jti: &str) -> bool {
        match self.records.get_mut(jti) {
            Some(mut record) => {
                record.revoked = true;
                true
            }
            None => false,
        }
    }

    fn records_for_identity(&self, identity_id: &str) -> Vec<TokenRecord> {
        self.records
            .iter()
            .filter(|entry| entry.identity_id == identity_id)
            .map(|entry| entry.clone())
            .collect()
    }

    fn add_revocation(&self, entry: RevocationEntry) {
        self.revocations.insert(entry.jti.clone(), entry);
    }

    fn is_revoked(&self, jti: &str) -> bool {
        self.revocations.contains_key(jti)
    }

    fn revocation_count(&self) -> usize {
        self.revocations.len()
    }

    fn purge_expired(&self, now: DateTime<Utc>, revocation_retention: Duration) -> PurgeStats {
        let mut stats = PurgeStats::default();

        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(now));
        stats.sessions_removed = before - self.sessions.len();

        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        stats.records_removed = before - self.records.len();

        let before = self.revocations.len();
        self.revocations
            .retain(|_, entry| entry.expires_at + revocation_retention > now);
        stats.revocations_removed = before - self.revocations.len();

        stats
    }
}
