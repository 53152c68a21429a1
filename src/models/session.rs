use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Where a request came from, captured at issuance and on audit events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OriginMetadata {
    pub ip_address: String,
    pub user_agent: String,
}

impl OriginMetadata {
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// One login. Exactly one session exists per issued refresh token, and the
/// session's lifetime bounds the validity of every access token minted under
/// it, independent of the access token's own shorter expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub identity_id: String,
    /// jti of the currently valid refresh token for this session. Re-pointed
    /// on rotation.
    pub refresh_token_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub origin: OriginMetadata,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Session {
    pub fn new(
        identity_id: impl Into<String>,
        refresh_token_id: impl Into<String>,
        ttl: Duration,
        origin: OriginMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            identity_id: identity_id.into(),
            refresh_token_id: refresh_token_id.into(),
            created_at: now,
            expires_at: now + ttl,
            last_activity: now,
            origin,
            metadata: HashMap::new(),
        }
    }

    /// Expiry is inclusive: a session whose expiry equals "now" is expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_expiry_boundary_is_inclusive() {
        let session = Session::new(
            "user_1",
            "jti_1",
            Duration::days(7),
            OriginMetadata::default(),
        );
        assert!(!session.is_expired(Utc::now()));
        assert!(session.is_expired(session.expires_at));
        assert!(session.is_expired(session.expires_at + Duration::seconds(1)));
    }
}
