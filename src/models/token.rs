use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::session::OriginMetadata;

/// Token kind, embedded as the `type` claim so an access token can never be
/// replayed against the refresh endpoint or vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Signed claims carried by both access and refresh tokens.
///
/// `roles` and `permissions` are a snapshot taken at issuance or refresh.
/// They are not authoritative for sensitive actions; high-stakes checks
/// re-resolve through the RBAC resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Identity id.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub aud: String,
    pub iss: String,
    /// Token id, the revocation-list key.
    pub jti: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

/// What a successful issue/refresh returns to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access-token lifetime in seconds.
    pub expires_in: i64,
}

/// Refresh-token bookkeeping. The raw token never sits in the store; only
/// its SHA-256 hash does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// jti of the refresh token.
    pub id: String,
    pub identity_id: String,
    pub session_id: String,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub origin: OriginMetadata,
}

impl TokenRecord {
    pub fn new(
        id: impl Into<String>,
        identity_id: impl Into<String>,
        session_id: impl Into<String>,
        raw_token: &str,
        expires_at: DateTime<Utc>,
        origin: OriginMetadata,
    ) -> Self {
        Self {
            id: id.into(),
            identity_id: identity_id.into(),
            session_id: session_id.into(),
            token_hash: Self::hash_token(raw_token),
            created_at: Utc::now(),
            expires_at,
            revoked: false,
            origin,
        }
    }

    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }
}

/// Denylist entry for a token id. Retained past the token's own expiry by a
/// retention buffer to tolerate clock skew between instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationEntry {
    pub jti: String,
    /// Approximate original expiry of the revoked token.
    pub expires_at: DateTime<Utc>,
}
