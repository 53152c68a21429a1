//! Token issuance, verification, refresh, and revocation.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::audit::{AuditContext, AuditPipeline};
use super::rbac::RbacResolver;
use super::sessions::SessionRegistry;
use super::store::{AuthStore, PurgeStats};
use crate::config::{CleanupConfig, TokenConfig};
use crate::error::AuthError;
use crate::models::{
    AuditResult, Claims, OriginMetadata, RevocationEntry, Session, TokenPair, TokenRecord,
    TokenType,
};

/// Mints, verifies, refreshes, and revokes signed access/refresh token
/// pairs. Owns the revocation list and the per-session refresh records.
///
/// Refresh tokens rotate on every use: the old jti is revoked and the
/// session re-pointed at the replacement, so replay of a rotated refresh
/// token fails with `RevokedToken`.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    revocation_retention: Duration,
    cleanup_interval: std::time::Duration,
    store: Arc<dyn AuthStore>,
    sessions: SessionRegistry,
    rbac: Arc<RbacResolver>,
    audit: Arc<AuditPipeline>,
}

impl TokenService {
    pub fn new(
        token: &TokenConfig,
        cleanup: &CleanupConfig,
        store: Arc<dyn AuthStore>,
        rbac: Arc<RbacResolver>,
        audit: Arc<AuditPipeline>,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&token.issuer]);
        validation.set_audience(&[&token.audience]);
        // Expiry is checked explicitly below with an inclusive boundary and
        // no leeway; jsonwebtoken's built-in check is neither.
        validation.validate_exp = false;

        Self {
            encoding_key: EncodingKey::from_secret(token.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(token.secret.as_bytes()),
            validation,
            issuer: token.issuer.clone(),
            audience: token.audience.clone(),
            access_ttl: Duration::minutes(token.access_token_expiry_minutes),
            refresh_ttl: Duration::days(token.refresh_token_expiry_days),
            revocation_retention: Duration::hours(cleanup.revocation_retention_hours),
            cleanup_interval: std::time::Duration::from_secs(cleanup.interval_seconds),
            sessions: SessionRegistry::new(Arc::clone(&store)),
            store,
            rbac,
            audit,
        }
    }

    /// Session tracking surface, for enumeration by identity.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    /// Issue a fresh token pair and session for an identity.
    pub async fn issue(
        &self,
        identity_id: &str,
        origin: &OriginMetadata,
    ) -> Result<TokenPair, AuthError> {
        let identity = self.rbac.identity(identity_id);
        if !identity.map(|i| i.active).unwrap_or(false) {
            self.audit
                .log(
                    "auth.login",
                    "session",
                    None,
                    &AuditContext::for_identity(identity_id, origin.clone()),
                    json!({}),
                    AuditResult::Failure,
                    Some("identity not found or inactive"),
                )
                .await;
            return Err(AuthError::IdentityNotFound);
        }

        let now = Utc::now();
        let roles = self.rbac.active_role_ids(identity_id);
        let permissions: Vec<String> = self
            .rbac
            .effective_permissions(identity_id)
            .into_iter()
            .collect();

        let refresh_jti = Uuid::new_v4().to_string();
        let session = Session::new(identity_id, &refresh_jti, self.refresh_ttl, origin.clone());

        let access_token = self.sign(
            identity_id,
            &session.id,
            &roles,
            &permissions,
            now,
            now + self.access_ttl,
            TokenType::Access,
            &Uuid::new_v4().to_string(),
        )?;
        let refresh_token = self.sign(
            identity_id,
            &session.id,
            &roles,
            &permissions,
            now,
            session.expires_at,
            TokenType::Refresh,
            &refresh_jti,
        )?;

        let record = TokenRecord::new(
            &refresh_jti,
            identity_id,
            &session.id,
            &refresh_token,
            session.expires_at,
            origin.clone(),
        );

        let session_id = session.id.clone();
        self.store.insert_record(record);
        self.sessions.insert(session);

        let ctx = AuditContext {
            user_id: Some(identity_id.to_string()),
            session_id: Some(session_id.clone()),
            origin: origin.clone(),
            request_id: None,
            roles: roles.clone(),
            permissions: permissions.clone(),
        };
        self.audit
            .log(
                "auth.login",
                "session",
                Some(&session_id),
                &ctx,
                json!({ "roles": roles }),
                AuditResult::Success,
                None,
            )
            .await;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// Validate an access token: signature, issuer, audience, algorithm,
    /// inclusive expiry, revocation list, and backing session. Touches the
    /// session's last-activity timestamp on success.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.decode(token)?;

        if claims.token_type != TokenType::Access {
            return Err(AuthError::InvalidToken(
                "refresh token presented where an access token is required".to_string(),
            ));
        }

        let now = Utc::now();
        if claims.exp <= now.timestamp() {
            return Err(AuthError::ExpiredSession);
        }
        if self.store.is_revoked(&claims.jti) {
            return Err(AuthError::RevokedToken);
        }

        let session = self
            .store
            .session(&claims.session_id)
            .ok_or(AuthError::ExpiredSession)?;
        if session.is_expired(now) {
            return Err(AuthError::ExpiredSession);
        }

        self.store.touch_session(&claims.session_id, now);
        Ok(claims)
    }

    /// Exchange a refresh token for a new pair, rotating the refresh token.
    /// The role/permission snapshot is re-taken at refresh time; the session
    /// (and therefore the rotated refresh token) keeps its original expiry.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        match self.refresh_inner(refresh_token).await {
            Ok(pair) => Ok(pair),
            Err(err) => {
                let subject = self
                    .decode_unverified(refresh_token)
                    .ok()
                    .map(|c| (c.sub, c.session_id));
                let ctx = AuditContext {
                    user_id: subject.as_ref().map(|(sub, _)| sub.clone()),
                    session_id: subject.map(|(_, sid)| sid),
                    ..AuditContext::default()
                };
                self.audit
                    .log(
                        "auth.refresh",
                        "session",
                        None,
                        &ctx,
                        json!({}),
                        AuditResult::Failure,
                        Some(&err.to_string()),
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn refresh_inner(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.decode(refresh_token)?;

        if claims.token_type != TokenType::Refresh {
            return Err(AuthError::InvalidToken(
                "not a refresh token".to_string(),
            ));
        }

        let now = Utc::now();
        if claims.exp <= now.timestamp() {
            return Err(AuthError::ExpiredSession);
        }
        if self.store.is_revoked(&claims.jti) {
            return Err(AuthError::RevokedToken);
        }

        let record = self
            .store
            .record(&claims.jti)
            .ok_or_else(|| AuthError::InvalidToken("unknown refresh token".to_string()))?;
        if record.revoked {
            return Err(AuthError::RevokedToken);
        }
        if record.is_expired(now) {
            return Err(AuthError::ExpiredSession);
        }
        if record.token_hash != TokenRecord::hash_token(refresh_token) {
            return Err(AuthError::InvalidToken(
                "refresh token does not match its record".to_string(),
            ));
        }

        let session = self
            .store
            .session(&record.session_id)
            .ok_or(AuthError::ExpiredSession)?;
        if session.is_expired(now) {
            return Err(AuthError::ExpiredSession);
        }

        let roles = self.rbac.active_role_ids(&claims.sub);
        let permissions: Vec<String> = self
            .rbac
            .effective_permissions(&claims.sub)
            .into_iter()
            .collect();

        let new_refresh_jti = Uuid::new_v4().to_string();
        let access_token = self.sign(
            &claims.sub,
            &session.id,
            &roles,
            &permissions,
            now,
            now + self.access_ttl,
            TokenType::Access,
            &Uuid::new_v4().to_string(),
        )?;
        let new_refresh_token = self.sign(
            &claims.sub,
            &session.id,
            &roles,
            &permissions,
            now,
            session.expires_at,
            TokenType::Refresh,
            &new_refresh_jti,
        )?;

        // Rotation: retire the presented token before the replacement goes
        // live, so a replayed copy hits the revocation list.
        self.store.mark_record_revoked(&claims.jti);
        self.store.add_revocation(RevocationEntry {
            jti: claims.jti.clone(),
            expires_at: record.expires_at,
        });
        self.store.insert_record(TokenRecord::new(
            &new_refresh_jti,
            &claims.sub,
            &session.id,
            &new_refresh_token,
            session.expires_at,
            record.origin.clone(),
        ));
        self.store
            .set_session_refresh_token(&session.id, &new_refresh_jti);
        self.store.touch_session(&session.id, now);

        let ctx = AuditContext {
            user_id: Some(claims.sub.clone()),
            session_id: Some(session.id.clone()),
            origin: record.origin.clone(),
            request_id: None,
            roles,
            permissions,
        };
        self.audit
            .log(
                "auth.refresh",
                "session",
                Some(&session.id),
                &ctx,
                json!({ "rotated_jti": claims.jti }),
                AuditResult::Success,
                None,
            )
            .await;

        Ok(TokenPair {
            access_token,
            refresh_token: new_refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// Revoke a single token. Decodes without requiring validity so an
    /// expired or otherwise rejected token can still be denylisted.
    /// Idempotent: revoking twice leaves one revocation entry.
    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let claims = self.decode_unverified(token)?;

        self.store.add_revocation(RevocationEntry {
            jti: claims.jti.clone(),
            expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now),
        });

        let (action, origin) = if claims.token_type == TokenType::Refresh {
            self.store.mark_record_revoked(&claims.jti);
            let origin = self
                .sessions
                .remove(&claims.session_id)
                .map(|s| s.origin)
                .unwrap_or_default();
            ("auth.logout", origin)
        } else {
            ("security.token_revoked", OriginMetadata::default())
        };

        let ctx = AuditContext {
            user_id: Some(claims.sub.clone()),
            session_id: Some(claims.session_id.clone()),
            origin,
            ..AuditContext::default()
        };
        self.audit
            .log(
                action,
                "token",
                Some(&claims.jti),
                &ctx,
                json!({ "token_kind": claims.token_type }),
                AuditResult::Success,
                None,
            )
            .await;

        Ok(())
    }

    /// "Log out everywhere": revoke every refresh record and delete every
    /// session owned by an identity. Access tokens minted under those
    /// sessions fail verification once their session is gone.
    pub async fn revoke_all_for_identity(&self, identity_id: &str) -> Result<usize, AuthError> {
        let records = self.store.records_for_identity(identity_id);
        for record in &records {
            self.store.mark_record_revoked(&record.id);
            self.store.add_revocation(RevocationEntry {
                jti: record.id.clone(),
                expires_at: record.expires_at,
            });
        }

        let sessions = self.store.sessions_for_identity(identity_id);
        for session in &sessions {
            self.store.remove_session(&session.id);
        }

        self.audit
            .log(
                "security.revoke_all",
                "identity",
                Some(identity_id),
                &AuditContext {
                    user_id: Some(identity_id.to_string()),
                    ..AuditContext::default()
                },
                json!({
                    "sessions_removed": sessions.len(),
                    "records_revoked": records.len(),
                }),
                AuditResult::Success,
                None,
            )
            .await;

        Ok(sessions.len())
    }

    /// One cleanup pass: expired sessions and records are deleted, and
    /// revocation entries past expiry plus the retention buffer are pruned.
    pub fn run_cleanup(&self) -> PurgeStats {
        let stats = self
            .store
            .purge_expired(Utc::now(), self.revocation_retention);
        if stats != PurgeStats::default() {
            tracing::debug!(
                sessions = stats.sessions_removed,
                records = stats.records_removed,
                revocations = stats.revocations_removed,
                "cleanup pass"
            );
        }
        stats
    }

    /// Background cleanup reaper on the configured interval.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.cleanup_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.run_cleanup();
            }
        })
    }

    // Signing / decoding ---------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn sign(
        &self,
        identity_id: &str,
        session_id: &str,
        roles: &[String],
        permissions: &[String],
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        token_type: TokenType,
        jti: &str,
    ) -> Result<String, AuthError> {
        let claims = Claims {
            sub: identity_id.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            aud: self.audience.clone(),
            iss: self.issuer.clone(),
            jti: jti.to_string(),
            roles: roles.to_vec(),
            permissions: permissions.to_vec(),
            session_id: session_id.to_string(),
            token_type,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("failed to encode token: {}", e)))
    }

    fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    /// Decode without signature or claim validation, for revocation of
    /// tokens that no longer verify.
    fn decode_unverified(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::models::{Identity, Role};
    use crate::services::store::MemoryStore;

    fn service() -> TokenService {
        let store = Arc::new(MemoryStore::new());
        let rbac = Arc::new(RbacResolver::new());
        rbac.upsert_role(
            Role::new("admin", "Administrator", 0).with_permissions(["read:users", "write:users"]),
        )
        .unwrap();
        rbac.upsert_identity(Identity::new("u1").with_role("admin"));

        let audit = Arc::new(AuditPipeline::new(
            &AuditConfig {
                flush_interval_seconds: 5,
                critical_flush_timeout_ms: 100,
                buffer_capacity: 100,
                extra_masked_fields: vec![],
                file_path: None,
            },
            vec![],
        ));

        TokenService::new(
            &TokenConfig {
                secret: "unit-test-secret".to_string(),
                issuer: "auth-core".to_string(),
                audience: "auth-core-clients".to_string(),
                access_token_expiry_minutes: 15,
                refresh_token_expiry_days: 7,
            },
            &CleanupConfig {
                interval_seconds: 3600,
                revocation_retention_hours: 24,
            },
            store,
            rbac,
            audit,
        )
    }

    #[tokio::test]
    async fn issue_then_verify_round_trips_claims() {
        let service = service();
        let pair = service
            .issue("u1", &OriginMetadata::new("127.0.0.1", "tests"))
            .await
            .unwrap();
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 900);

        let claims = service.verify(&pair.access_token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.roles, vec!["admin".to_string()]);
        assert!(claims.permissions.contains(&"read:users".to_string()));
        assert_eq!(claims.token_type, TokenType::Access);
        assert!(service.sessions().active(&claims.session_id).is_some());
    }

    #[tokio::test]
    async fn refresh_token_is_rejected_by_verify() {
        let service = service();
        let pair = service
            .issue("u1", &OriginMetadata::default())
            .await
            .unwrap();
        assert!(matches!(
            service.verify(&pair.refresh_token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn tokens_from_another_secret_are_rejected() {
        let service = service();
        let other = {
            let s = self::service();
            // same config apart from the secret
            TokenService::new(
                &TokenConfig {
                    secret: "a-different-secret".to_string(),
                    issuer: "auth-core".to_string(),
                    audience: "auth-core-clients".to_string(),
                    access_token_expiry_minutes: 15,
                    refresh_token_expiry_days: 7,
                },
                &CleanupConfig {
                    interval_seconds: 3600,
                    revocation_retention_hours: 24,
                },
                Arc::new(MemoryStore::new()),
                Arc::new(RbacResolver::new()),
                s.audit.clone(),
            )
        };

        let pair = service
            .issue("u1", &OriginMetadata::default())
            .await
            .unwrap();
        assert!(matches!(
            other.verify(&pair.access_token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn issuing_for_unknown_identity_fails() {
        let service = service();
        assert!(matches!(
            service.issue("ghost", &OriginMetadata::default()).await,
            Err(AuthError::IdentityNotFound)
        ));
    }
}
