//! Brute-force guard for authentication endpoints.

use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::audit::{AuditContext, AuditPipeline};
use crate::config::RateLimitConfig;
use crate::error::AuthError;
use crate::models::{AuditResult, OriginMetadata};

type KeyedLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

/// Composite throttle key: caller origin and/or target identity. Either half
/// may be absent; attempts against the same pairing share a window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RateKey {
    pub origin: Option<String>,
    pub identity: Option<String>,
}

impl RateKey {
    pub fn origin(ip: impl Into<String>) -> Self {
        Self {
            origin: Some(ip.into()),
            identity: None,
        }
    }

    pub fn identity(id: impl Into<String>) -> Self {
        Self {
            origin: None,
            identity: Some(id.into()),
        }
    }

    pub fn composite(ip: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            origin: Some(ip.into()),
            identity: Some(id.into()),
        }
    }

    fn cache_key(&self) -> String {
        format!(
            "{}|{}",
            self.origin.as_deref().unwrap_or("-"),
            self.identity.as_deref().unwrap_or("-")
        )
    }
}

/// Windowed limiter over composite keys. Denials are audited as
/// `security.rate_limited` and carry a retry-after duration.
pub struct AuthRateLimiter {
    limiter: KeyedLimiter,
    audit: Arc<AuditPipeline>,
}

impl AuthRateLimiter {
    pub fn new(config: &RateLimitConfig, audit: Arc<AuditPipeline>) -> Self {
        let attempts = config.max_attempts.max(1);
        let period = Duration::from_millis((config.window_seconds.max(1) * 1000) / attempts as u64);
        let quota = Quota::with_period(period)
            .expect("rate limit period is non-zero")
            .allow_burst(NonZeroU32::new(attempts).expect("attempts is non-zero"));

        Self {
            limiter: RateLimiter::dashmap(quota),
            audit,
        }
    }

    /// Allow or deny one attempt for this key.
    pub async fn check(&self, key: &RateKey) -> Result<(), AuthError> {
        match self.limiter.check_key(&key.cache_key()) {
            Ok(_) => Ok(()),
            Err(negative) => {
                let wait = negative.wait_time_from(DefaultClock::default().now());
                let retry_after_secs = wait.as_secs().max(1);

                let ctx = AuditContext {
                    user_id: key.identity.clone(),
                    origin: OriginMetadata::new(
                        key.origin.clone().unwrap_or_default(),
                        String::new(),
                    ),
                    ..AuditContext::default()
                };
                self.audit
                    .log(
                        "security.rate_limited",
                        "auth",
                        None,
                        &ctx,
                        json!({ "retry_after_secs": retry_after_secs }),
                        AuditResult::Failure,
                        Some("rate limit exceeded"),
                    )
                    .await;

                tracing::warn!(
                    origin = key.origin.as_deref().unwrap_or("-"),
                    identity = key.identity.as_deref().unwrap_or("-"),
                    retry_after_secs,
                    "rate limit exceeded"
                );

                Err(AuthError::RateLimited { retry_after_secs })
            }
        }
    }
}
