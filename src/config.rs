use serde::Deserialize;
use std::env;

use crate::error::AuthError;

/// Top-level configuration for the auth subsystem, loaded from the
/// environment at startup. Malformed values fail fast here rather than
/// surfacing later on a request path.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub token: TokenConfig,
    pub password: PasswordConfig,
    pub rate_limit: RateLimitConfig,
    pub audit: AuditConfig,
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// HS256 signing secret shared by every component of this process.
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    pub flush_interval_seconds: u64,
    pub critical_flush_timeout_ms: u64,
    pub buffer_capacity: usize,
    /// Field names masked in audit detail maps, in addition to the built-in
    /// sensitive set.
    pub extra_masked_fields: Vec<String>,
    /// Optional JSON-lines audit file sink.
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    pub interval_seconds: u64,
    /// How long revocation entries outlive the token's own expiry, to
    /// tolerate clock skew between instances.
    pub revocation_retention_hours: i64,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AuthError> {
        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AuthError::Config(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AuthConfig {
            environment,
            service_name: get_env("SERVICE_NAME", Some("auth-core"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            token: TokenConfig {
                secret: get_env("AUTH_TOKEN_SECRET", None, is_prod)?,
                issuer: get_env("AUTH_TOKEN_ISSUER", Some("auth-core"), is_prod)?,
                audience: get_env("AUTH_TOKEN_AUDIENCE", Some("auth-core-clients"), is_prod)?,
                access_token_expiry_minutes: parse_env(
                    "AUTH_ACCESS_TOKEN_EXPIRY_MINUTES",
                    Some("15"),
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env(
                    "AUTH_REFRESH_TOKEN_EXPIRY_DAYS",
                    Some("7"),
                    is_prod,
                )?,
            },
            password: PasswordConfig {
                memory_kib: parse_env("AUTH_PASSWORD_MEMORY_KIB", Some("19456"), is_prod)?,
                iterations: parse_env("AUTH_PASSWORD_ITERATIONS", Some("2"), is_prod)?,
                parallelism: parse_env("AUTH_PASSWORD_PARALLELISM", Some("1"), is_prod)?,
            },
            rate_limit: RateLimitConfig {
                max_attempts: parse_env("AUTH_RATE_LIMIT_ATTEMPTS", Some("5"), is_prod)?,
                window_seconds: parse_env("AUTH_RATE_LIMIT_WINDOW_SECONDS", Some("900"), is_prod)?,
            },
            audit: AuditConfig {
                flush_interval_seconds: parse_env(
                    "AUTH_AUDIT_FLUSH_INTERVAL_SECONDS",
                    Some("5"),
                    is_prod,
                )?,
                critical_flush_timeout_ms: parse_env(
                    "AUTH_AUDIT_CRITICAL_FLUSH_TIMEOUT_MS",
                    Some("500"),
                    is_prod,
                )?,
                buffer_capacity: parse_env("AUTH_AUDIT_BUFFER_CAPACITY", Some("10000"), is_prod)?,
                extra_masked_fields: get_env("AUTH_AUDIT_MASKED_FIELDS", Some(""), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                file_path: env::var("AUTH_AUDIT_FILE_PATH").ok(),
            },
            cleanup: CleanupConfig {
                interval_seconds: parse_env(
                    "AUTH_CLEANUP_INTERVAL_SECONDS",
                    Some("3600"),
                    is_prod,
                )?,
                revocation_retention_hours: parse_env(
                    "AUTH_REVOCATION_RETENTION_HOURS",
                    Some("24"),
                    is_prod,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if self.token.secret.is_empty() {
            return Err(AuthError::Config(anyhow::anyhow!(
                "AUTH_TOKEN_SECRET must not be empty"
            )));
        }

        if self.environment == Environment::Prod && self.token.secret.len() < 32 {
            return Err(AuthError::Config(anyhow::anyhow!(
                "AUTH_TOKEN_SECRET must be at least 32 bytes in production"
            )));
        }

        if self.token.access_token_expiry_minutes < 0 {
            return Err(AuthError::Config(anyhow::anyhow!(
                "AUTH_ACCESS_TOKEN_EXPIRY_MINUTES must not be negative"
            )));
        }

        if self.token.refresh_token_expiry_days <= 0 {
            return Err(AuthError::Config(anyhow::anyhow!(
                "AUTH_REFRESH_TOKEN_EXPIRY_DAYS must be positive"
            )));
        }

        if self.rate_limit.max_attempts == 0 || self.rate_limit.window_seconds == 0 {
            return Err(AuthError::Config(anyhow::anyhow!(
                "rate limit attempts and window must both be positive"
            )));
        }

        if self.audit.flush_interval_seconds == 0 {
            return Err(AuthError::Config(anyhow::anyhow!(
                "AUTH_AUDIT_FLUSH_INTERVAL_SECONDS must be positive"
            )));
        }

        if self.cleanup.revocation_retention_hours < 0 {
            return Err(AuthError::Config(anyhow::anyhow!(
                "AUTH_REVOCATION_RETENTION_HOURS must not be negative"
            )));
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AuthError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AuthError::Config(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AuthError::Config(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AuthError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?.parse().map_err(|e: T::Err| {
        AuthError::Config(anyhow::anyhow!("invalid value for {}: {}", key, e))
    })
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
