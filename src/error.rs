use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Error taxonomy for the auth subsystem.
///
/// Authentication failures (`InvalidToken`, `RevokedToken`, `ExpiredSession`,
/// `IdentityNotFound`) and authorization failures (`InsufficientRole`,
/// `InsufficientPermission`) are distinct variants so callers can map them to
/// different user-facing outcomes.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token has been revoked")]
    RevokedToken,

    #[error("Session expired or no longer active")]
    ExpiredSession,

    #[error("Identity not found or inactive")]
    IdentityNotFound,

    #[error("Missing required role: {0}")]
    InsufficientRole(String),

    #[error("Missing required permission: {0}")]
    InsufficientPermission(String),

    #[error("Too many requests")]
    RateLimited { retry_after_secs: u64 },

    /// Audit sink flush failure. Logged locally, never propagated to the
    /// caller of the triggering business operation.
    #[error("Audit sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// True for failures of proving who the caller is (401-class).
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidToken(_)
                | AuthError::RevokedToken
                | AuthError::ExpiredSession
                | AuthError::IdentityNotFound
        )
    }

    /// True for failures of what the caller may do (403-class).
    pub fn is_authorization_failure(&self) -> bool {
        matches!(
            self,
            AuthError::InsufficientRole(_) | AuthError::InsufficientPermission(_)
        )
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
        }

        let (status, error_message, retry_after) = match &self {
            AuthError::InvalidToken(_)
            | AuthError::RevokedToken
            | AuthError::ExpiredSession
            | AuthError::IdentityNotFound => (StatusCode::UNAUTHORIZED, self.to_string(), None),
            AuthError::InsufficientRole(_) | AuthError::InsufficientPermission(_) => {
                (StatusCode::FORBIDDEN, self.to_string(), None)
            }
            AuthError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests. Please try again later.".to_string(),
                Some(*retry_after_secs),
            ),
            AuthError::SinkUnavailable(_) | AuthError::Config(_) | AuthError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                None,
            ),
        };

        let mut res = (
            status,
            Json(ErrorResponse {
                error: error_message,
            }),
        )
            .into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_and_authorization_failures_are_distinct() {
        assert!(AuthError::RevokedToken.is_authentication_failure());
        assert!(AuthError::ExpiredSession.is_authentication_failure());
        assert!(!AuthError::RevokedToken.is_authorization_failure());

        let forbidden = AuthError::InsufficientPermission("data:read".to_string());
        assert!(forbidden.is_authorization_failure());
        assert!(!forbidden.is_authentication_failure());
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let res = AuthError::RateLimited {
            retry_after_secs: 42,
        }
        .into_response();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            res.headers().get(axum::http::header::RETRY_AFTER).unwrap(),
            "42"
        );
    }
}
