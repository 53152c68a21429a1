//! Per-request integration with the HTTP pipeline.
//!
//! The guard extracts the bearer token, verifies it, resolves the caller's
//! identity context into request extensions, enforces route-declared role
//! and permission requirements, and emits an `http.request` audit record
//! with method, path, status, and latency.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::Response,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use crate::error::AuthError;
use crate::models::{AuditResult, Claims, OriginMetadata};
use crate::services::{AuditContext, AuditPipeline, RbacResolver, TokenService};

/// Request-scoped identity context populated by the guard on success.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub identity_id: String,
    pub session_id: String,
    pub jti: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl From<&Claims> for AuthContext {
    fn from(claims: &Claims) -> Self {
        Self {
            identity_id: claims.sub.clone(),
            session_id: claims.session_id.clone(),
            jti: claims.jti.clone(),
            roles: claims.roles.clone(),
            permissions: claims.permissions.clone(),
        }
    }
}

/// Shared state for the guard middleware stack.
#[derive(Clone)]
pub struct RequestGuard {
    tokens: Arc<TokenService>,
    rbac: Arc<RbacResolver>,
    audit: Arc<AuditPipeline>,
}

impl RequestGuard {
    pub fn new(
        tokens: Arc<TokenService>,
        rbac: Arc<RbacResolver>,
        audit: Arc<AuditPipeline>,
    ) -> Self {
        Self {
            tokens,
            rbac,
            audit,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    pub fn rbac(&self) -> &Arc<RbacResolver> {
        &self.rbac
    }

    pub fn audit(&self) -> &Arc<AuditPipeline> {
        &self.audit
    }
}

/// Route-declared access requirements, layered after [`auth_middleware`].
#[derive(Clone)]
pub struct RequiredAccess {
    pub guard: Arc<RequestGuard>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl RequiredAccess {
    pub fn permissions<I, S>(guard: Arc<RequestGuard>, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            guard,
            roles: Vec::new(),
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn roles<I, S>(guard: Arc<RequestGuard>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            guard,
            roles: roles.into_iter().map(Into::into).collect(),
            permissions: Vec::new(),
        }
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

fn request_origin(req: &Request) -> OriginMetadata {
    let ip = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    OriginMetadata::new(ip, user_agent)
}

/// Middleware requiring a valid bearer access token. Verification failures
/// short-circuit with a 401-equivalent outcome and an audit record.
pub async fn auth_middleware(
    State(guard): State<Arc<RequestGuard>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let started = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let origin = request_origin(&req);

    let token = match bearer_token(&req) {
        Some(token) => token,
        None => {
            let err = AuthError::InvalidToken("missing bearer token".to_string());
            audit_request_failure(&guard, &method, &path, origin, None, &err).await;
            return Err(err);
        }
    };

    let claims = match guard.tokens.verify(token) {
        Ok(claims) => claims,
        Err(err) => {
            audit_request_failure(&guard, &method, &path, origin, None, &err).await;
            return Err(err);
        }
    };

    let ctx = AuthContext::from(&claims);
    req.extensions_mut().insert(ctx.clone());

    let response = next.run(req).await;
    let status = response.status();
    audit_request(&guard, &method, &path, origin, Some(&ctx), status, started).await;
    Ok(response)
}

/// Variant for routes where authentication is optional: a missing or invalid
/// token clears the identity context instead of short-circuiting.
pub async fn optional_auth_middleware(
    State(guard): State<Arc<RequestGuard>>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(token) = bearer_token(&req) {
        match guard.tokens.verify(token) {
            Ok(claims) => {
                req.extensions_mut().insert(AuthContext::from(&claims));
            }
            Err(err) => {
                tracing::debug!(error = %err, "ignoring invalid bearer token on optional route");
            }
        }
    }
    next.run(req).await
}

/// Middleware enforcing route-declared roles/permissions against the
/// authenticated context. Unmet requirements produce a 403-equivalent
/// outcome, distinct from authentication failure. Permissions are
/// re-resolved through the resolver rather than trusted from token claims.
pub async fn require_access_middleware(
    State(required): State<RequiredAccess>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let origin = request_origin(&req);

    let ctx = req
        .extensions()
        .get::<AuthContext>()
        .cloned()
        .ok_or_else(|| AuthError::InvalidToken("request is not authenticated".to_string()))?;

    for role in &required.roles {
        if !ctx.roles.contains(role) {
            let err = AuthError::InsufficientRole(role.clone());
            audit_access_denied(&required.guard, &method, &path, origin, &ctx, &err).await;
            return Err(err);
        }
    }

    for permission in &required.permissions {
        if !required.guard.rbac.has_permission(&ctx.identity_id, permission) {
            let err = AuthError::InsufficientPermission(permission.clone());
            audit_access_denied(&required.guard, &method, &path, origin, &ctx, &err).await;
            return Err(err);
        }
    }

    Ok(next.run(req).await)
}

async fn audit_request(
    guard: &RequestGuard,
    method: &str,
    path: &str,
    origin: OriginMetadata,
    ctx: Option<&AuthContext>,
    status: StatusCode,
    started: Instant,
) {
    let audit_ctx = AuditContext {
        user_id: ctx.map(|c| c.identity_id.clone()),
        session_id: ctx.map(|c| c.session_id.clone()),
        origin,
        request_id: None,
        roles: ctx.map(|c| c.roles.clone()).unwrap_or_default(),
        permissions: ctx.map(|c| c.permissions.clone()).unwrap_or_default(),
    };
    guard
        .audit
        .log(
            "http.request",
            "http",
            Some(path),
            &audit_ctx,
            json!({
                "method": method,
                "path": path,
                "status": status.as_u16(),
                "latency_ms": started.elapsed().as_millis() as u64,
            }),
            AuditResult::Success,
            None,
        )
        .await;
}

async fn audit_request_failure(
    guard: &RequestGuard,
    method: &str,
    path: &str,
    origin: OriginMetadata,
    ctx: Option<&AuthContext>,
    err: &AuthError,
) {
    let audit_ctx = AuditContext {
        user_id: ctx.map(|c| c.identity_id.clone()),
        session_id: ctx.map(|c| c.session_id.clone()),
        origin,
        ..AuditContext::default()
    };
    guard
        .audit
        .log(
            "security.authentication_failed",
            "http",
            Some(path),
            &audit_ctx,
            json!({ "method": method, "path": path }),
            AuditResult::Failure,
            Some(&err.to_string()),
        )
        .await;
}

async fn audit_access_denied(
    guard: &RequestGuard,
    method: &str,
    path: &str,
    origin: OriginMetadata,
    ctx: &AuthContext,
    err: &AuthError,
) {
    tracing::warn!(
        identity = %ctx.identity_id,
        path = %path,
        error = %err,
        "access denied"
    );
    let audit_ctx = AuditContext {
        user_id: Some(ctx.identity_id.clone()),
        session_id: Some(ctx.session_id.clone()),
        origin,
        request_id: None,
        roles: ctx.roles.clone(),
        permissions: ctx.permissions.clone(),
    };
    guard
        .audit
        .log(
            "security.authorization_failed",
            "http",
            Some(path),
            &audit_ctx,
            json!({ "method": method, "path": path }),
            AuditResult::Failure,
            Some(&err.to_string()),
        )
        .await;
}

/// Extractor for handlers that need the authenticated context.
pub struct AuthIdentity(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthIdentity
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| AuthError::InvalidToken("request is not authenticated".to_string()))?;
        Ok(AuthIdentity(ctx))
    }
}
