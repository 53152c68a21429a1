//! Token-based authentication, authorization, and audit for axum services.
//!
//! The crate wires four cooperating pieces: a token service issuing and
//! verifying JWT pairs against an in-process session registry, a role
//! resolver answering permission checks with wildcard and override support,
//! an audit pipeline with masking and buffered delivery, and a request
//! guard that puts all of it in front of a router.

pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod services;
pub mod telemetry;
pub mod utils;

use std::sync::Arc;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::middleware::RequestGuard;
use crate::services::{
    AuditPipeline, AuditSink, AuthRateLimiter, AuthStore, FileSink, MemorySink, MemoryStore,
    RbacResolver, TokenService, TracingSink,
};
use crate::utils::PasswordHasher;

/// Fully wired subsystem state. Cheap to clone; every component is shared.
#[derive(Clone)]
pub struct AuthState {
    pub config: AuthConfig,
    pub hasher: Arc<PasswordHasher>,
    pub store: Arc<dyn AuthStore>,
    pub rbac: Arc<RbacResolver>,
    pub audit: Arc<AuditPipeline>,
    pub tokens: Arc<TokenService>,
    pub rate_limiter: Arc<AuthRateLimiter>,
    pub guard: Arc<RequestGuard>,
}

impl AuthState {
    /// Builds every component against the in-memory store with the default
    /// sink set: tracing always, a query-capable memory sink, and a file
    /// sink when configured.
    pub fn from_config(config: AuthConfig) -> Result<Self, AuthError> {
        let mut sinks: Vec<Arc<dyn AuditSink>> = vec![
            Arc::new(TracingSink),
            Arc::new(MemorySink::new()),
        ];
        if let Some(path) = &config.audit.file_path {
            sinks.push(Arc::new(FileSink::new(path)));
        }
        Self::with_store(config, Arc::new(MemoryStore::new()), sinks)
    }

    /// Same wiring against a caller-provided store and sink set. This is the
    /// seam for multi-instance deployments backing sessions and revocations
    /// with shared storage.
    pub fn with_store(
        config: AuthConfig,
        store: Arc<dyn AuthStore>,
        sinks: Vec<Arc<dyn AuditSink>>,
    ) -> Result<Self, AuthError> {
        config.validate()?;

        let hasher = Arc::new(PasswordHasher::new(&config.password)?);
        let rbac = Arc::new(RbacResolver::new());
        let audit = Arc::new(AuditPipeline::new(&config.audit, sinks));
        let tokens = Arc::new(TokenService::new(
            &config.token,
            &config.cleanup,
            Arc::clone(&store),
            Arc::clone(&rbac),
            Arc::clone(&audit),
        ));
        let rate_limiter = Arc::new(AuthRateLimiter::new(
            &config.rate_limit,
            Arc::clone(&audit),
        ));
        let guard = Arc::new(RequestGuard::new(
            Arc::clone(&tokens),
            Arc::clone(&rbac),
            Arc::clone(&audit),
        ));

        Ok(Self {
            config,
            hasher,
            store,
            rbac,
            audit,
            tokens,
            rate_limiter,
            guard,
        })
    }

    /// Starts the periodic audit flusher and the expiry reaper. Call once
    /// after construction, from within a tokio runtime.
    pub fn spawn_background_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        tracing::info!(
            flush_interval_s = self.config.audit.flush_interval_seconds,
            cleanup_interval_s = self.config.cleanup.interval_seconds,
            "starting background tasks"
        );
        vec![self.audit.spawn_flusher(), self.tokens.spawn_reaper()]
    }
}
