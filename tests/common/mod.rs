//! Shared setup for integration tests.

#![allow(dead_code)]

use auth_core::config::{
    AuditConfig, AuthConfig, CleanupConfig, Environment, PasswordConfig, RateLimitConfig,
    TokenConfig,
};
use auth_core::models::{Identity, Role};
use auth_core::services::{AuditSink, MemorySink, MemoryStore};
use auth_core::AuthState;
use std::sync::Arc;

pub fn test_config() -> AuthConfig {
    AuthConfig {
        environment: Environment::Dev,
        service_name: "auth-core-tests".to_string(),
        log_level: "debug".to_string(),
        token: TokenConfig {
            secret: "integration-test-secret".to_string(),
            issuer: "auth-core".to_string(),
            audience: "auth-core-clients".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        },
        password: PasswordConfig {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        },
        rate_limit: RateLimitConfig {
            max_attempts: 3,
            window_seconds: 60,
        },
        audit: AuditConfig {
            flush_interval_seconds: 1,
            critical_flush_timeout_ms: 500,
            buffer_capacity: 1000,
            extra_masked_fields: vec![],
            file_path: None,
        },
        cleanup: CleanupConfig {
            interval_seconds: 3600,
            revocation_retention_hours: 24,
        },
    }
}

/// Builds a wired state over the in-memory store, returning a handle to the
/// memory sink so tests can inspect persisted audit events.
pub fn build_state(config: AuthConfig) -> (AuthState, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let sinks: Vec<Arc<dyn AuditSink>> = vec![sink.clone()];
    let state = AuthState::with_store(config, Arc::new(MemoryStore::new()), sinks)
        .expect("test state should build");
    (state, sink)
}

/// Default state with one admin identity (`u-admin`) and one viewer
/// identity (`u-viewer`).
pub fn seeded_state() -> (AuthState, Arc<MemorySink>) {
    let (state, sink) = build_state(test_config());
    seed_identities(&state);
    (state, sink)
}

pub fn seed_identities(state: &AuthState) {
    state
        .rbac
        .upsert_role(
            Role::new("admin", "Administrator", 0)
                .with_permissions(["read:users", "write:users", "delete:users"]),
        )
        .expect("valid role");
    state
        .rbac
        .upsert_role(Role::new("viewer", "Viewer", 10).with_permissions(["read:users"]))
        .expect("valid role");

    state.rbac.upsert_identity(Identity::new("u-admin").with_role("admin"));
    state.rbac.upsert_identity(Identity::new("u-viewer").with_role("viewer"));
}

pub fn test_origin() -> auth_core::models::OriginMetadata {
    auth_core::models::OriginMetadata::new("203.0.113.9", "integration-tests")
}
