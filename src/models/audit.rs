use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::session::OriginMetadata;

/// Outcome of the audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
    Error,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditResult::Success => "success",
            AuditResult::Failure => "failure",
            AuditResult::Error => "error",
        }
    }
}

/// Contextual snapshot attached to every event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditMetadata {
    pub request_id: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

/// One security/audit event. `details` has already been through the
/// sensitive-field masking pass by the time an event leaves the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
    pub details: serde_json::Value,
    pub result: AuditResult,
    pub error_message: Option<String>,
    pub metadata: AuditMetadata,
}

impl AuditEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        action: impl Into<String>,
        resource: impl Into<String>,
        resource_id: Option<String>,
        user_id: Option<String>,
        session_id: Option<String>,
        origin: &OriginMetadata,
        details: serde_json::Value,
        result: AuditResult,
        error_message: Option<String>,
        metadata: AuditMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            user_id,
            session_id,
            action: action.into(),
            resource: resource.into(),
            resource_id,
            ip_address: origin.ip_address.clone(),
            user_agent: origin.user_agent.clone(),
            details,
            result,
            error_message,
            metadata,
        }
    }

    /// Critical events are flushed synchronously at log time in addition to
    /// the buffered background flush.
    pub fn is_critical(&self) -> bool {
        self.action == "auth.login"
            || self.action == "auth.logout"
            || self.action == "data.delete"
            || self.action == "module.violation"
            || self.action.starts_with("security.")
            || self.action.starts_with("admin.")
    }
}
