use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A role held by an identity, optionally time-bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role_id: String,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoleAssignment {
    pub fn new(role_id: impl Into<String>) -> Self {
        Self {
            role_id: role_id.into(),
            assigned_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn until(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }
}

/// A direct per-identity grant or deny on a single permission name.
///
/// Direct overrides always take precedence over role-derived permissions,
/// regardless of role priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionOverride {
    pub permission: String,
    pub allow: bool,
    pub reason: Option<String>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PermissionOverride {
    pub fn grant(permission: impl Into<String>) -> Self {
        Self {
            permission: permission.into(),
            allow: true,
            reason: None,
            granted_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn deny(permission: impl Into<String>) -> Self {
        Self {
            allow: false,
            ..Self::grant(permission)
        }
    }

    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn until(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }
}

/// An authenticatable principal. Referenced by id from sessions and tokens,
/// never duplicated into them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub roles: Vec<RoleAssignment>,
    pub overrides: Vec<PermissionOverride>,
    pub active: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
            overrides: Vec::new(),
            active: true,
            metadata: HashMap::new(),
        }
    }

    pub fn with_role(mut self, role_id: impl Into<String>) -> Self {
        self.roles.push(RoleAssignment::new(role_id));
        self
    }

    pub fn with_override(mut self, ov: PermissionOverride) -> Self {
        self.overrides.push(ov);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn assignment_expiry_is_inclusive() {
        let now = Utc::now();
        let assignment = RoleAssignment::new("admin").until(now);
        assert!(assignment.is_expired(now));

        let live = RoleAssignment::new("admin").until(now + Duration::minutes(1));
        assert!(!live.is_expired(now));
    }

    #[test]
    fn override_builders() {
        let ov = PermissionOverride::deny("data:read").because("offboarding");
        assert!(!ov.allow);
        assert_eq!(ov.reason.as_deref(), Some("offboarding"));
        assert!(!ov.is_expired(Utc::now()));
    }
}
