//! Role/permission resolution with direct per-identity overrides.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;

use crate::error::AuthError;
use crate::models::{
    category_wildcard, is_valid_permission_name, Identity, PermissionOverride, Role,
    RoleAssignment, GLOBAL_WILDCARD,
};

/// Computes an identity's effective permission set from role assignments,
/// role-permission mappings, and direct overrides.
///
/// A direct override (grant or deny) on the exact permission name is always
/// authoritative, regardless of any role's priority level. When conflicting
/// unexpired overrides exist for the same name, deny wins.
///
/// An explicit service instance, threaded through request context; there is
/// deliberately no module-level singleton.
pub struct RbacResolver {
    identities: DashMap<String, Identity>,
    roles: DashMap<String, Role>,
}

impl Default for RbacResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl RbacResolver {
    pub fn new() -> Self {
        Self {
            identities: DashMap::new(),
            roles: DashMap::new(),
        }
    }

    // Directory maintenance ------------------------------------------------

    pub fn upsert_role(&self, role: Role) -> Result<(), AuthError> {
        for permission in &role.permissions {
            if !is_valid_permission_name(permission) {
                return Err(AuthError::Internal(anyhow::anyhow!(
                    "invalid permission name '{}' on role '{}'",
                    permission,
                    role.id
                )));
            }
        }
        self.roles.insert(role.id.clone(), role);
        Ok(())
    }

    pub fn role(&self, id: &str) -> Option<Role> {
        self.roles.get(id).map(|r| r.clone())
    }

    pub fn remove_role(&self, id: &str) -> Option<Role> {
        self.roles.remove(id).map(|(_, r)| r)
    }

    pub fn upsert_identity(&self, identity: Identity) {
        self.identities.insert(identity.id.clone(), identity);
    }

    pub fn identity(&self, id: &str) -> Option<Identity> {
        self.identities.get(id).map(|i| i.clone())
    }

    pub fn remove_identity(&self, id: &str) -> Option<Identity> {
        self.identities.remove(id).map(|(_, i)| i)
    }

    pub fn assign_role(
        &self,
        identity_id: &str,
        assignment: RoleAssignment,
    ) -> Result<(), AuthError> {
        let mut identity = self
            .identities
            .get_mut(identity_id)
            .ok_or(AuthError::IdentityNotFound)?;
        identity.roles.retain(|a| a.role_id != assignment.role_id);
        identity.roles.push(assignment);
        Ok(())
    }

    pub fn unassign_role(&self, identity_id: &str, role_id: &str) -> Result<(), AuthError> {
        let mut identity = self
            .identities
            .get_mut(identity_id)
            .ok_or(AuthError::IdentityNotFound)?;
        identity.roles.retain(|a| a.role_id != role_id);
        Ok(())
    }

    /// Install a direct override, replacing any existing override on the
    /// same permission name.
    pub fn set_override(
        &self,
        identity_id: &str,
        ov: PermissionOverride,
    ) -> Result<(), AuthError> {
        if !is_valid_permission_name(&ov.permission) {
            return Err(AuthError::Internal(anyhow::anyhow!(
                "invalid permission name '{}'",
                ov.permission
            )));
        }
        let mut identity = self
            .identities
            .get_mut(identity_id)
            .ok_or(AuthError::IdentityNotFound)?;
        identity.overrides.retain(|o| o.permission != ov.permission);
        identity.overrides.push(ov);
        Ok(())
    }

    pub fn clear_override(&self, identity_id: &str, permission: &str) -> Result<(), AuthError> {
        let mut identity = self
            .identities
            .get_mut(identity_id)
            .ok_or(AuthError::IdentityNotFound)?;
        identity.overrides.retain(|o| o.permission != permission);
        Ok(())
    }

    // Resolution -----------------------------------------------------------

    /// Authoritative per-action check. Direct overrides first, then role
    /// permission sets with `category:*` and `*` wildcard handling.
    pub fn has_permission(&self, identity_id: &str, permission: &str) -> bool {
        let now = Utc::now();
        let Some(identity) = self.identities.get(identity_id) else {
            tracing::warn!(identity = %identity_id, permission = %permission, "permission denied: unknown identity");
            return false;
        };
        if !identity.active {
            return false;
        }

        let mut granted = false;
        let mut overridden = false;
        for ov in identity
            .overrides
            .iter()
            .filter(|o| o.permission == permission && !o.is_expired(now))
        {
            overridden = true;
            if !ov.allow {
                return false;
            }
            granted = true;
        }
        if overridden {
            return granted;
        }

        let wildcard = category_wildcard(permission);
        for assignment in identity.roles.iter().filter(|a| !a.is_expired(now)) {
            let Some(role) = self.roles.get(&assignment.role_id) else {
                continue;
            };
            if !role.active {
                continue;
            }
            if role.permissions.contains(permission)
                || role.permissions.contains(GLOBAL_WILDCARD)
                || wildcard
                    .as_deref()
                    .is_some_and(|w| role.permissions.contains(w))
            {
                return true;
            }
        }
        false
    }

    /// Role-derived permissions minus direct denies, plus direct grants.
    ///
    /// Non-authoritative: used for token claims and UI gating. Server-side
    /// checks go through [`RbacResolver::has_permission`] per action.
    pub fn effective_permissions(&self, identity_id: &str) -> BTreeSet<String> {
        let now = Utc::now();
        let Some(identity) = self.identities.get(identity_id) else {
            return BTreeSet::new();
        };
        if !identity.active {
            return BTreeSet::new();
        }

        let mut permissions: BTreeSet<String> = BTreeSet::new();
        for assignment in identity.roles.iter().filter(|a| !a.is_expired(now)) {
            if let Some(role) = self.roles.get(&assignment.role_id) {
                if role.active {
                    permissions.extend(role.permissions.iter().cloned());
                }
            }
        }

        for ov in identity.overrides.iter().filter(|o| !o.is_expired(now)) {
            if ov.allow {
                permissions.insert(ov.permission.clone());
            } else {
                permissions.remove(&ov.permission);
            }
        }

        permissions
    }

    /// Active, unexpired role ids held by an identity, for token claims.
    pub fn active_role_ids(&self, identity_id: &str) -> Vec<String> {
        let now = Utc::now();
        let Some(identity) = self.identities.get(identity_id) else {
            return Vec::new();
        };
        identity
            .roles
            .iter()
            .filter(|a| !a.is_expired(now))
            .filter(|a| {
                self.roles
                    .get(&a.role_id)
                    .map(|r| r.active)
                    .unwrap_or(false)
            })
            .map(|a| a.role_id.clone())
            .collect()
    }

    /// Union of permission sets across several simultaneously-held roles.
    pub fn merge_roles(&self, role_ids: &[String]) -> BTreeSet<String> {
        let mut merged = BTreeSet::new();
        for id in role_ids {
            if let Some(role) = self.roles.get(id) {
                if role.active {
                    merged.extend(role.permissions.iter().cloned());
                }
            }
        }
        merged
    }

    /// Union of module-access sets across several roles.
    pub fn merge_modules(&self, role_ids: &[String]) -> BTreeSet<String> {
        let mut merged = BTreeSet::new();
        for id in role_ids {
            if let Some(role) = self.roles.get(id) {
                if role.active {
                    merged.extend(role.modules.iter().cloned());
                }
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn resolver_with_admin() -> RbacResolver {
        let resolver = RbacResolver::new();
        resolver
            .upsert_role(
                Role::new("admin", "Administrator", 0)
                    .with_permissions(["read:users", "write:users"])
                    .with_modules(["accounts"]),
            )
            .unwrap();
        resolver.upsert_identity(Identity::new("u1").with_role("admin"));
        resolver
    }

    #[test]
    fn role_grants_exact_permissions_only() {
        let resolver = resolver_with_admin();
        assert!(resolver.has_permission("u1", "read:users"));
        assert!(resolver.has_permission("u1", "write:users"));
        assert!(!resolver.has_permission("u1", "delete:users"));
    }

    #[test]
    fn direct_deny_beats_role_grant() {
        let resolver = resolver_with_admin();
        resolver
            .set_override("u1", PermissionOverride::deny("read:users"))
            .unwrap();
        assert!(!resolver.has_permission("u1", "read:users"));
        // Unrelated role permissions survive.
        assert!(resolver.has_permission("u1", "write:users"));
    }

    #[test]
    fn direct_grant_without_any_role() {
        let resolver = RbacResolver::new();
        resolver.upsert_identity(Identity::new("u2"));
        resolver
            .set_override("u2", PermissionOverride::grant("billing:export"))
            .unwrap();
        assert!(resolver.has_permission("u2", "billing:export"));
    }

    #[test]
    fn expired_override_falls_back_to_roles() {
        let resolver = resolver_with_admin();
        resolver
            .set_override(
                "u1",
                PermissionOverride::deny("read:users").until(Utc::now() - Duration::minutes(1)),
            )
            .unwrap();
        assert!(resolver.has_permission("u1", "read:users"));
    }

    #[test]
    fn wildcard_roles() {
        let resolver = RbacResolver::new();
        resolver
            .upsert_role(Role::new("data_admin", "Data Admin", 10).with_permissions(["data:*"]))
            .unwrap();
        resolver
            .upsert_role(Role::new("root", "Root", 0).with_permissions(["*"]))
            .unwrap();
        resolver.upsert_identity(Identity::new("u_data").with_role("data_admin"));
        resolver.upsert_identity(Identity::new("u_root").with_role("root"));

        assert!(resolver.has_permission("u_data", "data:read"));
        assert!(!resolver.has_permission("u_data", "admin:read"));
        assert!(resolver.has_permission("u_root", "anything:at_all"));
    }

    #[test]
    fn inactive_identity_or_role_denies() {
        let resolver = resolver_with_admin();

        let mut role = resolver.role("admin").unwrap();
        role.active = false;
        resolver.upsert_role(role).unwrap();
        assert!(!resolver.has_permission("u1", "read:users"));

        let resolver = resolver_with_admin();
        let mut identity = resolver.identity("u1").unwrap();
        identity.active = false;
        resolver.upsert_identity(identity);
        assert!(!resolver.has_permission("u1", "read:users"));
        assert!(resolver.effective_permissions("u1").is_empty());
    }

    #[test]
    fn effective_permissions_apply_overrides() {
        let resolver = resolver_with_admin();
        resolver
            .set_override("u1", PermissionOverride::deny("read:users"))
            .unwrap();
        resolver
            .set_override("u1", PermissionOverride::grant("billing:export"))
            .unwrap();

        let perms = resolver.effective_permissions("u1");
        assert!(!perms.contains("read:users"));
        assert!(perms.contains("write:users"));
        assert!(perms.contains("billing:export"));
    }

    #[test]
    fn merge_helpers_union_across_roles() {
        let resolver = resolver_with_admin();
        resolver
            .upsert_role(
                Role::new("analyst", "Analyst", 20)
                    .with_permissions(["data:read"])
                    .with_modules(["reports"]),
            )
            .unwrap();

        let ids = vec!["admin".to_string(), "analyst".to_string()];
        let perms = resolver.merge_roles(&ids);
        assert!(perms.contains("read:users"));
        assert!(perms.contains("data:read"));

        let modules = resolver.merge_modules(&ids);
        assert!(modules.contains("accounts"));
        assert!(modules.contains("reports"));
    }

    #[test]
    fn invalid_permission_names_are_rejected() {
        let resolver = RbacResolver::new();
        assert!(resolver
            .upsert_role(Role::new("bad", "Bad", 0).with_permissions(["Not Valid"]))
            .is_err());

        resolver.upsert_identity(Identity::new("u1"));
        assert!(resolver
            .set_override("u1", PermissionOverride::grant("BAD"))
            .is_err());
    }
}
