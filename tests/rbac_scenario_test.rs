mod common;

use auth_core::models::{Identity, PermissionOverride, Role, RoleAssignment};
use common::{seeded_state, test_origin};

#[tokio::test]
async fn issued_claims_snapshot_roles_and_permissions() {
    let (state, _sink) = seeded_state();

    let pair = state.tokens.issue("u-viewer", &test_origin()).await.unwrap();
    let claims = state.tokens.verify(&pair.access_token).unwrap();

    assert_eq!(claims.roles, vec!["viewer".to_string()]);
    assert_eq!(claims.permissions, vec!["read:users".to_string()]);
}

#[tokio::test]
async fn refresh_re_snapshots_role_changes() {
    let (state, _sink) = seeded_state();

    let pair = state.tokens.issue("u-viewer", &test_origin()).await.unwrap();
    let before = state.tokens.verify(&pair.access_token).unwrap();
    assert!(!before.permissions.contains(&"write:users".to_string()));

    state
        .rbac
        .assign_role("u-viewer", RoleAssignment::new("admin"))
        .unwrap();

    // The already-issued access token is a fixed snapshot; the refresh
    // exchange picks up the new assignment.
    let rotated = state.tokens.refresh(&pair.refresh_token).await.unwrap();
    let after = state.tokens.verify(&rotated.access_token).unwrap();
    assert!(after.roles.contains(&"admin".to_string()));
    assert!(after.permissions.contains(&"write:users".to_string()));
}

#[tokio::test]
async fn deny_override_beats_role_grant() {
    let (state, _sink) = seeded_state();

    assert!(state.rbac.has_permission("u-admin", "delete:users"));

    state
        .rbac
        .set_override(
            "u-admin",
            PermissionOverride::deny("delete:users").because("incident freeze"),
        )
        .unwrap();

    assert!(!state.rbac.has_permission("u-admin", "delete:users"));
    // Other role-derived permissions are untouched.
    assert!(state.rbac.has_permission("u-admin", "write:users"));

    let effective = state.rbac.effective_permissions("u-admin");
    assert!(!effective.contains("delete:users"));
    assert!(effective.contains("write:users"));
}

#[tokio::test]
async fn grant_override_adds_beyond_roles() {
    let (state, _sink) = seeded_state();

    assert!(!state.rbac.has_permission("u-viewer", "export:reports"));
    state
        .rbac
        .set_override("u-viewer", PermissionOverride::grant("export:reports"))
        .unwrap();
    assert!(state.rbac.has_permission("u-viewer", "export:reports"));
}

#[tokio::test]
async fn wildcard_roles_cover_category_and_global() {
    let (state, _sink) = seeded_state();

    state
        .rbac
        .upsert_role(Role::new("reporter", "Reporter", 5).with_permissions(["reports:*"]))
        .unwrap();
    state
        .rbac
        .upsert_role(Role::new("root", "Root", 0).with_permissions(["*"]))
        .unwrap();
    state
        .rbac
        .upsert_identity(Identity::new("u-reporter").with_role("reporter"));
    state.rbac.upsert_identity(Identity::new("u-root").with_role("root"));

    assert!(state.rbac.has_permission("u-reporter", "reports:export"));
    assert!(!state.rbac.has_permission("u-reporter", "users:export"));

    assert!(state.rbac.has_permission("u-root", "reports:export"));
    assert!(state.rbac.has_permission("u-root", "users:delete"));
}

#[tokio::test]
async fn deactivating_a_role_removes_its_grants() {
    let (state, _sink) = seeded_state();

    let mut role = state.rbac.role("viewer").unwrap();
    role.active = false;
    state.rbac.upsert_role(role).unwrap();

    assert!(!state.rbac.has_permission("u-viewer", "read:users"));
}
