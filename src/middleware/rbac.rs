//! Declarative role → permission matrix (§4.2). Seeded once at startup into
//! `permissions`/`role_permissions` (`store::postgres::PgStore::seed_permission`)
//! so it is introspectable via the API, but enforcement always consults this
//! in-memory table, never the database.

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

use crate::models::identity::Role;

/// `resource:action`, with `resource:*` granting every action on `resource`.
pub static PERMISSION_MATRIX: Lazy<HashMap<Role, HashSet<&'static str>>> = Lazy::new(|| {
    let mut m = HashMap::new();

    m.insert(
        Role::OrgOwner,
        [
            "organizations:*",
            "users:*",
            "teams:*",
            "workspaces:*",
            "agents:*",
            "external_agents:*",
            "deployments:*",
            "billing:*",
            "policies:*",
            "connectors:*",
            "promotions:*",
            "pipelines:*",
            "panels:*",
            "metrics:*",
            "gateways:*",
            "api_keys:*",
            "webhooks:*",
            "scaling:*",
            "invitations:*",
            "sso:*",
            "audit:read",
            "lineage:*",
            "gdpr:*",
            "approvals:decide",
        ]
        .into_iter()
        .collect(),
    );

    m.insert(
        Role::OrgAdmin,
        [
            "users:*",
            "teams:*",
            "workspaces:*",
            "agents:*",
            "external_agents:*",
            "deployments:*",
            "policies:*",
            "connectors:*",
            "promotions:*",
            "pipelines:*",
            "panels:*",
            "metrics:*",
            "gateways:*",
            "api_keys:*",
            "webhooks:*",
            "scaling:*",
            "invitations:*",
            "sso:*",
            "audit:read",
            "lineage:*",
            "gdpr:redact",
            "approvals:decide",
        ]
        .into_iter()
        .collect(),
    );

    m.insert(
        Role::Developer,
        [
            "agents:create",
            "agents:read",
            "agents:update",
            "agents:delete",
            "deployments:create",
            "deployments:read",
            "deployments:update",
            "workspaces:read",
            "teams:read",
            "policies:read",
            "connectors:read",
            "connectors:execute",
            "pipelines:read",
            "panels:read",
            "metrics:read",
            "gateways:read",
            "api_keys:read",
            "lineage:read",
        ]
        .into_iter()
        .collect(),
    );

    m.insert(
        Role::Viewer,
        [
            "agents:read",
            "deployments:read",
            "workspaces:read",
            "teams:read",
            "policies:read",
            "connectors:read",
            "pipelines:read",
            "panels:read",
            "metrics:read",
            "gateways:read",
        ]
        .into_iter()
        .collect(),
    );

    // tenant_admin is the platform cross-org role; it sees every resource
    // but acts outside any single org's policies (see DESIGN.md).
    m.insert(Role::TenantAdmin, ["*:*"].into_iter().collect());

    m
});

/// `resource:action` the caller needs, e.g. `"external_agents:invoke"`.
pub struct Permission<'a>(pub &'a str);

/// `true` iff `role` is granted `permission` directly, via `resource:*`, or
/// via the `tenant_admin` `*:*` override.
pub fn role_has_permission(role: Role, permission: &str) -> bool {
    let Some(granted) = PERMISSION_MATRIX.get(&role) else {
        return false;
    };

    if granted.contains("*:*") || granted.contains(permission) {
        return true;
    }

    if let Some((resource, _action)) = permission.split_once(':') {
        let wildcard = format!("{resource}:*");
        if granted.contains(wildcard.as_str()) {
            return true;
        }
    }

    false
}

/// Entry point for handlers: `require(Role::Developer, "external_agents:invoke")`.
pub fn require(role: Role, permission: &str) -> Result<(), crate::errors::AppError> {
    if role_has_permission(role, permission) {
        Ok(())
    } else {
        Err(crate::errors::AppError::Forbidden(format!(
            "role '{}' lacks permission '{}'",
            role.as_str(),
            permission
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn org_owner_has_wildcard_resources() {
        assert!(role_has_permission(Role::OrgOwner, "api_keys:delete"));
        assert!(role_has_permission(Role::OrgOwner, "billing:update"));
    }

    #[test]
    fn org_admin_lacks_billing() {
        assert!(!role_has_permission(Role::OrgAdmin, "billing:read"));
    }

    #[test]
    fn org_admin_gdpr_is_redact_only() {
        assert!(role_has_permission(Role::OrgAdmin, "gdpr:redact"));
        assert!(!role_has_permission(Role::OrgAdmin, "gdpr:delete"));
    }

    #[test]
    fn developer_cannot_invoke_external_agents() {
        assert!(!role_has_permission(Role::Developer, "external_agents:invoke"));
        assert!(!role_has_permission(Role::Developer, "external_agents:create"));
    }

    #[test]
    fn org_admin_has_external_agents_wildcard() {
        assert!(role_has_permission(Role::OrgAdmin, "external_agents:invoke"));
        assert!(role_has_permission(Role::OrgAdmin, "external_agents:create"));
    }

    #[test]
    fn viewer_is_read_only() {
        assert!(role_has_permission(Role::Viewer, "agents:read"));
        assert!(!role_has_permission(Role::Viewer, "agents:create"));
    }

    #[test]
    fn tenant_admin_bypasses_everything() {
        assert!(role_has_permission(Role::TenantAdmin, "organizations:delete"));
    }

    #[test]
    fn unknown_permission_denied() {
        assert!(!role_has_permission(Role::Viewer, "billing:read"));
    }
}
