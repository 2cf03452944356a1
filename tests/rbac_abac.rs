//! Integration coverage for the permission matrix and the ABAC condition
//! evaluator working together: a role granting the coarse `resource:*`
//! permission combined with a policy that narrows access by attribute.

use kaizen_studio::middleware::abac::{evaluate, Decision};
use kaizen_studio::middleware::fields::{Environment, EvalContext, ResourceRef, Subject};
use kaizen_studio::middleware::rbac::{require, role_has_permission};
use kaizen_studio::models::identity::Role;
use kaizen_studio::models::policy::{Effect, Policy, PolicyStatus};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn policy(effect: Effect, action: &str, conditions: serde_json::Value, priority: i32) -> Policy {
    Policy {
        id: Uuid::new_v4(),
        org_id: Uuid::new_v4(),
        resource_type: "external_agents".into(),
        action: action.into(),
        effect,
        conditions,
        resource_refs: None,
        priority,
        status: PolicyStatus::Active,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

#[test]
fn viewer_role_lacks_invoke_permission_before_policy_is_even_consulted() {
    assert!(!role_has_permission(Role::Viewer, "external_agents:invoke"));
    assert!(require(Role::Viewer, "external_agents:invoke").is_err());
}

#[test]
fn org_admin_role_grants_invoke_but_abac_can_still_narrow_it() {
    assert!(role_has_permission(Role::OrgAdmin, "external_agents:invoke"));

    let subject = Subject {
        user_id: Some(Uuid::new_v4()),
        org_id: Uuid::new_v4(),
        role: "org_admin".into(),
        team_ids: vec!["team-payments".into()],
    };
    let mut attrs = HashMap::new();
    attrs.insert("owning_team".to_string(), json!("team-fraud"));
    let resource = ResourceRef {
        resource_type: "external_agents".into(),
        attributes: attrs,
    };
    let environment = Environment {
        ip: Some("10.0.0.5".into()),
        time: chrono::Utc::now(),
    };
    let ctx = EvalContext {
        subject: &subject,
        resource: &resource,
        environment: &environment,
    };

    // RBAC says yes, but the org scoped a policy restricting invocation to
    // the resource's own team — expressed as a deny on every non-member
    // team, since a non-matching allow only falls back to NotApplicable
    // rather than narrowing what RBAC already granted.
    let restrict = policy(
        Effect::Deny,
        "invoke",
        json!({"field": "resource.owning_team", "op": "nin", "value": ["team-payments"]}),
        10,
    );
    assert!(matches!(
        evaluate(&[restrict], &ctx),
        Decision::Deny { .. }
    ));
}

#[test]
fn tenant_admin_wildcard_bypasses_every_named_permission() {
    assert!(role_has_permission(Role::TenantAdmin, "anything:at_all"));
    assert!(role_has_permission(Role::TenantAdmin, "billing:refund"));
}

#[test]
fn deny_policy_wins_even_at_lower_priority_than_a_matching_allow() {
    let subject = Subject {
        user_id: Some(Uuid::new_v4()),
        org_id: Uuid::new_v4(),
        role: "org_admin".into(),
        team_ids: vec![],
    };
    let resource = ResourceRef {
        resource_type: "external_agents".into(),
        attributes: HashMap::new(),
    };
    let environment = Environment {
        ip: Some("203.0.113.9".into()),
        time: chrono::Utc::now(),
    };
    let ctx = EvalContext {
        subject: &subject,
        resource: &resource,
        environment: &environment,
    };

    let broad_allow = policy(Effect::Allow, "invoke", json!({"all": []}), 0);
    let ip_deny = policy(
        Effect::Deny,
        "invoke",
        json!({"field": "environment.ip", "op": "eq", "value": "203.0.113.9"}),
        -100,
    );

    assert!(matches!(
        evaluate(&[broad_allow, ip_deny], &ctx),
        Decision::Deny { .. }
    ));
}

#[test]
fn regex_condition_matches_only_its_pattern() {
    let subject = Subject {
        user_id: Some(Uuid::new_v4()),
        org_id: Uuid::new_v4(),
        role: "developer".into(),
        team_ids: vec![],
    };
    let mut attrs = HashMap::new();
    attrs.insert("endpoint".to_string(), json!("https://partner.example.com/v2/run"));
    let resource = ResourceRef {
        resource_type: "external_agents".into(),
        attributes: attrs,
    };
    let environment = Environment {
        ip: None,
        time: chrono::Utc::now(),
    };
    let ctx = EvalContext {
        subject: &subject,
        resource: &resource,
        environment: &environment,
    };

    let allow_partner = policy(
        Effect::Allow,
        "invoke",
        json!({"field": "resource.endpoint", "op": "regex", "value": "^https://partner\\.example\\.com/"}),
        0,
    );
    assert_eq!(evaluate(&[allow_partner], &ctx), Decision::Allow);
}
