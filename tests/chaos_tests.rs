//! Adversarial coverage for the ABAC evaluator: malformed regex patterns,
//! type-mismatched comparisons, and deeply nested condition trees — the
//! kind of input a tenant's own policy author is far more likely to
//! produce by accident than an attacker is to craft deliberately.

use kaizen_studio::middleware::abac::{evaluate, Decision};
use kaizen_studio::middleware::fields::{Environment, EvalContext, ResourceRef, Subject};
use kaizen_studio::models::policy::{Effect, Policy, PolicyStatus};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn policy(effect: Effect, conditions: serde_json::Value) -> Policy {
    Policy {
        id: Uuid::new_v4(),
        org_id: Uuid::new_v4(),
        resource_type: "external_agents".into(),
        action: "invoke".into(),
        effect,
        conditions,
        resource_refs: None,
        priority: 0,
        status: PolicyStatus::Active,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

fn ctx_with_attrs(role: &str, attrs: HashMap<String, serde_json::Value>) -> (Subject, ResourceRef, Environment) {
    let subject = Subject {
        user_id: Some(Uuid::new_v4()),
        org_id: Uuid::new_v4(),
        role: role.into(),
        team_ids: vec![],
    };
    let resource = ResourceRef {
        resource_type: "external_agents".into(),
        attributes: attrs,
    };
    let environment = Environment {
        ip: Some("198.51.100.7".into()),
        time: chrono::Utc::now(),
    };
    (subject, resource, environment)
}

#[test]
fn catastrophic_regex_pattern_fails_closed_instead_of_panicking() {
    // A pattern an attacker-controlled policy field could plausibly contain:
    // unbounded repetition of a repeating group (ReDoS-shaped), not just
    // invalid syntax.
    let (subject, resource, environment) = ctx_with_attrs(
        "developer",
        HashMap::from([("endpoint".to_string(), json!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa!"))]),
    );
    let ctx = EvalContext { subject: &subject, resource: &resource, environment: &environment };
    let p = policy(
        Effect::Allow,
        json!({"field": "resource.endpoint", "op": "regex", "value": "(a+)+$"}),
    );
    // Must resolve to a decision, not hang or panic.
    let decision = evaluate(&[p], &ctx);
    assert!(matches!(decision, Decision::Allow | Decision::Deny { .. }));
}

#[test]
fn syntactically_invalid_regex_never_matches() {
    let (subject, resource, environment) = ctx_with_attrs(
        "developer",
        HashMap::from([("endpoint".to_string(), json!("anything"))]),
    );
    let ctx = EvalContext { subject: &subject, resource: &resource, environment: &environment };
    let p = policy(
        Effect::Allow,
        json!({"field": "resource.endpoint", "op": "regex", "value": "(unclosed["}),
    );
    // The allow never matches, but that's a non-applicable policy, not a
    // denial — a deny policy with the same broken regex is what must deny.
    assert_eq!(evaluate(&[p], &ctx), Decision::NotApplicable);

    let deny = policy(
        Effect::Deny,
        json!({"field": "resource.endpoint", "op": "regex", "value": "(unclosed["}),
    );
    assert_eq!(evaluate(&[deny], &ctx), Decision::NotApplicable);
}

#[test]
fn numeric_string_compares_equal_to_its_number() {
    let (subject, resource, environment) = ctx_with_attrs(
        "developer",
        HashMap::from([("priority_tier".to_string(), json!("3"))]),
    );
    let ctx = EvalContext { subject: &subject, resource: &resource, environment: &environment };
    let p = policy(
        Effect::Allow,
        json!({"field": "resource.priority_tier", "op": "eq", "value": 3}),
    );
    assert_eq!(evaluate(&[p], &ctx), Decision::Allow);
}

#[test]
fn nonexistent_field_fails_closed_on_positive_operators_but_not_ne() {
    let (subject, resource, environment) = ctx_with_attrs("developer", HashMap::new());
    let ctx = EvalContext { subject: &subject, resource: &resource, environment: &environment };

    let eq_policy = policy(Effect::Allow, json!({"field": "resource.missing", "op": "eq", "value": "x"}));
    assert_eq!(evaluate(&[eq_policy], &ctx), Decision::NotApplicable);

    let eq_deny = policy(Effect::Deny, json!({"field": "resource.missing", "op": "eq", "value": "x"}));
    assert_eq!(evaluate(&[eq_deny], &ctx), Decision::NotApplicable);

    let ne_policy = policy(Effect::Allow, json!({"field": "resource.missing", "op": "ne", "value": "x"}));
    assert_eq!(evaluate(&[ne_policy], &ctx), Decision::Allow);
}

#[test]
fn nested_not_all_any_combination_evaluates_correctly() {
    let (subject, resource, environment) = ctx_with_attrs("developer", HashMap::new());
    let ctx = EvalContext { subject: &subject, resource: &resource, environment: &environment };

    // not(any(all(not(eq role viewer), eq role developer)))
    let nested = json!({
        "not": {
            "any": [
                {
                    "all": [
                        { "not": { "field": "subject.role", "op": "eq", "value": "viewer" } },
                        { "field": "subject.role", "op": "eq", "value": "developer" }
                    ]
                }
            ]
        }
    });
    // The innermost clause is true (role is developer, not viewer), so
    // `any` is true, and the outer `not` flips it to false: the Allow
    // policy never fires, leaving no applicable policy at all.
    let p = policy(Effect::Allow, nested);
    assert_eq!(evaluate(&[p], &ctx), Decision::NotApplicable);
}

#[test]
fn contains_on_array_value_matches_membership_not_substring() {
    let (subject, resource, environment) = ctx_with_attrs(
        "developer",
        HashMap::from([("tags".to_string(), json!(["prod", "high-risk"]))]),
    );
    let ctx = EvalContext { subject: &subject, resource: &resource, environment: &environment };
    let p = policy(
        Effect::Allow,
        json!({"field": "resource.tags", "op": "contains", "value": "high-risk"}),
    );
    assert_eq!(evaluate(&[p], &ctx), Decision::Allow);
}
