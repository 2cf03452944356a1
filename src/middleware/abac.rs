//! ABAC policy evaluation (§4.3). Generalizes the condition evaluator in
//! `middleware::engine` to the `models::policy::{Condition, Operator}` DSL
//! and the `subject.*`/`resource.*`/`environment.*` namespaces in
//! `middleware::fields`.

use regex::Regex;
use serde_json::Value;

use crate::models::policy::{CheckClause, Condition, Effect, Operator, Policy};

use super::fields::{resolve_field, EvalContext};

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
    /// No policy applied to this `(resource_type, action)` pair.
    NotApplicable,
}

/// Evaluates every policy in priority order (callers must pass them
/// pre-sorted descending, as `PgStore::active_policies_for` does) and
/// combines with deny-overrides-allow: any matching `Deny` wins regardless
/// of priority or ordering, per §4.3.
pub fn evaluate(policies: &[Policy], ctx: &EvalContext<'_>) -> Decision {
    let mut allowed = false;

    for policy in policies {
        let condition = match policy.parse_conditions() {
            Ok(c) => c,
            // Fail-closed: an unparsable stored condition can never grant access.
            Err(_) => {
                if policy.effect == Effect::Deny {
                    return Decision::Deny {
                        reason: "policy condition failed to parse".into(),
                    };
                }
                continue;
            }
        };

        if evaluate_condition(&condition, ctx) {
            match policy.effect {
                Effect::Deny => {
                    return Decision::Deny {
                        reason: format!("denied by policy {}", policy.id),
                    };
                }
                Effect::Allow => allowed = true,
            }
        }
    }

    // No deny matched. An allow policy narrows nothing further here; when
    // none matched either, the resource simply has no applicable policy
    // and falls back to whatever RBAC already decided (§8 scenario 3).
    if allowed {
        Decision::Allow
    } else {
        Decision::NotApplicable
    }
}

fn evaluate_condition(condition: &Condition, ctx: &EvalContext<'_>) -> bool {
    match condition {
        Condition::All { all } => all.iter().all(|c| evaluate_condition(c, ctx)),
        Condition::Any { any } => any.iter().any(|c| evaluate_condition(c, ctx)),
        Condition::Not { not } => !evaluate_condition(not, ctx),
        Condition::Check(clause) => evaluate_check(clause, ctx),
    }
}

fn evaluate_check(clause: &CheckClause, ctx: &EvalContext<'_>) -> bool {
    let resolved = resolve_field(&clause.field, ctx);
    match clause.op {
        Operator::Ne => !resolved.map_or(false, |v| values_equal(&v, &clause.value)),
        _ => {
            let Some(actual) = resolved else { return false };
            match clause.op {
                Operator::Eq => values_equal(&actual, &clause.value),
                Operator::Ne => unreachable!(),
                Operator::In => as_array(&clause.value).map_or(false, |arr| arr.iter().any(|v| values_equal(&actual, v))),
                Operator::Nin => as_array(&clause.value).map_or(true, |arr| !arr.iter().any(|v| values_equal(&actual, v))),
                Operator::Gt => compare_numeric(&actual, &clause.value, |a, b| a > b),
                Operator::Ge => compare_numeric(&actual, &clause.value, |a, b| a >= b),
                Operator::Lt => compare_numeric(&actual, &clause.value, |a, b| a < b),
                Operator::Le => compare_numeric(&actual, &clause.value, |a, b| a <= b),
                Operator::Regex => as_str(&actual)
                    .zip(as_str(&clause.value))
                    .and_then(|(text, pat)| compile_safe(&pat).map(|re| re.is_match(&text)))
                    .unwrap_or(false),
                Operator::Contains => match &actual {
                    Value::String(s) => as_str(&clause.value).map_or(false, |needle| s.contains(&needle)),
                    Value::Array(items) => items.iter().any(|v| values_equal(v, &clause.value)),
                    _ => false,
                },
            }
        }
    }
}

fn compile_safe(pattern: &str) -> Option<Regex> {
    regex::RegexBuilder::new(pattern).size_limit(1_000_000).build().ok()
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => s
            .parse::<f64>()
            .ok()
            .zip(n.as_f64())
            .map_or(false, |(x, y)| (x - y).abs() < f64::EPSILON),
        _ => false,
    }
}

fn compare_numeric(actual: &Value, expected: &Value, cmp: fn(f64, f64) -> bool) -> bool {
    as_f64(actual).zip(as_f64(expected)).map_or(false, |(a, b)| cmp(a, b))
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_str(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_array(v: &Value) -> Option<&Vec<Value>> {
    v.as_array()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::fields::{Environment, ResourceRef, Subject};
    use crate::models::policy::PolicyStatus;
    use serde_json::json;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn ctx(role: &str) -> (Subject, ResourceRef, Environment) {
        let subject = Subject {
            user_id: Some(Uuid::new_v4()),
            org_id: Uuid::new_v4(),
            role: role.into(),
            team_ids: vec![],
        };
        let resource = ResourceRef {
            resource_type: "external_agents".into(),
            attributes: HashMap::new(),
        };
        let environment = Environment { ip: Some("10.0.0.1".into()), time: chrono::Utc::now() };
        (subject, resource, environment)
    }

    fn policy(effect: Effect, conditions: Value) -> Policy {
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

    #[test]
    fn allow_policy_matching_grants_access() {
        let (subject, resource, environment) = ctx("developer");
        let eval_ctx = EvalContext { subject: &subject, resource: &resource, environment: &environment };
        let p = policy(Effect::Allow, json!({"field": "subject.role", "op": "eq", "value": "developer"}));
        assert_eq!(evaluate(&[p], &eval_ctx), Decision::Allow);
    }

    #[test]
    fn deny_overrides_allow_regardless_of_order() {
        let (subject, resource, environment) = ctx("developer");
        let eval_ctx = EvalContext { subject: &subject, resource: &resource, environment: &environment };
        let allow = policy(Effect::Allow, json!({"field": "subject.role", "op": "eq", "value": "developer"}));
        let deny = policy(Effect::Deny, json!({"field": "subject.role", "op": "eq", "value": "developer"}));
        assert!(matches!(evaluate(&[allow, deny], &eval_ctx), Decision::Deny { .. }));
    }

    #[test]
    fn no_policies_is_not_applicable() {
        let (subject, resource, environment) = ctx("developer");
        let eval_ctx = EvalContext { subject: &subject, resource: &resource, environment: &environment };
        assert_eq!(evaluate(&[], &eval_ctx), Decision::NotApplicable);
    }

    #[test]
    fn non_matching_allow_is_not_applicable() {
        let (subject, resource, environment) = ctx("viewer");
        let eval_ctx = EvalContext { subject: &subject, resource: &resource, environment: &environment };
        let p = policy(Effect::Allow, json!({"field": "subject.role", "op": "eq", "value": "developer"}));
        assert_eq!(evaluate(&[p], &eval_ctx), Decision::NotApplicable);
    }

    #[test]
    fn non_matching_deny_is_not_applicable() {
        // §8 scenario 3: a deny policy keyed on a specific IP must not
        // affect callers from a different IP — RBAC's decision stands.
        let (subject, resource, environment) = ctx("viewer");
        let eval_ctx = EvalContext { subject: &subject, resource: &resource, environment: &environment };
        let p = policy(
            Effect::Deny,
            json!({"field": "environment.ip", "op": "eq", "value": "10.0.0.2"}),
        );
        assert_eq!(evaluate(&[p], &eval_ctx), Decision::NotApplicable);
    }
}
