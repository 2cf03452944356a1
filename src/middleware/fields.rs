//! ABAC field resolution (§4.3). Conditions reference three namespaces —
//! `subject.*` (the principal), `resource.*` (the thing being acted on) and
//! `environment.*` (request context) — resolved against a `Subject` built by
//! the authenticator and a `ResourceRef` built by the handler.

use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Subject {
    pub user_id: Option<uuid::Uuid>,
    pub org_id: uuid::Uuid,
    pub role: String,
    pub team_ids: Vec<String>,
}

/// Arbitrary extra attributes the handler knows about the resource
/// (`owner_id`, `status`, ...), looked up by bare field name under
/// `resource.*`.
#[derive(Debug, Clone, Default)]
pub struct ResourceRef {
    pub resource_type: String,
    pub attributes: HashMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct Environment {
    pub ip: Option<String>,
    pub time: chrono::DateTime<chrono::Utc>,
}

pub struct EvalContext<'a> {
    pub subject: &'a Subject,
    pub resource: &'a ResourceRef,
    pub environment: &'a Environment,
}

/// Resolves a dotted field path under one of the three namespaces.
/// Unknown prefixes or unknown fields resolve to `None`, which every
/// non-`Ne` operator treats as non-matching (fail-closed, §4.3).
pub fn resolve_field(field: &str, ctx: &EvalContext<'_>) -> Option<Value> {
    let (prefix, rest) = field.split_once('.')?;
    match prefix {
        "subject" => resolve_subject(rest, ctx.subject),
        "resource" => resolve_resource(rest, ctx.resource),
        "environment" => resolve_environment(rest, ctx.environment),
        _ => None,
    }
}

fn resolve_subject(field: &str, subject: &Subject) -> Option<Value> {
    match field {
        "user_id" => subject.user_id.map(|id| Value::String(id.to_string())),
        "org_id" => Some(Value::String(subject.org_id.to_string())),
        "role" => Some(Value::String(subject.role.clone())),
        "team_ids" => Some(Value::Array(
            subject.team_ids.iter().cloned().map(Value::String).collect(),
        )),
        _ => None,
    }
}

fn resolve_resource(field: &str, resource: &ResourceRef) -> Option<Value> {
    if field == "type" {
        return Some(Value::String(resource.resource_type.clone()));
    }
    resource.attributes.get(field).cloned()
}

fn resolve_environment(field: &str, environment: &Environment) -> Option<Value> {
    match field {
        "ip" => environment.ip.clone().map(Value::String),
        "time.hour" => Some(Value::Number(chrono::Timelike::hour(&environment.time).into())),
        "time.weekday" => {
            let name = match chrono::Datelike::weekday(&environment.time) {
                chrono::Weekday::Mon => "mon",
                chrono::Weekday::Tue => "tue",
                chrono::Weekday::Wed => "wed",
                chrono::Weekday::Thu => "thu",
                chrono::Weekday::Fri => "fri",
                chrono::Weekday::Sat => "sat",
                chrono::Weekday::Sun => "sun",
            };
            Some(Value::String(name.to_string()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ctx() -> (Subject, ResourceRef, Environment) {
        let subject = Subject {
            user_id: Some(Uuid::new_v4()),
            org_id: Uuid::new_v4(),
            role: "developer".into(),
            team_ids: vec!["team-a".into()],
        };
        let mut attrs = HashMap::new();
        attrs.insert("owner_id".into(), Value::String("user-1".into()));
        let resource = ResourceRef {
            resource_type: "external_agents".into(),
            attributes: attrs,
        };
        let environment = Environment {
            ip: Some("10.0.0.1".into()),
            time: chrono::Utc::now(),
        };
        (subject, resource, environment)
    }

    #[test]
    fn resolves_subject_role() {
        let (subject, resource, environment) = ctx();
        let ctx = EvalContext { subject: &subject, resource: &resource, environment: &environment };
        assert_eq!(resolve_field("subject.role", &ctx), Some(Value::String("developer".into())));
    }

    #[test]
    fn resolves_resource_attribute() {
        let (subject, resource, environment) = ctx();
        let ctx = EvalContext { subject: &subject, resource: &resource, environment: &environment };
        assert_eq!(resolve_field("resource.owner_id", &ctx), Some(Value::String("user-1".into())));
    }

    #[test]
    fn unknown_namespace_is_none() {
        let (subject, resource, environment) = ctx();
        let ctx = EvalContext { subject: &subject, resource: &resource, environment: &environment };
        assert_eq!(resolve_field("bogus.field", &ctx), None);
    }
}
