use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum PolicyStatus {
    Active,
    Inactive,
}

/// A per-tenant ABAC policy. Conditions are the JSON DSL described in
/// `Condition` below; evaluation lives in `middleware::abac`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Policy {
    pub id: Uuid,
    pub org_id: Uuid,
    pub resource_type: String,
    pub action: String,
    pub effect: Effect,
    pub conditions: serde_json::Value,
    pub resource_refs: Option<Vec<String>>,
    pub priority: i32,
    pub status: PolicyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    pub fn applies_to(&self, resource_type: &str, action: &str) -> bool {
        self.status == PolicyStatus::Active
            && self.resource_type == resource_type
            && self.action == action
    }

    /// Parses `conditions` into the typed condition tree. Unknown operators
    /// are rejected at load time per the Design Note in SPEC_FULL.md §9.
    pub fn parse_conditions(&self) -> Result<Condition, serde_json::Error> {
        serde_json::from_value(self.conditions.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum PrincipalType {
    User,
    Team,
    Role,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct PolicyAssignment {
    pub policy_id: Uuid,
    pub principal_type: PrincipalType,
    pub principal_id: String,
    pub created_at: DateTime<Utc>,
}

// ── ABAC condition DSL ───────────────────────────────────────────────
//
// { "all": [cond, ...] } | { "any": [cond, ...] } | { "not": cond }
// cond := { "field": "<dotted.path>", "op": "<op>", "value": ... }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    All { all: Vec<Condition> },
    Any { any: Vec<Condition> },
    Not { not: Box<Condition> },
    Check(CheckClause),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckClause {
    pub field: String,
    pub op: Operator,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Ne,
    In,
    Nin,
    Gt,
    Ge,
    Lt,
    Le,
    Regex,
    Contains,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_condition_tree() {
        let raw = serde_json::json!({
            "all": [
                { "field": "environment.ip", "op": "eq", "value": "10.0.0.1" },
                { "not": { "field": "subject.role", "op": "eq", "value": "org_owner" } }
            ]
        });
        let cond: Condition = serde_json::from_value(raw).unwrap();
        match cond {
            Condition::All { all } => assert_eq!(all.len(), 2),
            _ => panic!("expected All"),
        }
    }

    #[test]
    fn rejects_unknown_operator() {
        let raw = serde_json::json!({ "field": "x", "op": "frobnicate", "value": 1 });
        let result: Result<Condition, _> = serde_json::from_value(raw);
        assert!(result.is_err());
    }
}
