use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The append-only end-to-end identity+execution record of one
/// invocation (§3, §4.9). `id` equals the owning
/// `ExternalAgentInvocation.id` — exactly one lineage row per terminal
/// invocation (testable property, §8).
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct InvocationLineage {
    pub id: Uuid,

    // Layer 1 — external user (from X-External-* headers).
    pub external_user_id: Option<String>,
    pub external_user_email: Option<String>,
    pub external_user_name: Option<String>,

    // Layer 2 — external system / session.
    pub external_system: Option<String>,
    pub external_session_id: Option<String>,

    // Layer 3 — API key / org / team.
    pub api_key_id: Option<Uuid>,
    pub org_id: Uuid,
    pub team_id: Option<Uuid>,

    // Layer 4 — external agent / endpoint invoked.
    pub external_agent_id: Uuid,
    pub endpoint: Option<String>,

    // Layer 5 — distributed trace.
    pub trace_id: String,
    pub span_id: Option<String>,

    /// Sanitized (PII-scrubbed) snapshots, never the raw payloads.
    pub request_snapshot: serde_json::Value,
    pub response_snapshot: Option<serde_json::Value>,

    pub cost_usd: rust_decimal::Decimal,
    pub input_tokens: i64,
    pub output_tokens: i64,

    pub status: String,

    pub budget_before: Option<rust_decimal::Decimal>,
    pub budget_after: Option<rust_decimal::Decimal>,

    pub approval_id: Option<Uuid>,
    pub approval_status: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Identity captured from the `X-External-*` invocation headers (§4.7
/// step 2, §6). Fields besides the required three are optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalIdentity {
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    pub system: Option<String>,
    pub session_id: Option<String>,
    pub trace_id: Option<String>,
    pub context: Option<serde_json::Value>,
}

/// Strips fields that look like secrets/PII before a request or response
/// body is persisted into a lineage snapshot or an audit log. This is a
/// conservative denylist, not a full PII classifier.
pub fn sanitize_snapshot(value: &serde_json::Value) -> serde_json::Value {
    const SENSITIVE_KEYS: &[&str] = &[
        "password",
        "secret",
        "token",
        "api_key",
        "authorization",
        "client_secret",
        "encrypted_credentials",
    ];

    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if SENSITIVE_KEYS
                    .iter()
                    .any(|s| k.to_lowercase().contains(s))
                {
                    out.insert(k.clone(), serde_json::Value::String("[redacted]".into()));
                } else {
                    out.insert(k.clone(), sanitize_snapshot(v));
                }
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sanitize_snapshot).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_redacts_nested_secret_fields() {
        let raw = json!({
            "user": "jack",
            "auth": { "password": "hunter2", "api_key": "sk_live_xyz" },
            "items": [{ "token": "abc" }, { "ok": true }],
        });
        let clean = sanitize_snapshot(&raw);
        assert_eq!(clean["auth"]["password"], json!("[redacted]"));
        assert_eq!(clean["auth"]["api_key"], json!("[redacted]"));
        assert_eq!(clean["items"][0]["token"], json!("[redacted]"));
        assert_eq!(clean["items"][1]["ok"], json!(true));
        assert_eq!(clean["user"], json!("jack"));
    }
}
