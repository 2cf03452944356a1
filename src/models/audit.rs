use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failure,
}

/// Append-only record of a state-changing administrative action
/// (§3, §4.9). Write failures must never fail the triggering request —
/// see `middleware::audit::log_async`.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// HTTP method → audit action, per
/// `original_source/src/studio/middleware/audit_middleware.py`.
pub fn method_to_action(method: &str) -> &'static str {
    match method {
        "POST" => "create",
        "PUT" | "PATCH" => "update",
        "DELETE" => "delete",
        _ => "unknown",
    }
}

/// Parses `resource_type`/`resource_id` out of a request path, stripping
/// the `/api/v1` prefix first. `/api/v1/agents/123` → `("agents",
/// Some("123"))`.
pub fn parse_resource_from_path(path: &str) -> (String, Option<String>) {
    let trimmed = path.strip_prefix("/api/v1").unwrap_or(path);
    let mut segments = trimmed.trim_start_matches('/').split('/').filter(|s| !s.is_empty());
    let resource_type = segments.next().unwrap_or("unknown").to_string();
    let resource_id = segments.next().map(str::to_string);
    (resource_type, resource_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_maps_to_action() {
        assert_eq!(method_to_action("POST"), "create");
        assert_eq!(method_to_action("PUT"), "update");
        assert_eq!(method_to_action("PATCH"), "update");
        assert_eq!(method_to_action("DELETE"), "delete");
    }

    #[test]
    fn parses_resource_type_and_id_from_path() {
        assert_eq!(
            parse_resource_from_path("/api/v1/agents/123"),
            ("agents".to_string(), Some("123".to_string()))
        );
        assert_eq!(
            parse_resource_from_path("/api/v1/agents"),
            ("agents".to_string(), None)
        );
    }
}
