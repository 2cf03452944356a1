use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum Platform {
    Teams,
    Discord,
    Slack,
    Telegram,
    Notion,
    CustomHttp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum ExternalAgentStatus {
    Active,
    Disabled,
    Deleted,
}

/// `-1` in the rate/budget fields below denotes "unlimited" (§3, §4.5).
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExternalAgent {
    pub id: Uuid,
    pub org_id: Uuid,
    pub workspace_id: Option<Uuid>,
    pub name: String,
    pub platform: Platform,
    pub auth_type: String,
    /// AES-256-GCM envelope ciphertext of the upstream credential bundle.
    pub encrypted_credentials: Vec<u8>,
    pub platform_config: serde_json::Value,
    pub webhook_url: Option<String>,
    pub budget_limit_daily: i64,
    pub budget_limit_monthly: i64,
    pub rate_limit_per_minute: i64,
    pub rate_limit_per_hour: i64,
    pub status: ExternalAgentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExternalAgent {
    pub fn is_invocable(&self) -> bool {
        self.status == ExternalAgentStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum InvocationStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum WebhookDeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

/// One row per invocation attempt; append-only once the row reaches a
/// terminal `status` (§3, §4.7 step 7/9).
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExternalAgentInvocation {
    pub id: Uuid,
    pub org_id: Uuid,
    pub external_agent_id: Uuid,
    pub user_id: Option<Uuid>,
    pub request_payload: serde_json::Value,
    pub request_ip: Option<String>,
    pub request_user_agent: Option<String>,
    pub response_payload: Option<serde_json::Value>,
    pub response_status_code: Option<i32>,
    pub execution_time_ms: Option<i64>,
    pub auth_passed: bool,
    pub budget_passed: bool,
    pub rate_limit_passed: bool,
    pub status: InvocationStatus,
    pub trace_id: String,
    pub webhook_delivery_status: WebhookDeliveryStatus,
    pub invoked_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExternalAgentInvocation {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, InvocationStatus::Success | InvocationStatus::Failed)
    }
}
