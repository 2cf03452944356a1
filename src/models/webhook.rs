use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Webhook {
    pub id: Uuid,
    pub org_id: Uuid,
    pub url: String,
    /// HMAC signing secret, never returned after creation.
    pub secret: String,
    pub event_filter: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Webhook {
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.is_active
            && (self.event_filter.is_empty() || self.event_filter.iter().any(|e| e == event_type))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

/// Deliveries are idempotent per `(webhook_id, invocation_id, event)` so
/// consumers can dedupe a retried delivery (§4.8, §5).
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub invocation_id: Uuid,
    pub event: String,
    pub status: DeliveryStatus,
    pub response_status: Option<i32>,
    pub attempt_count: i32,
    pub latency_ms: Option<i64>,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub fn delivery_dedupe_key(webhook_id: Uuid, invocation_id: Uuid, event: &str) -> String {
    format!("{webhook_id}:{invocation_id}:{event}")
}
