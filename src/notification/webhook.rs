use std::time::Duration;

use anyhow::Result;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::webhook::{DeliveryStatus, Webhook};
use crate::store::postgres::PgStore;

// ── Invocation-lifecycle webhook events ─────────────────────────

/// A structured event payload delivered to consumer webhook URLs (§4.7
/// step 12, §4.8).
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    /// Event type identifier, e.g. "invocation.completed".
    pub event_type: String,
    /// ISO-8601 timestamp of when the event occurred.
    pub timestamp: String,
    pub invocation_id: Uuid,
    pub external_agent_id: Uuid,
    pub org_id: Uuid,
    /// Event-specific details (cost, status, trigger reason, etc.).
    pub details: serde_json::Value,
}

impl WebhookEvent {
    pub fn invocation_completed(
        invocation_id: Uuid,
        external_agent_id: Uuid,
        org_id: Uuid,
        execution_time_ms: i64,
        cost_usd: rust_decimal::Decimal,
    ) -> Self {
        Self {
            event_type: "invocation.completed".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            invocation_id,
            external_agent_id,
            org_id,
            details: serde_json::json!({
                "execution_time_ms": execution_time_ms,
                "cost_usd": cost_usd,
            }),
        }
    }

    pub fn invocation_failed(
        invocation_id: Uuid,
        external_agent_id: Uuid,
        org_id: Uuid,
        reason: &str,
    ) -> Self {
        Self {
            event_type: "invocation.failed".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            invocation_id,
            external_agent_id,
            org_id,
            details: serde_json::json!({ "reason": reason }),
        }
    }

    pub fn approval_requested(
        invocation_id: Uuid,
        external_agent_id: Uuid,
        org_id: Uuid,
        approval_id: Uuid,
        trigger_reason: &str,
    ) -> Self {
        Self {
            event_type: "approval.requested".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            invocation_id,
            external_agent_id,
            org_id,
            details: serde_json::json!({
                "approval_id": approval_id,
                "trigger_reason": trigger_reason,
            }),
        }
    }

    pub fn budget_threshold_crossed(
        invocation_id: Uuid,
        external_agent_id: Uuid,
        org_id: Uuid,
        threshold: rust_decimal::Decimal,
    ) -> Self {
        Self {
            event_type: "budget.threshold_crossed".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            invocation_id,
            external_agent_id,
            org_id,
            details: serde_json::json!({ "threshold": threshold }),
        }
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`.
/// Returns lowercase hex digest (e.g. "sha256=<hex>").
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    let result = mac.finalize();
    let bytes = result.into_bytes();
    format!("sha256={}", hex::encode(bytes))
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Dispatches governance events to subscribed webhook URLs.
/// Supports:
/// - HMAC-SHA256 signing (X-Kaizen-Signature header)
/// - Up to 3 retries with exponential back-off (0s → 1s → 5s → 25s)
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("Kaizen-Webhook/1.0")
                .build()
                .expect("failed to build webhook HTTP client"),
        }
    }

    /// Sends a signed event to a single URL with retry. Returns `Ok` with
    /// the delivering attempt's status code once any attempt succeeds.
    pub async fn send_signed(
        &self,
        url: &str,
        event: &WebhookEvent,
        signing_secret: &str,
    ) -> Result<(i32, i32)> {
        let payload =
            serde_json::to_vec(event).map_err(|e| anyhow::anyhow!("webhook serialize error: {}", e))?;
        let delivery_id = Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = hmac_sha256_hex(signing_secret, &payload);

        let backoff_secs: &[u64] = &[0, 1, 5, 25];

        for (attempt, &delay) in backoff_secs.iter().enumerate() {
            if delay > 0 {
                debug!(
                    url,
                    attempt,
                    delay_secs = delay,
                    event_type = %event.event_type,
                    "retrying webhook delivery"
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-kaizen-delivery-id", &delivery_id)
                .header("x-kaizen-timestamp", &timestamp)
                .header("x-kaizen-event", &event.event_type)
                .header("x-kaizen-signature", signature.as_str())
                .body(payload.clone());

            match req.send().await {
                Ok(resp) if resp.status().is_success() => {
                    let status = resp.status().as_u16();
                    info!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status,
                        "webhook delivered successfully"
                    );
                    return Ok((status as i32, attempt as i32 + 1));
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        %status,
                        body,
                        "webhook delivery failed (non-2xx), will retry"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "webhook request error, will retry"
                    );
                }
            }
        }

        warn!(
            url,
            event_type = %event.event_type,
            delivery_id = %delivery_id,
            "webhook delivery failed after all retries"
        );
        Err(anyhow::anyhow!(
            "webhook delivery failed after 3 retries: {}",
            url
        ))
    }

    /// Fans an event out to every webhook in `org_id` subscribed to its
    /// type (§4.7 step 12), fire-and-forget, recording each delivery
    /// attempt against the idempotent `(webhook_id, invocation_id, event)`
    /// key so retried deliveries don't duplicate for consumers.
    pub async fn dispatch(&self, db: PgStore, webhooks: Vec<Webhook>, invocation_id: Uuid, event: WebhookEvent) {
        let targets: Vec<Webhook> = webhooks
            .into_iter()
            .filter(|w| w.subscribes_to(&event.event_type))
            .collect();
        if targets.is_empty() {
            debug!(event_type = %event.event_type, "no subscribed webhooks, skipping dispatch");
            return;
        }

        let notifier = self.clone();
        tokio::spawn(async move {
            for webhook in targets {
                let started = std::time::Instant::now();
                let result = notifier.send_signed(&webhook.url, &event, &webhook.secret).await;
                let latency_ms = started.elapsed().as_millis() as i64;

                let (status, response_status, attempt_count) = match &result {
                    Ok((code, attempts)) => (DeliveryStatus::Delivered, Some(*code), *attempts),
                    Err(_) => (DeliveryStatus::Failed, None, 4),
                };

                if let Err(e) = db
                    .upsert_webhook_delivery(
                        webhook.id,
                        invocation_id,
                        &event.event_type,
                        status,
                        response_status,
                        attempt_count,
                        Some(latency_ms),
                    )
                    .await
                {
                    warn!(webhook_id = %webhook.id, error = %e, "failed to record webhook delivery");
                }
            }
        });
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_completed_event_type() {
        let event = WebhookEvent::invocation_completed(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            120,
            rust_decimal::Decimal::new(50, 2),
        );
        assert_eq!(event.event_type, "invocation.completed");
        assert_eq!(event.details["execution_time_ms"], 120);
    }

    #[test]
    fn approval_requested_event_type() {
        let approval_id = Uuid::new_v4();
        let event = WebhookEvent::approval_requested(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            approval_id,
            "cost_threshold",
        );
        assert_eq!(event.event_type, "approval.requested");
        assert_eq!(event.details["approval_id"], approval_id.to_string());
    }

    #[test]
    fn event_serializes_to_json() {
        let event = WebhookEvent::invocation_failed(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "timeout",
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("invocation.failed"));
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn hmac_signature_deterministic() {
        let sig1 = hmac_sha256_hex("secret123", b"payload");
        let sig2 = hmac_sha256_hex("secret123", b"payload");
        assert_eq!(sig1, sig2);
        assert!(sig1.starts_with("sha256="));
    }

    #[test]
    fn hmac_signature_different_secret() {
        let sig1 = hmac_sha256_hex("secret1", b"payload");
        let sig2 = hmac_sha256_hex("secret2", b"payload");
        assert_ne!(sig1, sig2);
    }
}
