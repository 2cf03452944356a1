//! Discord embed adapter.
//! Grounded on `studio/adapters/discord_adapter.py::DiscordWebhookAdapter`.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{execute_http_delivery, platform_config_str, status_str, studio_base_url, DeliveryResult, WebhookAdapter};
use crate::models::external_agent::{ExternalAgent, ExternalAgentInvocation};

fn embed_color(status: &str) -> i64 {
    match status {
        "success" => 65280,
        "failed" => 16711680,
        _ => 16776960,
    }
}

pub struct DiscordAdapter;

#[async_trait]
impl WebhookAdapter for DiscordAdapter {
    fn format_payload(&self, invocation: &ExternalAgentInvocation, agent: &ExternalAgent) -> Value {
        let status = status_str(invocation);

        let mut fields = vec![
            json!({"name": "Agent ID", "value": invocation.external_agent_id.to_string(), "inline": true}),
            json!({"name": "Invocation ID", "value": invocation.id.to_string(), "inline": true}),
            json!({"name": "Status", "value": status.to_uppercase(), "inline": true}),
            json!({"name": "Execution Time", "value": format!("{}ms", invocation.execution_time_ms.unwrap_or(0)), "inline": true}),
            json!({"name": "Invoked At", "value": invocation.invoked_at.to_rfc3339(), "inline": false}),
        ];
        if let Some(completed_at) = invocation.completed_at {
            fields.push(json!({"name": "Completed At", "value": completed_at.to_rfc3339(), "inline": false}));
        }

        let mut payload = json!({
            "embeds": [{
                "title": format!("External Agent Invocation {}", status.to_uppercase()),
                "color": embed_color(status),
                "url": format!("{}/external-agents/invocations/{}", studio_base_url(agent), invocation.id),
                "fields": fields,
                "footer": {"text": "Kaizen Studio"},
            }],
        });

        if let Some(username) = platform_config_str(agent, "username") {
            payload["username"] = json!(username);
        }
        if let Some(avatar_url) = platform_config_str(agent, "avatar_url") {
            payload["avatar_url"] = json!(avatar_url);
        }

        payload
    }

    async fn deliver(&self, client: &reqwest::Client, agent: &ExternalAgent, payload: Value) -> DeliveryResult {
        let Some(webhook_url) = agent
            .webhook_url
            .as_deref()
            .or_else(|| platform_config_str(agent, "webhook_url"))
        else {
            return DeliveryResult {
                success: false,
                status_code: None,
                error_message: Some("webhook_url not configured".to_string()),
            };
        };
        execute_http_delivery(client, webhook_url, &payload, &[]).await
    }
}
