//! Microsoft Teams Adaptive Card v1.5 adapter.
//! Grounded on `studio/adapters/teams_adapter.py::TeamsWebhookAdapter`.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{execute_http_delivery, platform_config_str, status_str, studio_base_url, DeliveryResult, WebhookAdapter};
use crate::models::external_agent::{ExternalAgent, ExternalAgentInvocation};

fn theme_color(status: &str) -> &'static str {
    match status {
        "success" => "0076D7",
        "failed" => "D13438",
        _ => "FFB900",
    }
}

pub struct TeamsAdapter;

#[async_trait]
impl WebhookAdapter for TeamsAdapter {
    fn format_payload(&self, invocation: &ExternalAgentInvocation, agent: &ExternalAgent) -> Value {
        let status = status_str(invocation);

        let mut facts = vec![
            json!({"name": "Agent ID", "value": invocation.external_agent_id}),
            json!({"name": "Invocation ID", "value": invocation.id}),
            json!({"name": "Status", "value": status.to_uppercase()}),
            json!({"name": "Execution Time", "value": format!("{}ms", invocation.execution_time_ms.unwrap_or(0))}),
            json!({"name": "Invoked At", "value": invocation.invoked_at.to_rfc3339()}),
        ];
        if let Some(completed_at) = invocation.completed_at {
            facts.push(json!({"name": "Completed At", "value": completed_at.to_rfc3339()}));
        }

        json!({
            "@type": "MessageCard",
            "@context": "http://schema.org/extensions",
            "themeColor": theme_color(status),
            "summary": format!("Agent Invocation {}", status.to_uppercase()),
            "sections": [{
                "activityTitle": "External Agent Invocation",
                "activitySubtitle": format!("Status: {}", status.to_uppercase()),
                "facts": facts,
                "markdown": true,
            }],
            "potentialAction": [{
                "@type": "OpenUri",
                "name": "View Invocation",
                "targets": [{
                    "os": "default",
                    "uri": format!("{}/external-agents/invocations/{}", studio_base_url(agent), invocation.id),
                }],
            }],
        })
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
