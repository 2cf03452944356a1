//! Slack Block Kit adapter.
//! Grounded on `studio/adapters/slack_adapter.py::SlackWebhookAdapter`.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{execute_http_delivery, platform_config_str, status_str, studio_base_url, DeliveryResult, WebhookAdapter};
use crate::models::external_agent::{ExternalAgent, ExternalAgentInvocation};

fn status_emoji(status: &str) -> &'static str {
    match status {
        "success" => ":white_check_mark:",
        "failed" => ":x:",
        _ => ":hourglass_flowing_sand:",
    }
}

pub struct SlackAdapter;

#[async_trait]
impl WebhookAdapter for SlackAdapter {
    fn format_payload(&self, invocation: &ExternalAgentInvocation, agent: &ExternalAgent) -> Value {
        let status = status_str(invocation);
        let emoji = status_emoji(status);

        let mut detail_lines = vec![
            format!("*Agent ID:*\n{}", invocation.external_agent_id),
            format!("*Invocation ID:*\n{}", invocation.id),
            format!("*Status:*\n{}", status.to_uppercase()),
            format!("*Execution Time:*\n{}ms", invocation.execution_time_ms.unwrap_or(0)),
            format!("*Invoked At:*\n{}", invocation.invoked_at.to_rfc3339()),
        ];
        if let Some(completed_at) = invocation.completed_at {
            detail_lines.push(format!("*Completed At:*\n{}", completed_at.to_rfc3339()));
        }

        let view_url = format!("{}/external-agents/invocations/{}", studio_base_url(agent), invocation.id);

        json!({
            "text": format!("{} External Agent Invocation {}", emoji, status.to_uppercase()),
            "blocks": [
                {
                    "type": "header",
                    "text": {"type": "plain_text", "text": format!("{} Invocation {}", emoji, status.to_uppercase())},
                },
                {
                    "type": "section",
                    "fields": detail_lines.iter().map(|l| json!({"type": "mrkdwn", "text": l})).collect::<Vec<_>>(),
                },
                {"type": "divider"},
                {
                    "type": "actions",
                    "elements": [{
                        "type": "button",
                        "text": {"type": "plain_text", "text": "View Invocation"},
                        "url": view_url,
                    }],
                },
                {
                    "type": "context",
                    "elements": [{"type": "mrkdwn", "text": "Kaizen Studio"}],
                },
            ],
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
