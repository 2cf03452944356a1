//! Telegram Bot API adapter.
//! Grounded on `studio/adapters/telegram_adapter.py::TelegramWebhookAdapter`.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{platform_config_str, status_str, studio_base_url, DeliveryResult, WebhookAdapter};
use crate::models::external_agent::{ExternalAgent, ExternalAgentInvocation};

const ESCAPE_CHARS: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if ESCAPE_CHARS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub struct TelegramAdapter;

#[async_trait]
impl WebhookAdapter for TelegramAdapter {
    fn format_payload(&self, invocation: &ExternalAgentInvocation, agent: &ExternalAgent) -> Value {
        let status = status_str(invocation);

        let mut lines = vec![
            format!("*External Agent Invocation {}*", escape_markdown_v2(&status.to_uppercase())),
            format!("Agent ID: `{}`", invocation.external_agent_id),
            format!("Invocation ID: `{}`", invocation.id),
            format!("Status: {}", escape_markdown_v2(&status.to_uppercase())),
            format!(
                "Execution Time: {}",
                escape_markdown_v2(&format!("{}ms", invocation.execution_time_ms.unwrap_or(0)))
            ),
            format!("Invoked At: {}", escape_markdown_v2(&invocation.invoked_at.to_rfc3339())),
        ];
        if let Some(completed_at) = invocation.completed_at {
            lines.push(format!("Completed At: {}", escape_markdown_v2(&completed_at.to_rfc3339())));
        }

        let view_url = format!("{}/external-agents/invocations/{}", studio_base_url(agent), invocation.id);

        json!({
            "text": lines.join("\n"),
            "parse_mode": "MarkdownV2",
            "reply_markup": {
                "inline_keyboard": [[{"text": "View Invocation", "url": view_url}]],
            },
        })
    }

    async fn deliver(&self, client: &reqwest::Client, agent: &ExternalAgent, payload: Value) -> DeliveryResult {
        let (Some(bot_token), Some(chat_id)) = (
            platform_config_str(agent, "bot_token"),
            platform_config_str(agent, "chat_id"),
        ) else {
            return DeliveryResult {
                success: false,
                status_code: None,
                error_message: Some("bot_token and chat_id must be set in platform_config".to_string()),
            };
        };

        let url = format!("https://api.telegram.org/bot{}/sendMessage", bot_token);
        let mut body = payload;
        body["chat_id"] = json!(chat_id);

        super::execute_http_delivery(client, &url, &body, &[]).await
    }
}
