//! Platform webhook adapters (§4.8): turn a terminal `ExternalAgentInvocation`
//! into the platform-native payload shape and deliver it. Each variant is
//! grounded on its Python counterpart in the original implementation's
//! `studio/adapters` package; this module reshapes that into a shared Rust
//! trait over `ExternalAgent::platform_config`.

pub mod discord;
pub mod notion;
pub mod slack;
pub mod teams;
pub mod telegram;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::external_agent::{ExternalAgent, ExternalAgentInvocation, Platform};

pub struct DeliveryResult {
    pub success: bool,
    pub status_code: Option<i32>,
    pub error_message: Option<String>,
}

#[async_trait]
pub trait WebhookAdapter: Send + Sync {
    fn format_payload(&self, invocation: &ExternalAgentInvocation, agent: &ExternalAgent) -> Value;
    async fn deliver(&self, client: &reqwest::Client, agent: &ExternalAgent, payload: Value) -> DeliveryResult;
}

pub fn for_platform(platform: Platform) -> Box<dyn WebhookAdapter> {
    match platform {
        Platform::Teams => Box::new(teams::TeamsAdapter),
        Platform::Discord => Box::new(discord::DiscordAdapter),
        Platform::Slack => Box::new(slack::SlackAdapter),
        Platform::Telegram => Box::new(telegram::TelegramAdapter),
        Platform::Notion => Box::new(notion::NotionAdapter),
        Platform::CustomHttp => Box::new(teams::TeamsAdapter), // generic JSON POST, reuses Teams' plain webhook_url delivery
    }
}

fn platform_config_str<'a>(agent: &'a ExternalAgent, key: &str) -> Option<&'a str> {
    agent.platform_config.get(key).and_then(Value::as_str)
}

fn status_str(invocation: &ExternalAgentInvocation) -> &'static str {
    match invocation.status {
        crate::models::external_agent::InvocationStatus::Pending => "pending",
        crate::models::external_agent::InvocationStatus::Success => "success",
        crate::models::external_agent::InvocationStatus::Failed => "failed",
    }
}

fn studio_base_url(agent: &ExternalAgent) -> String {
    platform_config_str(agent, "studio_base_url")
        .unwrap_or("https://kaizen.studio")
        .to_string()
}

/// POST `payload` to `url` with a 30s timeout and the given extra headers.
/// Adapters share this rather than the HMAC-retry policy in
/// `notification::webhook` — platform endpoints are the delivery target
/// itself, not a consumer-registered webhook, so there's no signing secret
/// and a single attempt is enough; the caller records the result as one
/// `WebhookDelivery` row regardless.
pub(crate) async fn execute_http_delivery(
    client: &reqwest::Client,
    url: &str,
    payload: &Value,
    headers: &[(&str, String)],
) -> DeliveryResult {
    let mut request = client.post(url).timeout(Duration::from_secs(30)).json(payload);
    for (name, value) in headers {
        request = request.header(*name, value.as_str());
    }

    match request.send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                DeliveryResult {
                    success: true,
                    status_code: Some(status.as_u16() as i32),
                    error_message: None,
                }
            } else {
                let body = resp.text().await.unwrap_or_default();
                DeliveryResult {
                    success: false,
                    status_code: Some(status.as_u16() as i32),
                    error_message: Some(body),
                }
            }
        }
        Err(e) => DeliveryResult {
            success: false,
            status_code: None,
            error_message: Some(e.to_string()),
        },
    }
}
