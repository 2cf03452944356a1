//! Notion database page adapter.
//! Grounded on `studio/adapters/notion_adapter.py::NotionWebhookAdapter`.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{platform_config_str, status_str, DeliveryResult, WebhookAdapter};
use crate::models::external_agent::{ExternalAgent, ExternalAgentInvocation};

const NOTION_VERSION: &str = "2022-06-28";

fn rich_text(text: &str) -> Value {
    json!([{"text": {"content": text}}])
}

pub struct NotionAdapter;

#[async_trait]
impl WebhookAdapter for NotionAdapter {
    fn format_payload(&self, invocation: &ExternalAgentInvocation, agent: &ExternalAgent) -> Value {
        let status = status_str(invocation);
        let database_id = platform_config_str(agent, "database_id").unwrap_or_default();
        let short_id: String = invocation.id.to_string().chars().take(8).collect();

        let mut properties = json!({
            "Name": {"title": [{"text": {"content": short_id}}]},
            "Status": {"select": {"name": status}},
            "Agent ID": {"rich_text": rich_text(&invocation.external_agent_id.to_string())},
            "Invocation ID": {"rich_text": rich_text(&invocation.id.to_string())},
            "Execution Time": {"number": invocation.execution_time_ms.unwrap_or(0)},
            "Invoked At": {"date": {"start": invocation.invoked_at.to_rfc3339()}},
        });

        if let Some(completed_at) = invocation.completed_at {
            properties["Completed At"] = json!({"date": {"start": completed_at.to_rfc3339()}});
        }

        if status == "failed" {
            let message = match invocation.response_status_code {
                Some(code) => format!("Invocation failed with upstream status {code}"),
                None => "Invocation failed before receiving an upstream response".to_string(),
            };
            let message: String = message.chars().take(2000).collect();
            properties["Error Message"] = json!({"rich_text": rich_text(&message)});
        }

        json!({
            "parent": {"database_id": database_id},
            "properties": properties,
        })
    }

    async fn deliver(&self, client: &reqwest::Client, agent: &ExternalAgent, payload: Value) -> DeliveryResult {
        let Some(api_key) = platform_config_str(agent, "api_key") else {
            return DeliveryResult {
                success: false,
                status_code: None,
                error_message: Some("api_key not configured in platform_config".to_string()),
            };
        };
        if platform_config_str(agent, "database_id").is_none() {
            return DeliveryResult {
                success: false,
                status_code: None,
                error_message: Some("database_id not configured in platform_config".to_string()),
            };
        }

        let headers: Vec<(&str, String)> = vec![
            ("Authorization", format!("Bearer {}", api_key)),
            ("Notion-Version", NOTION_VERSION.to_string()),
        ];
        super::execute_http_delivery(client, "https://api.notion.com/v1/pages", &payload, &headers).await
    }
}
