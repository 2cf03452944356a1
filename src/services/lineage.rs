//! Assembles and writes `InvocationLineage` rows (§3, §4.9) — the append-
//! only chain from external user through to the external agent's response.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::lineage::{sanitize_snapshot, ExternalIdentity, InvocationLineage};
use crate::store::postgres::PgStore;

pub struct LineageInput<'a> {
    pub invocation_id: Uuid,
    pub identity: &'a ExternalIdentity,
    pub api_key_id: Option<Uuid>,
    pub org_id: Uuid,
    pub team_id: Option<Uuid>,
    pub external_agent_id: Uuid,
    pub endpoint: Option<String>,
    pub trace_id: String,
    pub span_id: Option<String>,
    pub request_payload: &'a serde_json::Value,
    pub response_payload: Option<&'a serde_json::Value>,
    pub cost_usd: Decimal,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub status: String,
    pub budget_before: Option<Decimal>,
    pub budget_after: Option<Decimal>,
    pub approval_id: Option<Uuid>,
    pub approval_status: Option<String>,
}

/// Sanitizes request/response snapshots (secrets never persisted) and
/// writes the row. Must be called even on a failed invocation (§4.7 step
/// 11) for audit completeness.
pub async fn write(db: &PgStore, input: LineageInput<'_>) -> Result<(), AppError> {
    let lineage = InvocationLineage {
        id: input.invocation_id,
        external_user_id: input.identity.user_id.clone(),
        external_user_email: input.identity.user_email.clone(),
        external_user_name: input.identity.user_name.clone(),
        external_system: input.identity.system.clone(),
        external_session_id: input.identity.session_id.clone(),
        api_key_id: input.api_key_id,
        org_id: input.org_id,
        team_id: input.team_id,
        external_agent_id: input.external_agent_id,
        endpoint: input.endpoint,
        trace_id: input.trace_id,
        span_id: input.span_id,
        request_snapshot: sanitize_snapshot(input.request_payload),
        response_snapshot: input.response_payload.map(sanitize_snapshot),
        cost_usd: input.cost_usd,
        input_tokens: input.input_tokens,
        output_tokens: input.output_tokens,
        status: input.status,
        budget_before: input.budget_before,
        budget_after: input.budget_after,
        approval_id: input.approval_id,
        approval_status: input.approval_status,
        created_at: Utc::now(),
    };
    db.insert_lineage(&lineage).await?;
    Ok(())
}
