//! External-Agent Invocation Pipeline (§4.7) — steps 3-12. Steps 1 (auth)
//! and 2 (external identity extraction) already ran as middleware by the
//! time a handler calls [`invoke`]; everything here runs in the ordering
//! §4.7/§5 require: RBAC+ABAC, rate limit, budget pre-check, approval gate,
//! invocation-row write, dispatch, completion, usage + lineage writes,
//! webhook fan-out.
//!
//! Generalizes the donor's `proxy::handler` request-forwarding sequence
//! (upstream dispatch with a bounded timeout, HTTP status capture) from a
//! single configured upstream per token into per-`ExternalAgent::platform`
//! dispatch.

use std::time::{Duration, Instant};

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use crate::cache::TieredCache;
use crate::errors::AppError;
use crate::middleware::abac::{self, Decision as AbacDecision};
use crate::middleware::auth::AuthContext;
use crate::middleware::fields::{Environment, EvalContext, ResourceRef, Subject};
use crate::models::external_agent::{ExternalAgent, ExternalAgentInvocation, InvocationStatus};
use crate::models::lineage::ExternalIdentity;
use crate::notification::webhook::{WebhookEvent, WebhookNotifier};
use crate::services::{approval, budget, lineage, rate_limit};
use crate::store::postgres::PgStore;
use crate::vault::builtin::VaultCrypto;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);
/// Cost (USD) above which an invocation requires approval, per §4.6's
/// "cost > threshold" trigger. Distinct from a budget's own thresholds,
/// which gate warnings rather than approval.
const APPROVAL_COST_TRIGGER: Decimal = Decimal::from_parts(500, 0, 0, false, 2); // 5.00

pub struct InvokeRequest {
    pub external_agent_id: Uuid,
    pub endpoint: Option<String>,
    pub request_payload: Value,
    pub request_ip: Option<String>,
    pub request_user_agent: Option<String>,
    /// Present when the client is re-invoking after an `ApprovalPending`
    /// response with the approval's id (§4.7 step 6).
    pub approval_id: Option<Uuid>,
}

pub enum InvokeOutcome {
    Completed(ExternalAgentInvocation),
    /// Step 6 triggered a new approval gate; nothing was dispatched.
    ApprovalRequired { approval_id: Uuid },
}

pub async fn invoke(
    db: &PgStore,
    cache: &TieredCache,
    vault: &VaultCrypto,
    http: &reqwest::Client,
    notifier: &WebhookNotifier,
    ctx: &AuthContext,
    identity: &ExternalIdentity,
    req: InvokeRequest,
) -> Result<InvokeOutcome, AppError> {
    let agent = db
        .get_external_agent(req.external_agent_id, ctx.org_id)
        .await?
        .ok_or_else(|| AppError::NotFound("external agent not found".into()))?;

    if !agent.is_invocable() {
        return Err(AppError::Forbidden("external agent is not active".into()));
    }

    // Step 3 — RBAC already checked by the handler via `ctx.has_permission`
    // before calling here; ABAC runs against the agent as the resource.
    check_abac(db, ctx, &agent, req.request_ip.as_deref()).await?;

    // Step 4 — rate limit, keyed by the target agent.
    let caller_key = ctx
        .user_id
        .map(|id| format!("user:{id}"))
        .or_else(|| ctx.api_key_id.map(|id| format!("key:{id}")))
        .unwrap_or_else(|| "anonymous".to_string());
    rate_limit::check(cache, &agent, &caller_key).await?;

    // Step 5 — estimate cost, budget pre-check.
    let (input_tokens, output_tokens) = estimate_tokens(&req.request_payload);
    let now = Utc::now();
    let pre = budget::pre_check(db, agent.id, input_tokens, output_tokens, now).await?;
    let estimated_cost = pre.as_ref().map(|c| c.estimated_cost).unwrap_or(Decimal::ZERO);
    let budget_before = pre.as_ref().map(|c| c.budget_before);

    if let Some(check) = &pre {
        if let crate::models::budget::BudgetDecision::Deny { reason } = &check.decision {
            return Err(AppError::BudgetExceeded {
                reason: reason.clone(),
            });
        }
    }

    // Step 7 — write the invocation row before the approval gate and
    // before dispatch, so a crash mid-pipeline still leaves a record and
    // an approval request has a real invocation to reference.
    let trace_id = Uuid::new_v4().to_string();
    let pending = ExternalAgentInvocation {
        id: Uuid::new_v4(),
        org_id: ctx.org_id,
        external_agent_id: agent.id,
        user_id: ctx.user_id,
        request_payload: req.request_payload.clone(),
        request_ip: req.request_ip.clone(),
        request_user_agent: req.request_user_agent.clone(),
        response_payload: None,
        response_status_code: None,
        execution_time_ms: None,
        auth_passed: true,
        budget_passed: true,
        rate_limit_passed: true,
        status: InvocationStatus::Pending,
        trace_id: trace_id.clone(),
        webhook_delivery_status: crate::models::external_agent::WebhookDeliveryStatus::Pending,
        invoked_at: now,
        completed_at: None,
    };
    let invocation = db.insert_invocation(&pending).await?;

    // Step 6 — approval gate. Either resume an already-approved request or
    // trigger a new one against the invocation just written.
    if let Some(approval_id) = req.approval_id {
        let approved = db
            .get_approval(approval_id, ctx.org_id)
            .await?
            .ok_or_else(|| AppError::NotFound("approval request not found".into()))?;
        match approved.status {
            crate::models::approval::ApprovalStatus::Approved => {}
            crate::models::approval::ApprovalStatus::Pending => {
                return Ok(InvokeOutcome::ApprovalRequired { approval_id });
            }
            crate::models::approval::ApprovalStatus::Rejected => return Err(AppError::ApprovalRejected),
            crate::models::approval::ApprovalStatus::Expired => return Err(AppError::ApprovalExpired),
        }
    } else if requires_approval(estimated_cost, &agent) {
        let Some(user_id) = ctx.user_id else {
            return Err(AppError::Forbidden(
                "approval-gated invocation requires a user principal".into(),
            ));
        };
        let request = approval::request_approval(
            db,
            ctx.org_id,
            invocation.id,
            user_id,
            "cost_threshold",
            serde_json::json!({ "estimated_cost": estimated_cost, "external_agent_id": agent.id }),
        )
        .await?;
        if let Ok(webhooks) = db.list_webhooks(ctx.org_id).await {
            notifier
                .dispatch(
                    db.clone(),
                    webhooks,
                    invocation.id,
                    WebhookEvent::approval_requested(invocation.id, agent.id, ctx.org_id, request.id, "cost_threshold"),
                )
                .await;
        }
        return Ok(InvokeOutcome::ApprovalRequired {
            approval_id: request.id,
        });
    }

    // Step 8 — dispatch to the platform endpoint.
    let started = Instant::now();
    let dispatch_result = dispatch(vault, http, &agent, &req).await;
    let execution_time_ms = started.elapsed().as_millis() as i64;

    let (status, response_payload, response_status_code) = match &dispatch_result {
        Ok((code, body)) => (InvocationStatus::Success, Some(body.clone()), Some(*code as i32)),
        Err(_) => (InvocationStatus::Failed, None, None),
    };

    // Step 9 — mark the invocation terminal.
    db.complete_invocation(
        invocation.id,
        status,
        response_payload.clone(),
        response_status_code,
        execution_time_ms,
    )
    .await?;

    // Steps 10/11 run even on failure, for audit completeness.
    let actual_cost = estimated_cost; // no usage-based re-pricing signal from the upstream in this pipeline
    let total_tokens = input_tokens + output_tokens;
    budget::record_usage(db, ctx.org_id, agent.id, actual_cost, total_tokens, Utc::now()).await?;

    let budget_after = budget_before.map(|b| b + actual_cost);
    lineage::write(
        db,
        lineage::LineageInput {
            invocation_id: invocation.id,
            identity,
            api_key_id: ctx.api_key_id,
            org_id: ctx.org_id,
            team_id: None,
            external_agent_id: agent.id,
            endpoint: req.endpoint,
            trace_id,
            span_id: None,
            request_payload: &req.request_payload,
            response_payload: response_payload.as_ref(),
            cost_usd: actual_cost,
            input_tokens,
            output_tokens,
            status: status_label(status).to_string(),
            budget_before,
            budget_after,
            approval_id: req.approval_id,
            approval_status: req.approval_id.map(|_| "approved".to_string()),
        },
    )
    .await?;

    // Step 12 — enqueue webhook deliveries. Fire-and-forget: a notifier
    // failure must never delay or fail the response already decided (§5).
    let webhook_event = match status {
        InvocationStatus::Success => {
            WebhookEvent::invocation_completed(invocation.id, agent.id, ctx.org_id, execution_time_ms, actual_cost)
        }
        _ => WebhookEvent::invocation_failed(invocation.id, agent.id, ctx.org_id, "upstream dispatch failed"),
    };
    if let Ok(webhooks) = db.list_webhooks(ctx.org_id).await {
        notifier.dispatch(db.clone(), webhooks, invocation.id, webhook_event).await;
    }

    let mut completed = invocation;
    completed.status = status;
    completed.response_payload = response_payload;
    completed.response_status_code = response_status_code;
    completed.execution_time_ms = Some(execution_time_ms);
    completed.completed_at = Some(Utc::now());

    // Step 12 also pushes the terminal invocation back to the agent's own
    // platform (Teams/Discord/Slack/Telegram/Notion), separate from the
    // consumer `Webhook` fan-out above: this is the agent's configured
    // notification target, not a subscriber. Also fire-and-forget.
    let adapter = crate::notification::adapters::for_platform(agent.platform);
    let adapter_payload = adapter.format_payload(&completed, &agent);
    let http = http.clone();
    let db = db.clone();
    let invocation_id = completed.id;
    tokio::spawn(async move {
        let result = adapter.deliver(&http, &agent, adapter_payload).await;
        let delivery_status = if result.success {
            crate::models::external_agent::WebhookDeliveryStatus::Delivered
        } else {
            crate::models::external_agent::WebhookDeliveryStatus::Failed
        };
        let _ = db.update_invocation_webhook_status(invocation_id, delivery_status).await;
    });

    Ok(InvokeOutcome::Completed(completed))
}

async fn check_abac(
    db: &PgStore,
    ctx: &AuthContext,
    agent: &ExternalAgent,
    request_ip: Option<&str>,
) -> Result<(), AppError> {
    let policies = db
        .active_policies_for(ctx.org_id, "external_agents", "invoke")
        .await?;
    if policies.is_empty() {
        return Ok(());
    }

    let role_label = match &ctx.principal {
        crate::middleware::auth::Principal::Role(role) => role.as_str().to_string(),
        crate::middleware::auth::Principal::ApiKeyScopes(_) => "api_key".to_string(),
    };
    let subject = Subject {
        user_id: ctx.user_id,
        org_id: ctx.org_id,
        role: role_label,
        team_ids: Vec::new(),
    };
    let mut attributes = std::collections::HashMap::new();
    attributes.insert("status".to_string(), serde_json::json!(agent.status));
    attributes.insert("platform".to_string(), serde_json::json!(agent.platform));
    let resource = ResourceRef {
        resource_type: "external_agents".to_string(),
        attributes,
    };
    let environment = Environment {
        ip: request_ip.map(str::to_string),
        time: Utc::now(),
    };
    let eval_ctx = EvalContext {
        subject: &subject,
        resource: &resource,
        environment: &environment,
    };

    match abac::evaluate(&policies, &eval_ctx) {
        AbacDecision::Allow | AbacDecision::NotApplicable => Ok(()),
        AbacDecision::Deny { reason } => Err(AppError::ForbiddenByPolicy {
            resource_type: "external_agents".to_string(),
            action: reason,
        }),
    }
}

fn requires_approval(estimated_cost: Decimal, agent: &ExternalAgent) -> bool {
    estimated_cost > APPROVAL_COST_TRIGGER || agent.budget_limit_daily == 0
}

/// Rough token estimate from the request payload's serialized size, used
/// only when the platform doesn't report usage back (most webhook-style
/// external agents don't); 4 bytes/token is the conventional rule of thumb.
fn estimate_tokens(payload: &Value) -> (i64, i64) {
    let input_tokens = (payload.to_string().len() as i64 / 4).max(1);
    (input_tokens, 0)
}

async fn dispatch(
    vault: &VaultCrypto,
    http: &reqwest::Client,
    agent: &ExternalAgent,
    req: &InvokeRequest,
) -> Result<(u16, Value), AppError> {
    let credential = vault
        .decrypt_from_blob(&agent.encrypted_credentials)
        .map_err(AppError::Internal)?;

    let url = agent
        .webhook_url
        .clone()
        .ok_or_else(|| AppError::Conflict("external agent has no configured endpoint".into()))?;

    let mut request = http.post(&url).json(&req.request_payload);
    request = match agent.auth_type.as_str() {
        "bearer" => request.bearer_auth(&credential),
        "header" => request.header("authorization", &credential),
        _ => request.bearer_auth(&credential),
    };

    let response = tokio::time::timeout(UPSTREAM_TIMEOUT, request.send())
        .await
        .map_err(|_| AppError::UpstreamFailed)?
        .map_err(|_| AppError::UpstreamFailed)?;

    let status = response.status().as_u16();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    Ok((status, body))
}

fn status_label(status: InvocationStatus) -> &'static str {
    match status {
        InvocationStatus::Pending => "pending",
        InvocationStatus::Success => "success",
        InvocationStatus::Failed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_trigger_fires_above_cost_threshold() {
        let agent = test_agent();
        assert!(requires_approval(Decimal::from(10), &agent));
        assert!(!requires_approval(Decimal::from_parts(100, 0, 0, false, 2), &agent));
    }

    fn test_agent() -> ExternalAgent {
        ExternalAgent {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            workspace_id: None,
            name: "test".into(),
            platform: crate::models::external_agent::Platform::CustomHttp,
            auth_type: "bearer".into(),
            encrypted_credentials: vec![],
            platform_config: serde_json::json!({}),
            webhook_url: None,
            budget_limit_daily: 100,
            budget_limit_monthly: 1000,
            rate_limit_per_minute: 10,
            rate_limit_per_hour: 100,
            status: crate::models::external_agent::ExternalAgentStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
