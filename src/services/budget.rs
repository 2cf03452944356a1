//! Budget pre-check / post-record orchestration (§4.5).
//!
//! Pure decision logic lives in `models::budget`; this module is the I/O
//! shell around it — fetch the configured budget and the period's usage
//! aggregate, then hand both to `check_budget`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::budget::{check_budget, current_period, estimate_cost, BudgetDecision};
use crate::store::postgres::PgStore;

pub struct BudgetCheck {
    pub decision: BudgetDecision,
    pub estimated_cost: Decimal,
    pub budget_before: Decimal,
}

/// Pre-check before dispatch (§4.7 step 5). An agent with no configured
/// budget row enforces nothing — `None` signals "unlimited", distinct from
/// the `-1` sentinel used once a `Budget` row exists.
pub async fn pre_check(
    db: &PgStore,
    external_agent_id: Uuid,
    input_tokens: i64,
    output_tokens: i64,
    now: DateTime<Utc>,
) -> Result<Option<BudgetCheck>, AppError> {
    let Some(budget) = db.get_budget(external_agent_id).await? else {
        return Ok(None);
    };

    let period = current_period(budget.period, now);
    let usage = db
        .usage_in_period(external_agent_id, period.starts_at, period.ends_at)
        .await?;
    let estimated_cost = estimate_cost(&budget, input_tokens, output_tokens);
    let decision = check_budget(&budget, &usage, estimated_cost, input_tokens + output_tokens);

    Ok(Some(BudgetCheck {
        decision,
        estimated_cost,
        budget_before: usage.cost,
    }))
}

/// Records actual usage after dispatch (§4.7 step 10) regardless of the
/// invocation's terminal status, for audit completeness.
pub async fn record_usage(
    db: &PgStore,
    org_id: Uuid,
    external_agent_id: Uuid,
    actual_cost: Decimal,
    total_tokens: i64,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let unit_cost = if total_tokens > 0 {
        actual_cost / Decimal::from(total_tokens)
    } else {
        Decimal::ZERO
    };

    let record = crate::models::budget::UsageRecord {
        id: Uuid::new_v4(),
        org_id,
        external_agent_id,
        resource_type: "invocation".to_string(),
        quantity: Decimal::from(total_tokens),
        unit: "token".to_string(),
        unit_cost,
        total_cost: actual_cost,
        recorded_at: now,
    };
    db.insert_usage_record(&record).await?;
    Ok(())
}
