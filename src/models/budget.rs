use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::external_agent::UNLIMITED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum EnforcementMode {
    Hard,
    Soft,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Budget {
    pub external_agent_id: Uuid,
    pub period: Period,
    /// `-1` (see `UNLIMITED`) bypasses that dimension.
    pub max_cost_per_period: rust_decimal::Decimal,
    pub max_tokens_per_period: i64,
    pub max_invocations_per_period: i64,
    /// Ascending fractions of the limit that trigger a warning signal,
    /// e.g. `[0.50, 0.75, 0.90, 1.00]`.
    pub thresholds: Vec<f64>,
    pub enforcement_mode: EnforcementMode,
    pub rollover_unused: bool,
    pub input_token_rate: rust_decimal::Decimal,
    pub output_token_rate: rust_decimal::Decimal,
    pub base_cost_per_invocation: rust_decimal::Decimal,
    /// IANA timezone name the period boundaries are computed in.
    pub timezone: String,
}

/// `[start, end)` half-open period boundary, computed in the budget's
/// configured timezone but represented as UTC instants — this keeps the
/// storage layer UTC-aware end-to-end per the Design Note in SPEC_FULL.md
/// §9, while still producing calendar-correct boundaries. Computed fresh
/// on every check rather than cached, so a DST shift in the configured
/// zone is absorbed automatically instead of invalidating a stored value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BillingPeriod {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl BillingPeriod {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.starts_at && at < self.ends_at
    }
}

/// Computes the current billing period boundary for `period`, anchored at
/// `now` (assumed already converted into the agent's local offset by the
/// caller; this crate treats the supplied `now` as already-local-wall-
/// clock-equivalent UTC, i.e. DST-naive arithmetic on calendar fields).
pub fn current_period(period: Period, now: DateTime<Utc>) -> BillingPeriod {
    match period {
        Period::Daily => {
            let start = now.date_naive().and_hms_opt(0, 0, 0).unwrap();
            let start = Utc.from_utc_datetime(&start);
            BillingPeriod {
                starts_at: start,
                ends_at: start + Duration::days(1),
            }
        }
        Period::Weekly => {
            let days_since_monday = now.weekday().num_days_from_monday() as i64;
            let monday = now.date_naive() - Duration::days(days_since_monday);
            let start = Utc.from_utc_datetime(&monday.and_hms_opt(0, 0, 0).unwrap());
            BillingPeriod {
                starts_at: start,
                ends_at: start + Duration::weeks(1),
            }
        }
        Period::Monthly => {
            let first_of_month = now.date_naive().with_day(1).unwrap();
            let start = Utc.from_utc_datetime(&first_of_month.and_hms_opt(0, 0, 0).unwrap());
            let (next_year, next_month) = if now.month() == 12 {
                (now.year() + 1, 1)
            } else {
                (now.year(), now.month() + 1)
            };
            let next_month_start = chrono::NaiveDate::from_ymd_opt(next_year, next_month, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap();
            BillingPeriod {
                starts_at: start,
                ends_at: Utc.from_utc_datetime(&next_month_start),
            }
        }
    }
}

/// Aggregate usage within a billing period (backs §4.5's "usage
/// aggregates"); computed by summing `UsageRecord`s, not stored directly.
#[derive(Debug, Clone, Default)]
pub struct UsageQuota {
    pub cost: rust_decimal::Decimal,
    pub tokens: i64,
    pub invocations: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BudgetDecision {
    Allow,
    AllowWithWarning { threshold_crossed: f64 },
    Deny { reason: String },
}

/// Cost formula per §4.5: `input*in_rate + output*out_rate +
/// invocations*base_cost`.
pub fn estimate_cost(budget: &Budget, input_tokens: i64, output_tokens: i64) -> rust_decimal::Decimal {
    rust_decimal::Decimal::from(input_tokens) * budget.input_token_rate
        + rust_decimal::Decimal::from(output_tokens) * budget.output_token_rate
        + budget.base_cost_per_invocation
}

/// `CheckBudget(budget, estimated_cost)` per §4.5.
pub fn check_budget(
    budget: &Budget,
    current: &UsageQuota,
    estimated_cost: rust_decimal::Decimal,
    estimated_tokens: i64,
) -> BudgetDecision {
    let after_cost = current.cost + estimated_cost;
    let after_tokens = current.tokens + estimated_tokens;
    let after_invocations = current.invocations + 1;

    let cost_limit = budget.max_cost_per_period;
    let unlimited_cost = cost_limit.is_sign_negative();
    let cost_over = !unlimited_cost && after_cost > cost_limit;

    let unlimited_tokens = budget.max_tokens_per_period == UNLIMITED;
    let tokens_over = !unlimited_tokens && after_tokens > budget.max_tokens_per_period;

    let unlimited_invocations = budget.max_invocations_per_period == UNLIMITED;
    let invocations_over =
        !unlimited_invocations && after_invocations > budget.max_invocations_per_period;

    let over = cost_over || tokens_over || invocations_over;

    if over {
        if budget.enforcement_mode == EnforcementMode::Hard {
            let reason = if cost_over {
                "cost limit exceeded for period".to_string()
            } else if tokens_over {
                "token limit exceeded for period".to_string()
            } else {
                "invocation limit exceeded for period".to_string()
            };
            return BudgetDecision::Deny { reason };
        }
        return BudgetDecision::AllowWithWarning {
            threshold_crossed: 1.0,
        };
    }

    if !unlimited_cost && cost_limit > rust_decimal::Decimal::ZERO {
        let fraction = (after_cost / cost_limit)
            .to_string()
            .parse::<f64>()
            .unwrap_or(0.0);
        if let Some(&crossed) = budget
            .thresholds
            .iter()
            .filter(|&&t| fraction >= t)
            .last()
        {
            return BudgetDecision::AllowWithWarning {
                threshold_crossed: crossed,
            };
        }
    }

    BudgetDecision::Allow
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct UsageRecord {
    pub id: Uuid,
    pub org_id: Uuid,
    pub external_agent_id: Uuid,
    pub resource_type: String,
    pub quantity: rust_decimal::Decimal,
    pub unit: String,
    pub unit_cost: rust_decimal::Decimal,
    pub total_cost: rust_decimal::Decimal,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn test_budget(mode: EnforcementMode) -> Budget {
        Budget {
            external_agent_id: Uuid::new_v4(),
            period: Period::Daily,
            max_cost_per_period: Decimal::from_str("0.02").unwrap(),
            max_tokens_per_period: UNLIMITED,
            max_invocations_per_period: UNLIMITED,
            thresholds: vec![0.5, 0.75, 0.9, 1.0],
            enforcement_mode: mode,
            rollover_unused: false,
            input_token_rate: Decimal::ZERO,
            output_token_rate: Decimal::ZERO,
            base_cost_per_invocation: Decimal::from_str("0.01").unwrap(),
            timezone: "UTC".into(),
        }
    }

    #[test]
    fn hard_mode_denies_third_call_scenario() {
        // Scenario 4 from spec §8: max_cost=0.02, base_cost=0.01, 3 sequential calls.
        let budget = test_budget(EnforcementMode::Hard);
        let mut usage = UsageQuota::default();

        let d1 = check_budget(&budget, &usage, Decimal::from_str("0.01").unwrap(), 0);
        assert_eq!(d1, BudgetDecision::Allow);
        usage.cost += Decimal::from_str("0.01").unwrap();
        usage.invocations += 1;

        let d2 = check_budget(&budget, &usage, Decimal::from_str("0.01").unwrap(), 0);
        assert!(matches!(d2, BudgetDecision::Allow | BudgetDecision::AllowWithWarning { .. }));
        usage.cost += Decimal::from_str("0.01").unwrap();
        usage.invocations += 1;

        let d3 = check_budget(&budget, &usage, Decimal::from_str("0.01").unwrap(), 0);
        assert!(matches!(d3, BudgetDecision::Deny { .. }));
    }

    #[test]
    fn soft_mode_allows_with_warning_past_limit() {
        let budget = test_budget(EnforcementMode::Soft);
        let mut usage = UsageQuota::default();
        usage.cost = Decimal::from_str("0.02").unwrap();
        let decision = check_budget(&budget, &usage, Decimal::from_str("0.01").unwrap(), 0);
        assert!(matches!(decision, BudgetDecision::AllowWithWarning { .. }));
    }

    #[test]
    fn unlimited_sentinel_bypasses_cost_dimension() {
        let mut budget = test_budget(EnforcementMode::Hard);
        budget.max_cost_per_period = Decimal::from(UNLIMITED);
        let usage = UsageQuota {
            cost: Decimal::from_str("1000000").unwrap(),
            tokens: 0,
            invocations: 0,
        };
        let decision = check_budget(&budget, &usage, Decimal::from_str("1.0").unwrap(), 0);
        assert_eq!(decision, BudgetDecision::Allow);
    }

    #[test]
    fn daily_period_is_midnight_to_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 15, 30, 0).unwrap();
        let p = current_period(Period::Daily, now);
        assert_eq!(p.starts_at, Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap());
        assert_eq!(p.ends_at, Utc.with_ymd_and_hms(2026, 7, 29, 0, 0, 0).unwrap());
        assert!(p.contains(now));
    }

    #[test]
    fn weekly_period_starts_monday() {
        // 2026-07-28 is a Tuesday.
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        let p = current_period(Period::Weekly, now);
        assert_eq!(p.starts_at.weekday(), chrono::Weekday::Mon);
        assert_eq!(p.starts_at, Utc.with_ymd_and_hms(2026, 7, 27, 0, 0, 0).unwrap());
    }

    #[test]
    fn monthly_period_handles_year_rollover() {
        let now = Utc.with_ymd_and_hms(2026, 12, 15, 0, 0, 0).unwrap();
        let p = current_period(Period::Monthly, now);
        assert_eq!(p.ends_at, Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }
}
