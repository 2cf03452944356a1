//! Periodic budget threshold sweep (§4.5).
//!
//! Runs every 15 minutes, mirroring the donor's aggregate-then-compare
//! cadence but against the per-agent/per-period budget model instead of a
//! single project-level monthly cap: for every configured `Budget`,
//! aggregate the current period's usage and re-run `check_budget`, firing a
//! `budget.threshold_crossed` webhook when a threshold is crossed.
//!
//! Unlike the donor's `budget_alerts.warn_fired_at`/`cap_fired_at` columns,
//! `budgets` carries no per-period "already notified" flag, so this fires
//! on every tick a threshold remains crossed rather than once per period;
//! consumers are expected to dedupe on `(external_agent_id,
//! threshold_crossed)` if they care.

use std::time::Duration;

use chrono::Utc;
use tokio::time;
use tracing::{debug, error, warn};

use crate::models::budget::{check_budget, current_period, BudgetDecision};
use crate::notification::webhook::{WebhookEvent, WebhookNotifier};
use crate::store::postgres::PgStore;

const SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Spawn the periodic sweep. Call once at startup.
pub fn spawn(db: PgStore) {
    tokio::spawn(async move {
        let mut interval = time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = run_budget_check(&db).await {
                error!(error = %e, "budget_check job failed");
            }
        }
    });
}

/// Run the sweep once. Exposed for the periodic scheduler and for tests.
pub async fn run_budget_check(db: &PgStore) -> anyhow::Result<()> {
    debug!("budget_check: starting periodic sweep");

    let budgets = db.list_budgets_with_org().await?;
    if budgets.is_empty() {
        return Ok(());
    }
    debug!(count = budgets.len(), "budget_check: checking configured budget(s)");

    let notifier = WebhookNotifier::new();
    let now = Utc::now();

    for (org_id, budget) in &budgets {
        let period = current_period(budget.period, now);
        let usage = db
            .usage_in_period(budget.external_agent_id, period.starts_at, period.ends_at)
            .await?;
        let decision = check_budget(budget, &usage, rust_decimal::Decimal::ZERO, 0);

        let BudgetDecision::AllowWithWarning { threshold_crossed } = decision else {
            continue;
        };

        warn!(
            external_agent_id = %budget.external_agent_id,
            threshold_crossed,
            cost = %usage.cost,
            "budget_check: threshold crossed"
        );

        let webhooks = match db.list_webhooks(*org_id).await {
            Ok(w) => w,
            Err(e) => {
                error!(org_id = %org_id, error = %e, "budget_check: failed to list webhooks");
                continue;
            }
        };

        let event = WebhookEvent::budget_threshold_crossed(
            uuid::Uuid::nil(),
            budget.external_agent_id,
            *org_id,
            rust_decimal::Decimal::try_from(threshold_crossed).unwrap_or_default(),
        );

        for webhook in webhooks.iter().filter(|w| w.subscribes_to(&event.event_type)) {
            if let Err(e) = notifier.send_signed(&webhook.url, &event, &webhook.secret).await {
                warn!(webhook_id = %webhook.id, error = %e, "budget_check: webhook delivery failed");
            }
        }
    }

    debug!("budget_check: complete");
    Ok(())
}
