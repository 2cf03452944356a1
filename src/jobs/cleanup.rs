//! Background job: lineage PII retention sweep.
//!
//! Runs hourly. Strips `external_user_email`/`external_user_name` and the
//! raw request/response snapshots from `invocation_lineage` rows past the
//! retention window, preserving cost/token/status/budget/approval fields
//! for billing and audit — the same UPDATE-not-DELETE shape as the donor's
//! debug-body expiry, applied to lineage PII rather than log bodies.

use std::time::Duration;

use chrono::Utc;
use tokio::time;

use crate::store::postgres::PgStore;

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
/// No retention period is specified by name in the governance model; 90
/// days matches the common compliance-audit default and is conservative
/// relative to the 15m/1h budget and cleanup cadences already in this
/// module set.
const RETENTION: chrono::Duration = chrono::Duration::days(90);

/// Spawn the background cleanup task. Call this once at startup.
pub fn spawn(db: PgStore) {
    tokio::spawn(async move {
        let mut interval = time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = redact_expired_lineage(&db).await {
                tracing::error!("cleanup job failed: {}", e);
            }
        }
    });
}

async fn redact_expired_lineage(db: &PgStore) -> anyhow::Result<()> {
    let cutoff = Utc::now() - RETENTION;
    let redacted = db.redact_expired_lineage(cutoff).await?;
    if redacted > 0 {
        tracing::info!(rows = redacted, "redacted expired invocation lineage PII");
    }
    Ok(())
}
