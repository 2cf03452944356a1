//! Periodic gauge snapshot job (§4.9).
//!
//! `active_users` and `pending_invitations` have no natural per-request
//! update point (nothing increments or decrements them on every request the
//! way `api_requests_total` does), so they're refreshed on a timer instead.
//! `active_deployments`/`active_gateways` stay at zero: those entities have
//! no backing table in this implementation.

use std::time::Duration;

use tokio::time;
use tracing::{debug, error};

use crate::middleware::metrics::RECORDER;
use crate::store::postgres::PgStore;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn the periodic gauge refresh. Call once at startup.
pub fn spawn(db: PgStore) {
    tokio::spawn(async move {
        let mut interval = time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = run_once(&db).await {
                error!(error = %e, "metrics_gauges job failed");
            }
        }
    });
}

async fn run_once(db: &PgStore) -> anyhow::Result<()> {
    let active_users = db.count_active_users().await?;
    let pending_invitations = db.count_pending_invitations().await?;

    RECORDER.set_active_users(active_users);
    RECORDER.set_pending_invitations(pending_invitations);

    debug!(active_users, pending_invitations, "metrics_gauges: refreshed");
    Ok(())
}
