//! Background periodic jobs (§4.5, §4.9): the budget threshold sweep and
//! the lineage PII retention sweep. Both are spawned once at startup and
//! run on their own `tokio::time::interval`.

pub mod budget_checker;
pub mod cleanup;
pub mod metrics_gauges;
