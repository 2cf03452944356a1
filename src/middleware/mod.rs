pub mod abac;
pub mod audit;
pub mod auth;
pub mod csrf;
pub mod fields;
pub mod lineage_extract;
pub mod metrics;
pub mod rate_limit;
pub mod rbac;

use std::sync::Arc;

use crate::cache::TieredCache;
use crate::config::Config;
use crate::store::postgres::PgStore;

/// State threaded into the `auth`/`csrf`/`rate_limit`/`audit` layers via
/// `axum::middleware::from_fn_with_state`. Deliberately narrower than the
/// binary's full `AppState` (no vault, upstream client, pricing, load
/// balancer): these layers run on every request and only ever touch the
/// database, cache and static config, so they're captured on their own
/// rather than pulled out of the handler-level aggregate.
#[derive(Clone)]
pub struct GatewayState {
    pub db: PgStore,
    pub cache: TieredCache,
    pub config: Arc<Config>,
}
