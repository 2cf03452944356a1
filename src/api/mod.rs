//! Router assembly (§2, §6). All endpoints listed in spec §6 are mounted
//! under `/api/v1`; `/health`, `/metrics` and `/docs` sit at root.
//!
//! Middleware stack order, outer to inner: authenticator first (so every
//! later layer can read the `AuthContext` it inserts), then the CSRF
//! guard (exempts API-key callers by checking that same context),
//! external-identity extraction, rate limiter, audit tap. RBAC/ABAC are
//! not separate layers — each handler checks its own permission (see
//! `handlers::require`) since the resource a permission applies to
//! differs per route.

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::middleware::{self, GatewayState};
use crate::AppState;

pub mod handlers;

pub fn api_router(state: Arc<AppState>, gateway_state: GatewayState) -> Router {
    let v1 = Router::new()
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/auth/refresh", post(handlers::refresh))
        .route("/invitations", post(handlers::create_invitation))
        .route(
            "/invitations/:token/accept",
            post(handlers::accept_invitation),
        )
        .route("/api-keys", post(handlers::create_api_key))
        .route(
            "/external-agents/:id/invoke",
            post(handlers::invoke_external_agent),
        )
        .route("/audit/logs", get(handlers::list_audit_logs));

    Router::new()
        .nest("/api/v1", v1)
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/docs", get(handlers::docs_placeholder))
        .layer(from_fn_with_state(gateway_state.clone(), middleware::audit::record))
        .layer(from_fn_with_state(gateway_state.clone(), middleware::rate_limit::enforce))
        .layer(axum::middleware::from_fn(middleware::lineage_extract::extract))
        .layer(from_fn_with_state(gateway_state.clone(), middleware::csrf::enforce))
        .layer(from_fn_with_state(gateway_state, middleware::auth::authenticate))
        .layer(axum::middleware::from_fn(middleware::metrics::record))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
