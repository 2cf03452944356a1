//! Automatic audit trail for state-changing requests (§4.9).
//!
//! Logs every `POST`/`PUT`/`PATCH`/`DELETE` with a resolved `AuthContext`
//! (unauthenticated requests have no org to attribute the action to, so
//! they're skipped here — the authenticator/RBAC layers reject those
//! anyway). Writing is fire-and-forget: a failed insert is logged and
//! swallowed, never turned into a failed response.

use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::middleware::auth::AuthContext;
use crate::middleware::GatewayState;
use crate::models::audit::{method_to_action, parse_resource_from_path, AuditLog, AuditStatus};
use crate::store::postgres::PgStore;

const EXCLUDED_PATHS: &[&str] = &["/", "/health", "/healthz", "/docs", "/redoc", "/openapi.json"];

pub async fn record(State(state): State<GatewayState>, req: Request, next: Next) -> Response {
    let auditable = matches!(
        *req.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    ) && !EXCLUDED_PATHS.contains(&req.uri().path());

    if !auditable {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let ip = client_ip(req.headers());
    let user_agent = req
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let ctx = req.extensions().get::<AuthContext>().cloned();

    let started = Instant::now();
    let response = next.run(req).await;
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    if let Some(ctx) = ctx {
        let status_code = response.status().as_u16();
        let (resource_type, resource_id) = parse_resource_from_path(&path);
        let log = AuditLog {
            id: Uuid::new_v4(),
            org_id: ctx.org_id,
            user_id: ctx.user_id,
            action: method_to_action(&method).to_string(),
            resource_type,
            resource_id,
            details: json!({
                "method": method,
                "path": path,
                "status_code": status_code,
                "duration_ms": (duration_ms * 100.0).round() / 100.0,
            }),
            ip_address: ip,
            user_agent,
            status: if status_code < 400 { AuditStatus::Success } else { AuditStatus::Failure },
            error_message: if status_code >= 400 { Some(format!("HTTP {status_code}")) } else { None },
            created_at: Utc::now(),
        };
        spawn_write(state.db.clone(), log);
    }

    response
}

const DETACHED_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

fn spawn_write(db: PgStore, log: AuditLog) {
    tokio::spawn(async move {
        match tokio::time::timeout(DETACHED_WRITE_TIMEOUT, db.insert_audit_log(&log)).await {
            Ok(Err(err)) => {
                tracing::error!(org_id = %log.org_id, action = %log.action, "failed to write audit log: {err}");
            }
            Err(_) => {
                tracing::error!(org_id = %log.org_id, action = %log.action, "audit log write timed out");
            }
            Ok(Ok(())) => {}
        }
    });
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
}
