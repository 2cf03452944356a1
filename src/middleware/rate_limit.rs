//! Per-request rate limiting (§4.4), checked in order:
//! 1. API-key limit — the key's own `rate_limit` column.
//! 2. Authenticated-user default — `Config::default_jwt_rate_limit`.
//! 3. Per-IP limit, but only on the auth endpoints (brute-force guard);
//!    every other anonymous request is unlimited here, same as upstream.
//!
//! Bucket = current wall-clock minute floor, key = `ratelimit:<principal>:
//! <minute_epoch>`, counted with `cache::TieredCache::increment` (atomic
//! `INCR` + `EXPIRE(window + 10s)` so a clock-adjacent request can't read a
//! bucket that just expired). A Redis error fails closed — the request is
//! denied, not let through.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use once_cell::sync::Lazy;

use crate::errors::AppError;
use crate::middleware::auth::AuthContext;
use crate::middleware::GatewayState;

const WINDOW_SECS: i64 = 60;

static AUTH_RATE_LIMITS: Lazy<HashMap<&'static str, i64>> = Lazy::new(|| {
    [
        ("/api/v1/auth/login", 10),
        ("/api/v1/auth/register", 5),
        ("/api/v1/auth/forgot-password", 3),
        ("/api/v1/auth/reset-password", 5),
        ("/api/v1/auth/refresh", 30),
    ]
    .into_iter()
    .collect()
});

pub async fn enforce(
    State(state): State<GatewayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let path = req.uri().path().to_string();
    let ctx = req.extensions().get::<AuthContext>();

    let (principal, limit) = match ctx {
        Some(ctx) if ctx.api_key_id.is_some() => (
            format!("key:{}", ctx.api_key_id.unwrap()),
            ctx.api_key_rate_limit
                .unwrap_or(state.config.default_jwt_rate_limit as i64),
        ),
        Some(ctx) if ctx.user_id.is_some() => (
            format!("user:{}", ctx.user_id.unwrap()),
            state.config.default_jwt_rate_limit as i64,
        ),
        _ => match AUTH_RATE_LIMITS.get(path.as_str()) {
            Some(&limit) => (format!("auth:{}:{}", addr.ip(), path), limit),
            None => return Ok(next.run(req).await),
        },
    };

    let now = Utc::now().timestamp();
    let minute_epoch = now / WINDOW_SECS;
    let key = format!("ratelimit:{principal}:{minute_epoch}");
    let reset = (WINDOW_SECS - now % WINDOW_SECS) as u64;

    let count = state
        .cache
        .increment(&key, (WINDOW_SECS + 10) as u64)
        .await
        .map_err(|_| AppError::RateLimitExceeded { retry_after: reset })?;

    if count as i64 > limit {
        return Err(AppError::RateLimitExceeded { retry_after: reset });
    }

    let remaining = (limit - count as i64).max(0);
    let mut response = next.run(req).await;
    apply_headers(response.headers_mut(), limit, remaining, reset);
    Ok(response)
}

fn apply_headers(headers: &mut HeaderMap, limit: i64, remaining: i64, reset: u64) {
    let set = |headers: &mut HeaderMap, name: &'static str, value: String| {
        if let Ok(v) = HeaderValue::from_str(&value) {
            headers.insert(name, v);
        }
    };
    set(headers, "x-ratelimit-limit", limit.to_string());
    set(headers, "x-ratelimit-remaining", remaining.to_string());
    set(headers, "x-ratelimit-reset", reset.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_endpoints_have_stricter_limits_than_default() {
        assert_eq!(AUTH_RATE_LIMITS.get("/api/v1/auth/login"), Some(&10));
        assert_eq!(AUTH_RATE_LIMITS.get("/api/v1/auth/register"), Some(&5));
    }

    #[test]
    fn non_auth_path_is_not_rate_limited_by_ip() {
        assert_eq!(AUTH_RATE_LIMITS.get("/api/v1/agents"), None);
    }
}
