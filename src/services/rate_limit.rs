//! Invocation-specific rate limiting: per `(external_agent, user)` across
//! minute/hour/day windows (§4.7 step 4). Distinct from the principal-wide
//! HTTP limiter in `middleware::rate_limit` — this one is keyed by the
//! target agent, not the caller, since an agent's own throughput cap must
//! hold regardless of which API key or user is invoking it.

use chrono::Utc;

use crate::cache::TieredCache;
use crate::errors::AppError;
use crate::models::external_agent::{ExternalAgent, UNLIMITED};

struct Window {
    label: &'static str,
    seconds: i64,
    limit: i64,
}

/// `ExternalAgent` has no `rate_limit_per_day` column; the day window
/// ceiling is derived as `rate_limit_per_hour * 24`, consistent with how
/// every other dimension here treats `UNLIMITED` as bypassing the check.
pub async fn check(cache: &TieredCache, agent: &ExternalAgent, caller_key: &str) -> Result<(), AppError> {
    let now = Utc::now().timestamp();
    let windows = [
        Window {
            label: "minute",
            seconds: 60,
            limit: agent.rate_limit_per_minute,
        },
        Window {
            label: "hour",
            seconds: 3600,
            limit: agent.rate_limit_per_hour,
        },
        Window {
            label: "day",
            seconds: 86_400,
            limit: if agent.rate_limit_per_hour == UNLIMITED {
                UNLIMITED
            } else {
                agent.rate_limit_per_hour * 24
            },
        },
    ];

    for w in windows {
        if w.limit == UNLIMITED {
            continue;
        }
        let bucket = now / w.seconds;
        let key = format!("ratelimit:invoke:{}:{}:{}:{bucket}", agent.id, caller_key, w.label);
        let retry_after = (w.seconds - now % w.seconds) as u64;

        let count = cache
            .increment(&key, (w.seconds + 10) as u64)
            .await
            .map_err(|_| AppError::RateLimitExceeded { retry_after })?;

        if count as i64 > w.limit {
            return Err(AppError::RateLimitExceeded { retry_after });
        }
    }
    Ok(())
}
