//! Request authentication (§4.1).
//!
//! Precedence, first match wins:
//! 1. Test headers (`X-User-ID`/`X-Org-ID`/`X-Role`) — only when
//!    [`crate::config::Config::test_hooks_allowed`] is true.
//! 2. API key (`X-Api-Key` or `Authorization: Bearer sk_live_...`).
//! 3. Session JWT (`Authorization: Bearer <jwt>`), RS256-signed.
//!
//! A request that matches none of these proceeds as anonymous; routes that
//! require a principal reject it via `middleware::rbac`, not here.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::middleware::GatewayState;
use crate::models::api_key::{KEY_LITERAL_PREFIX, KEY_PREFIX_LEN};
use crate::models::identity::{Role, User};

/// How `AuthContext::has_permission` resolves a `resource:action` check.
#[derive(Debug, Clone)]
pub enum Principal {
    Role(Role),
    /// API keys carry their own scope list (`has_scope`), independent of
    /// the role matrix.
    ApiKeyScopes(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    TestHeader,
    ApiKey,
    Jwt,
}

/// The authenticated principal for a request, inserted into request
/// extensions by [`authenticate`] and pulled out by handlers/extractors.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Option<Uuid>,
    pub org_id: Uuid,
    pub principal: Principal,
    pub auth_method: AuthMethod,
    /// Set when a JWT's `org_id`/`role` claims disagreed with the current
    /// database row. The database values are always what's enforced; this
    /// only flags the staleness so callers can, e.g., force a re-login.
    pub role_stale: bool,
    /// Present only for `AuthMethod::ApiKey`; the key's own per-minute
    /// limit, used by `middleware::rate_limit` instead of the JWT default.
    pub api_key_id: Option<Uuid>,
    pub api_key_rate_limit: Option<i64>,
}

impl AuthContext {
    pub fn has_permission(&self, permission: &str) -> bool {
        match &self.principal {
            Principal::Role(role) => super::rbac::role_has_permission(*role, permission),
            Principal::ApiKeyScopes(scopes) => {
                if scopes.iter().any(|s| s == "*" || s == permission) {
                    return true;
                }
                permission
                    .split_once(':')
                    .map(|(resource, _)| format!("{resource}:*"))
                    .map_or(false, |wildcard| scopes.contains(&wildcard))
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub org_id: Uuid,
    pub role: String,
    /// Refresh-revocation key. Unused until a revocation store exists (see
    /// DESIGN.md); carried now so a revocation list can key off it without
    /// a claims-shape migration later.
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
}

pub const ACCESS_TOKEN_TTL_MINUTES: i64 = 15;
/// Refresh tokens are the same RS256 claims shape, just longer-lived;
/// there's no separate refresh-token store, so `services::auth::refresh`
/// re-derives org/role from the database on every use rather than
/// trusting the token past its signature.
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 7;

fn sign(user: &User, org_id: Uuid, role: Role, ttl: Duration, private_key_pem: &str) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = AccessClaims {
        sub: user.id,
        org_id,
        role: role.as_str().to_string(),
        jti: Uuid::new_v4(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid JWT signing key: {e}")))?;
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to sign token: {e}")))
}

/// Signs a session access token for `user` at their current `org_id`/`role`.
pub fn issue_access_token(
    user: &User,
    org_id: Uuid,
    role: Role,
    private_key_pem: &str,
) -> Result<String, AppError> {
    sign(user, org_id, role, Duration::minutes(ACCESS_TOKEN_TTL_MINUTES), private_key_pem)
}

/// Signs a long-lived refresh token for `user` at their current `org_id`/`role`.
pub fn issue_refresh_token(
    user: &User,
    org_id: Uuid,
    role: Role,
    private_key_pem: &str,
) -> Result<String, AppError> {
    sign(user, org_id, role, Duration::days(REFRESH_TOKEN_TTL_DAYS), private_key_pem)
}

fn decode_access_token(token: &str, public_key_pem: &str) -> Option<AccessClaims> {
    let key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes()).ok()?;
    let validation = Validation::new(Algorithm::RS256);
    jsonwebtoken::decode::<AccessClaims>(token, &key, &validation)
        .ok()
        .map(|data| data.claims)
}

impl AccessClaims {
    /// Public entry point for verifying a token outside this module
    /// (e.g. a presented refresh token in `services::auth::refresh`).
    pub fn decode(token: &str, public_key_pem: &str) -> Option<AccessClaims> {
        decode_access_token(token, public_key_pem)
    }
}

/// Paths reachable with no principal at all.
const PUBLIC_PATHS: &[&str] = &[
    "/",
    "/health",
    "/healthz",
    "/docs",
    "/redoc",
    "/openapi.json",
    "/metrics",
    "/api/v1/auth/register",
    "/api/v1/auth/login",
    "/api/v1/auth/refresh",
];

pub async fn authenticate(
    State(state): State<GatewayState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if PUBLIC_PATHS.contains(&req.uri().path()) {
        return Ok(next.run(req).await);
    }

    if let Some(ctx) = resolve(&state, req.headers()).await? {
        req.extensions_mut().insert(ctx);
    }
    Ok(next.run(req).await)
}

async fn resolve(state: &GatewayState, headers: &HeaderMap) -> Result<Option<AuthContext>, AppError> {
    if state.config.test_hooks_allowed() {
        if let Some(ctx) = test_header_context(headers) {
            return Ok(Some(ctx));
        }
    }

    if let Some(key) = extract_api_key(headers) {
        return api_key_context(state, &key).await.map(Some);
    }

    if let Some(token) = extract_bearer(headers) {
        return jwt_context(state, &token).await;
    }

    Ok(None)
}

fn test_header_context(headers: &HeaderMap) -> Option<AuthContext> {
    let user_id: Uuid = headers.get("x-user-id")?.to_str().ok()?.parse().ok()?;
    let org_id: Uuid = headers.get("x-org-id")?.to_str().ok()?.parse().ok()?;
    let role = headers
        .get("x-role")
        .and_then(|v| v.to_str().ok())
        .and_then(Role::parse)
        .unwrap_or(Role::OrgOwner);
    Some(AuthContext {
        user_id: Some(user_id),
        org_id,
        principal: Principal::Role(role),
        auth_method: AuthMethod::TestHeader,
        role_stale: false,
        api_key_id: None,
        api_key_rate_limit: None,
    })
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(v) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        if v.starts_with(KEY_LITERAL_PREFIX) {
            return Some(v.to_string());
        }
    }
    extract_bearer(headers).filter(|v| v.starts_with(KEY_LITERAL_PREFIX))
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
}

async fn api_key_context(state: &GatewayState, presented: &str) -> Result<AuthContext, AppError> {
    if presented.len() < KEY_PREFIX_LEN {
        return Err(AppError::Unauthorized);
    }
    let prefix = &presented[..KEY_PREFIX_LEN];
    let now = Utc::now();

    for candidate in state.db.get_api_keys_by_prefix(prefix).await? {
        if !candidate.is_usable(now) {
            continue;
        }
        if bcrypt::verify(presented, &candidate.key_hash).unwrap_or(false) {
            state.db.touch_api_key_last_used(candidate.id).await?;
            return Ok(AuthContext {
                user_id: None,
                org_id: candidate.org_id,
                principal: Principal::ApiKeyScopes(candidate.scopes),
                auth_method: AuthMethod::ApiKey,
                role_stale: false,
                api_key_id: Some(candidate.id),
                api_key_rate_limit: Some(candidate.rate_limit),
            });
        }
    }
    Err(AppError::Unauthorized)
}

/// Decodes the session JWT, then re-derives organization/role from the
/// database rather than trusting the claims: a user demoted or moved to a
/// different org after the token was issued must never keep the stale
/// privilege for the token's remaining lifetime. A deleted user resolves to
/// anonymous rather than an error, matching §4.1.
async fn jwt_context(state: &GatewayState, token: &str) -> Result<Option<AuthContext>, AppError> {
    let Some(claims) = decode_access_token(token, &state.config.jwt_public_key) else {
        return Err(AppError::Unauthorized);
    };

    let Some(user) = state.db.get_user_by_id(claims.sub).await? else {
        return Ok(None);
    };
    let Some(membership) = state.db.get_primary_user_organization(user.id).await? else {
        return Ok(None);
    };

    let claimed_role = Role::parse(&claims.role);
    let role_stale = claims.org_id != membership.org_id || claimed_role != Some(membership.role);

    Ok(Some(AuthContext {
        user_id: Some(user.id),
        org_id: membership.org_id,
        principal: Principal::Role(membership.role),
        auth_method: AuthMethod::Jwt,
        role_stale,
        api_key_id: None,
        api_key_rate_limit: None,
    }))
}
