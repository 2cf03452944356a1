//! HTTP handlers for the external interface (§6). Thin: parse/validate the
//! request, call into `services::*`/`store::postgres::PgStore`, shape the
//! response. Enforcement ordering lives in the services layer, not here —
//! each handler only adds the one permission check its own action needs,
//! matching `services::invocation::invoke`'s expectation that RBAC already
//! ran by the time it's called.

use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::middleware::auth::{AuthContext, Principal};
use crate::models::identity::{Role, User};
use crate::models::lineage::ExternalIdentity;
use crate::services::auth;
use crate::services::invocation::{self, InvokeOutcome, InvokeRequest};
use crate::store::postgres::AuditLogFilter;
use crate::AppState;

fn require(ctx: &AuthContext, permission: &str) -> Result<(), AppError> {
    if ctx.has_permission(permission) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "missing permission '{permission}'"
        )))
    }
}

#[derive(Debug, Serialize)]
struct UserView {
    id: Uuid,
    email: String,
    name: String,
}

impl From<&User> for UserView {
    fn from(u: &User) -> Self {
        UserView {
            id: u.id,
            email: u.email.clone(),
            name: u.name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct TokensView {
    access_token: String,
    refresh_token: String,
}

impl From<auth::Tokens> for TokensView {
    fn from(t: auth::Tokens) -> Self {
        TokensView {
            access_token: t.access_token,
            refresh_token: t.refresh_token,
        }
    }
}

// ── POST /auth/register ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub email: String,
    pub password: String,
    pub name: String,
    pub organization_name: String,
}

fn field_error(field: &str, message: &str) -> AppError {
    AppError::Validation(vec![crate::errors::FieldError {
        field: field.to_string(),
        message: message.to_string(),
    }])
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterBody>,
) -> Result<impl IntoResponse, AppError> {
    if body.password.len() < 8 {
        return Err(field_error("password", "must be at least 8 characters"));
    }
    if body.email.is_empty() || body.organization_name.is_empty() {
        return Err(field_error(
            "email/organization_name",
            "must not be empty",
        ));
    }

    let outcome = auth::register(
        &state.db,
        &state.config.jwt_private_key,
        auth::RegisterRequest {
            email: body.email,
            password: body.password,
            name: body.name,
            organization_name: body.organization_name,
        },
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "user": UserView::from(&outcome.user),
            "tokens": TokensView::from(outcome.tokens),
        })),
    ))
}

// ── POST /auth/login ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginBody>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = auth::login(
        &state.db,
        &state.config.jwt_private_key,
        auth::LoginRequest {
            email: body.email,
            password: body.password,
        },
    )
    .await?;

    Ok(Json(serde_json::json!({
        "user": UserView::from(&outcome.user),
        "access_token": outcome.access_token,
        "refresh_token": outcome.refresh_token,
    })))
}

// ── POST /auth/refresh ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RefreshBody {
    pub refresh_token: String,
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshBody>,
) -> Result<impl IntoResponse, AppError> {
    let access_token = auth::refresh(
        &state.db,
        &state.config.jwt_public_key,
        &state.config.jwt_private_key,
        &body.refresh_token,
    )
    .await?;
    Ok(Json(serde_json::json!({ "access_token": access_token })))
}

// ── POST /invitations ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateInvitationBody {
    pub email: String,
    pub role: String,
}

pub async fn create_invitation(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<CreateInvitationBody>,
) -> Result<impl IntoResponse, AppError> {
    require(&ctx, "invitations:create")?;
    let user_id = ctx
        .user_id
        .ok_or_else(|| AppError::Forbidden("API keys cannot issue invitations".into()))?;
    let role = Role::parse(&body.role)
        .ok_or_else(|| field_error("role", &format!("unknown role '{}'", body.role)))?;

    let token = Uuid::new_v4().to_string();
    let invitation = state
        .db
        .create_invitation(
            ctx.org_id,
            &body.email,
            role,
            user_id,
            &token,
            crate::models::identity::INVITATION_TTL_DAYS,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": invitation.id,
            "org_id": invitation.org_id,
            "email": invitation.email,
            "role": invitation.role,
            "status": invitation.status,
            "expires_at": invitation.expires_at,
            "token": invitation.token,
        })),
    ))
}

// ── POST /invitations/{token}/accept ─────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AcceptInvitationBody {
    pub name: String,
    pub password: String,
}

pub async fn accept_invitation(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(body): Json<AcceptInvitationBody>,
) -> Result<impl IntoResponse, AppError> {
    if body.password.len() < 8 {
        return Err(field_error("password", "must be at least 8 characters"));
    }

    let outcome = auth::accept_invitation(
        &state.db,
        &state.config.jwt_private_key,
        &token,
        &body.name,
        &body.password,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "user": UserView::from(&outcome.user),
            "tokens": TokensView::from(outcome.tokens),
        })),
    ))
}

// ── POST /api-keys ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyBody {
    pub name: String,
    pub scopes: Vec<String>,
    pub rate_limit: i64,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub async fn create_api_key(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<CreateApiKeyBody>,
) -> Result<impl IntoResponse, AppError> {
    require(&ctx, "api_keys:create")?;

    let outcome = auth::create_api_key(
        &state.db,
        &ctx,
        auth::CreateApiKeyRequest {
            name: body.name,
            scopes: body.scopes,
            rate_limit: body.rate_limit,
            expires_at: body.expires_at,
        },
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": outcome.key.id,
            "org_id": outcome.key.org_id,
            "name": outcome.key.name,
            "key_prefix": outcome.key.key_prefix,
            "scopes": outcome.key.scopes,
            "rate_limit": outcome.key.rate_limit,
            "expires_at": outcome.key.expires_at,
            "status": outcome.key.status,
            "key": outcome.plaintext,
        })),
    ))
}

// ── POST /external-agents/{id}/invoke ─────────────────────────────────

pub async fn invoke_external_agent(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
    identity: Option<Extension<ExternalIdentity>>,
    headers: HeaderMap,
    Json(request_payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse, AppError> {
    require(&ctx, "external_agents:invoke")?;

    let identity = identity.map(|Extension(i)| i).unwrap_or_default();
    let request_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .map(str::to_string);
    let request_user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let outcome = invocation::invoke(
        &state.db,
        &state.cache,
        &state.vault,
        &state.http,
        &state.webhook,
        &ctx,
        &identity,
        InvokeRequest {
            external_agent_id: agent_id,
            endpoint: None,
            request_payload,
            request_ip,
            request_user_agent,
            approval_id: None,
        },
    )
    .await?;

    match outcome {
        InvokeOutcome::Completed(inv) => Ok((
            StatusCode::OK,
            Json(serde_json::to_value(&inv).unwrap_or_default()),
        )),
        InvokeOutcome::ApprovalRequired { approval_id } => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "approval_id": approval_id,
                "status": "pending_approval",
            })),
        )),
    }
}

// ── GET /audit/logs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub organization_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub start_date: Option<chrono::DateTime<chrono::Utc>>,
    pub end_date: Option<chrono::DateTime<chrono::Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

const AUDIT_LOG_DEFAULT_LIMIT: i64 = 50;
const AUDIT_LOG_MAX_LIMIT: i64 = 500;

pub async fn list_audit_logs(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<AuditLogQuery>,
) -> Result<impl IntoResponse, AppError> {
    require(&ctx, "audit:read")?;

    // `tenant_admin` is the one role allowed to cross organizations; every
    // other caller is pinned to their own org regardless of what
    // `organization_id` they pass (see DESIGN.md).
    let org_id = match (&ctx.principal, query.organization_id) {
        (Principal::Role(Role::TenantAdmin), Some(requested)) => requested,
        _ => ctx.org_id,
    };

    let filter = AuditLogFilter {
        org_id,
        user_id: query.user_id,
        action: query.action,
        resource_type: query.resource_type,
        start_date: query.start_date,
        end_date: query.end_date,
        limit: query
            .limit
            .unwrap_or(AUDIT_LOG_DEFAULT_LIMIT)
            .clamp(1, AUDIT_LOG_MAX_LIMIT),
        offset: query.offset.unwrap_or(0).max(0),
    };

    let logs = state.db.list_audit_logs(&filter).await?;
    Ok(Json(serde_json::json!({ "logs": logs })))
}

// ── GET /metrics, /health, /docs ──────────────────────────────────────

pub async fn metrics() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::middleware::metrics::encode_metrics(),
    )
}

pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

pub async fn docs_placeholder() -> impl IntoResponse {
    (
        StatusCode::OK,
        "Kaizen Studio governance core API. See the OpenAPI document for the full contract.",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_view_drops_password_hash() {
        let user = User {
            id: Uuid::new_v4(),
            org_id: None,
            email: "a@example.com".into(),
            password_hash: Some("secret".into()),
            name: "A".into(),
            status: crate::models::identity::UserStatus::Active,
            role: None,
            mfa_enabled: false,
            is_super_admin: false,
            primary_organization_id: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let view = UserView::from(&user);
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("password_hash").is_none());
    }
}
