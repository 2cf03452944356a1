use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

/// The governance-core error taxonomy (§7). Every variant maps to one
/// HTTP status and one stable `code` in the `{"error": {...}}` envelope.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid or expired credentials")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("access denied by policy: {resource_type}:{action}")]
    ForbiddenByPolicy {
        resource_type: String,
        action: String,
    },

    #[error("request Origin header does not match an allowed origin")]
    CsrfInvalidOrigin,

    #[error("request Referer header does not match an allowed origin")]
    CsrfInvalidReferer,

    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("rate limit exceeded")]
    RateLimitExceeded { retry_after: u64 },

    #[error("budget exceeded: {reason}")]
    BudgetExceeded { reason: String },

    #[error("approval required")]
    ApprovalPending { approval_id: uuid::Uuid },

    #[error("approval rejected")]
    ApprovalRejected,

    #[error("approval already decided")]
    ApprovalAlreadyDecided,

    #[error("approval expired")]
    ApprovalExpired,

    #[error("self-approval is not allowed")]
    SelfApprovalNotAllowed,

    #[error("not authorized to decide this approval")]
    UnauthorizedApprover,

    #[error("external agent returned an error")]
    UpstreamFailed,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, serde::Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::ForbiddenByPolicy { .. } => "FORBIDDEN",
            AppError::CsrfInvalidOrigin => "CSRF_INVALID_ORIGIN",
            AppError::CsrfInvalidReferer => "CSRF_INVALID_REFERER",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Conflict(_) => "CONFLICT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::BudgetExceeded { .. } => "BUDGET_EXCEEDED",
            AppError::ApprovalPending { .. } => "APPROVAL_PENDING",
            AppError::ApprovalRejected => "APPROVAL_REJECTED",
            AppError::ApprovalAlreadyDecided => "APPROVAL_ALREADY_DECIDED",
            AppError::ApprovalExpired => "APPROVAL_EXPIRED",
            AppError::SelfApprovalNotAllowed => "SELF_APPROVAL_NOT_ALLOWED",
            AppError::UnauthorizedApprover => "UNAUTHORIZED_APPROVER",
            AppError::UpstreamFailed => "UPSTREAM_FAILED",
            AppError::Database(_) | AppError::Redis(_) | AppError::Internal(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::ForbiddenByPolicy { .. } => StatusCode::FORBIDDEN,
            AppError::CsrfInvalidOrigin | AppError::CsrfInvalidReferer => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::BudgetExceeded { .. } => StatusCode::FORBIDDEN,
            AppError::ApprovalPending { .. } => StatusCode::ACCEPTED,
            AppError::ApprovalRejected
            | AppError::ApprovalAlreadyDecided
            | AppError::SelfApprovalNotAllowed
            | AppError::UnauthorizedApprover => StatusCode::FORBIDDEN,
            AppError::ApprovalExpired => StatusCode::GONE,
            AppError::UpstreamFailed => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Redis(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            AppError::Validation(errs) => Some(json!(errs)),
            AppError::ForbiddenByPolicy {
                resource_type,
                action,
            } => Some(json!({ "by_policy": true, "resource_type": resource_type, "action": action })),
            AppError::ApprovalPending { approval_id } => {
                Some(json!({ "approval_id": approval_id }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if matches!(
            self,
            AppError::Database(_) | AppError::Redis(_) | AppError::Internal(_)
        ) {
            tracing::error!(error = %self, "internal error");
        }

        // CSRF denials use a `{detail, code}` body distinct from the
        // `{"error": {...}}` envelope everything else below produces.
        match &self {
            AppError::CsrfInvalidOrigin => {
                return (
                    StatusCode::FORBIDDEN,
                    Json(json!({
                        "detail": "CSRF validation failed: invalid origin",
                        "code": "CSRF_INVALID_ORIGIN",
                    })),
                )
                    .into_response();
            }
            AppError::CsrfInvalidReferer => {
                return (
                    StatusCode::FORBIDDEN,
                    Json(json!({
                        "detail": "CSRF validation failed: invalid referer",
                        "code": "CSRF_INVALID_REFERER",
                    })),
                )
                    .into_response();
            }
            _ => {}
        }

        let status = self.status();
        let code = self.code();
        let details = self.details();
        let message = self.to_string();
        let retry_after = match &self {
            AppError::RateLimitExceeded { retry_after } => Some(*retry_after),
            _ => None,
        };

        let mut body = json!({
            "error": {
                "code": code,
                "message": message,
            }
        });
        if let Some(details) = details {
            body["error"]["details"] = details;
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(v) = axum::http::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert("retry-after", v);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn csrf_errors_skip_the_generic_envelope() {
        let response = AppError::CsrfInvalidOrigin.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["code"], "CSRF_INVALID_ORIGIN");
        assert_eq!(body["detail"], "CSRF validation failed: invalid origin");
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn other_errors_use_the_generic_envelope() {
        let response = AppError::NotFound("agent not found".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["message"], "agent not found");
    }
}
