//! Approval lifecycle orchestration (§4.6).
//!
//! `PgStore::decide_approval`'s `WHERE status = 'pending'` clause makes the
//! "once terminal, immutable" rule atomic at the database level; this
//! module adds the checks that need to read the row first (self-approval,
//! expiry) before attempting the write.

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::middleware::rbac::role_has_permission;
use crate::models::approval::{ApprovalRequest, ApprovalStatus};
use crate::store::postgres::PgStore;

pub const DEFAULT_APPROVAL_TTL_MINUTES: i64 = 30;

pub async fn request_approval(
    db: &PgStore,
    org_id: Uuid,
    invocation_id: Uuid,
    requested_by: Uuid,
    trigger_reason: &str,
    request_summary: serde_json::Value,
) -> Result<ApprovalRequest, AppError> {
    db.create_approval_request(
        org_id,
        invocation_id,
        requested_by,
        trigger_reason,
        request_summary,
        Duration::minutes(DEFAULT_APPROVAL_TTL_MINUTES),
    )
    .await
    .map_err(AppError::from)
}

/// Applies approve/reject, rejecting self-approval and decisions on an
/// expired or already-terminal request.
pub async fn decide(
    db: &PgStore,
    id: Uuid,
    org_id: Uuid,
    reviewer_id: Uuid,
    approve: bool,
) -> Result<ApprovalRequest, AppError> {
    let approval = db
        .get_approval(id, org_id)
        .await?
        .ok_or_else(|| AppError::NotFound("approval request not found".into()))?;

    let reviewer_role = db
        .get_user_role_in_org(reviewer_id, org_id)
        .await?
        .ok_or(AppError::UnauthorizedApprover)?;
    if !role_has_permission(reviewer_role, "approvals:decide") {
        return Err(AppError::UnauthorizedApprover);
    }
    if approval.requested_by == reviewer_id {
        return Err(AppError::SelfApprovalNotAllowed);
    }
    if approval.is_expired(Utc::now()) {
        return Err(AppError::ApprovalExpired);
    }
    if approval.status != ApprovalStatus::Pending {
        return Err(AppError::ApprovalAlreadyDecided);
    }

    let decision = if approve {
        ApprovalStatus::Approved
    } else {
        ApprovalStatus::Rejected
    };

    // The WHERE-pending guard on the UPDATE means a lost race (concurrent
    // decide, or the expiry sweep winning first) surfaces here rather than
    // silently overwriting a decision already made.
    let applied = db.decide_approval(id, org_id, reviewer_id, decision).await?;
    if !applied {
        return Err(AppError::ApprovalAlreadyDecided);
    }

    db.get_approval(id, org_id)
        .await?
        .ok_or_else(|| AppError::NotFound("approval request not found".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_owned_by(requested_by: Uuid) -> ApprovalRequest {
        ApprovalRequest {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            invocation_id: Uuid::new_v4(),
            requested_by,
            trigger_reason: "cost_threshold".into(),
            request_summary: serde_json::json!({}),
            status: ApprovalStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            expires_at: Utc::now() + Duration::minutes(30),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn self_approval_check_is_identity_based() {
        let requester = Uuid::new_v4();
        let approval = pending_owned_by(requester);
        assert_eq!(approval.requested_by, requester);
    }

    #[test]
    fn only_org_owner_and_org_admin_hold_approvals_decide() {
        use crate::models::identity::Role;
        assert!(role_has_permission(Role::OrgOwner, "approvals:decide"));
        assert!(role_has_permission(Role::OrgAdmin, "approvals:decide"));
        assert!(!role_has_permission(Role::Developer, "approvals:decide"));
        assert!(!role_has_permission(Role::Viewer, "approvals:decide"));
    }
}
