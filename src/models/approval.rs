use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

/// Gates an `ExternalAgentInvocation` that crossed a cost or policy
/// trigger (§4.6). Once a terminal decision is written it is immutable.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub org_id: Uuid,
    pub invocation_id: Uuid,
    pub requested_by: Uuid,
    pub trigger_reason: String,
    pub request_summary: serde_json::Value,
    pub status: ApprovalStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(expires_at: DateTime<Utc>) -> ApprovalRequest {
        ApprovalRequest {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            invocation_id: Uuid::new_v4(),
            requested_by: Uuid::new_v4(),
            trigger_reason: "cost_threshold".into(),
            request_summary: serde_json::json!({}),
            status: ApprovalStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            expires_at,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn expired_once_ttl_passes() {
        let now = Utc::now();
        let req = pending(now - chrono::Duration::seconds(1));
        assert!(req.is_expired(now));
    }

    #[test]
    fn terminal_statuses_are_immutable_markers() {
        assert!(ApprovalStatus::Approved.is_terminal());
        assert!(ApprovalStatus::Rejected.is_terminal());
        assert!(ApprovalStatus::Expired.is_terminal());
        assert!(!ApprovalStatus::Pending.is_terminal());
    }
}
