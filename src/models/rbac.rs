use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::Role;

/// A permission name is always `resource:action`, possibly with a
/// `resource:*` wildcard action. Seeded once per deployment from the
/// declarative matrix in `middleware::rbac`.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Permission {
    pub id: Uuid,
    /// `resource:action`, unique.
    pub name: String,
    pub resource: String,
    pub action: String,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct RolePermission {
    pub role: Role,
    pub permission_id: Uuid,
    pub granted_at: DateTime<Utc>,
}
