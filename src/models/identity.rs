use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum OrgStatus {
    Active,
    Suspended,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Pro,
    Enterprise,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    /// `[a-z0-9-]+`, unique.
    pub slug: String,
    pub status: OrgStatus,
    pub plan_tier: PlanTier,
    pub sso_domain: Option<String>,
    pub allow_domain_join: bool,
    pub settings: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn is_active(&self) -> bool {
        self.status == OrgStatus::Active
    }
}

/// Validates the slug shape spec requires: lowercase letters, digits, hyphens.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum DefaultRole {
    Developer,
    Viewer,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrganizationDomain {
    pub id: Uuid,
    pub org_id: Uuid,
    pub domain: String,
    pub is_verified: bool,
    pub verification_method: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub auto_join_enabled: bool,
    pub default_role: DefaultRole,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Invited,
    Suspended,
    Deleted,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    /// Legacy single-org pointer; current membership lives in `UserOrganization`.
    pub org_id: Option<Uuid>,
    pub email: String,
    /// Absent for SSO-only users.
    pub password_hash: Option<String>,
    pub name: String,
    pub status: UserStatus,
    /// Legacy role column, superseded by `UserOrganization::role` per membership.
    pub role: Option<String>,
    pub mfa_enabled: bool,
    pub is_super_admin: bool,
    pub primary_organization_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// Roles ordered by containment: `org_owner` ⊃ `org_admin` ⊃ `developer` ⊃ `viewer`.
/// `tenant_admin` is a platform-cross-org role, never assignable by org admins
/// (see DESIGN.md Open Question decisions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum Role {
    TenantAdmin,
    OrgOwner,
    OrgAdmin,
    Developer,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::TenantAdmin => "tenant_admin",
            Role::OrgOwner => "org_owner",
            Role::OrgAdmin => "org_admin",
            Role::Developer => "developer",
            Role::Viewer => "viewer",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "tenant_admin" => Some(Role::TenantAdmin),
            "org_owner" => Some(Role::OrgOwner),
            "org_admin" => Some(Role::OrgAdmin),
            "developer" => Some(Role::Developer),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum JoinedVia {
    Invitation,
    Sso,
    DomainMatch,
    Created,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserOrganization {
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub role: Role,
    pub is_primary: bool,
    pub joined_via: JoinedVia,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Expired,
}

/// Default invitation TTL per spec §3.
pub const INVITATION_TTL_DAYS: i64 = 7;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invitation {
    pub id: Uuid,
    pub org_id: Uuid,
    pub email: String,
    pub role: Role,
    pub invited_by: Uuid,
    /// Single-use, unpredictable secret. Never logged.
    pub token: String,
    pub status: InvitationStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Invitation {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == InvitationStatus::Pending && self.expires_at > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum SsoProvider {
    Azure,
    Google,
    Okta,
    Auth0,
    Custom,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct SsoConnection {
    pub id: Uuid,
    pub org_id: Uuid,
    pub provider: SsoProvider,
    pub client_id: String,
    /// AES-256-GCM envelope ciphertext; see `vault::builtin`.
    pub client_secret_encrypted: Vec<u8>,
    pub is_default: bool,
    pub auto_provision: bool,
    pub default_role: Role,
    pub allowed_domains: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserIdentity {
    pub user_id: Uuid,
    pub provider: String,
    /// Unique per provider: (provider, provider_user_id) is the natural key.
    pub provider_user_id: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_validation() {
        assert!(is_valid_slug("integrum-global"));
        assert!(is_valid_slug("acme123"));
        assert!(!is_valid_slug("Acme Global"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("has_underscore"));
    }

    #[test]
    fn role_roundtrip() {
        for r in ["tenant_admin", "org_owner", "org_admin", "developer", "viewer"] {
            assert_eq!(Role::parse(r).unwrap().as_str(), r);
        }
        assert!(Role::parse("bogus").is_none());
    }

    #[test]
    fn invitation_usable_only_while_pending_and_unexpired() {
        let now = Utc::now();
        let inv = Invitation {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            email: "a@b.com".into(),
            role: Role::Developer,
            invited_by: Uuid::new_v4(),
            token: "tok".into(),
            status: InvitationStatus::Pending,
            expires_at: now + chrono::Duration::days(1),
            created_at: now,
        };
        assert!(inv.is_usable(now));
        let expired = Invitation {
            expires_at: now - chrono::Duration::seconds(1),
            ..inv
        };
        assert!(!expired.is_usable(now));
    }
}
