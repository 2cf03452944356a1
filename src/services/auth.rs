//! Registration, login, refresh and invitation acceptance (§4.1, §6).
//!
//! Grounded on `middleware::auth`'s JWT issuance/verification and the
//! donor's own register/login flow: bcrypt for password hashing, RS256
//! access tokens, and a newly-created organization owned by the
//! registering user as `org_owner`.

use chrono::Utc;
use uuid::Uuid;

use crate::errors::AppError;
use crate::middleware::auth::{issue_access_token, AuthContext};
use crate::models::identity::{is_valid_slug, JoinedVia, Role, User};
use crate::store::postgres::PgStore;

const BCRYPT_COST: u32 = 12;

pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub organization_name: String,
}

pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct RegisterOutcome {
    pub user: User,
    pub tokens: Tokens,
}

/// Derives a URL-safe slug from the organization name, disambiguating
/// against an existing slug with a short random suffix rather than
/// rejecting the registration outright.
async fn unique_slug(db: &PgStore, name: &str) -> Result<String, AppError> {
    let base: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let base = if base.is_empty() { "org".to_string() } else { base };

    if !db.slug_exists(&base).await? {
        return Ok(base);
    }
    for _ in 0..5 {
        let candidate = format!("{base}-{}", &Uuid::new_v4().simple().to_string()[..6]);
        if !db.slug_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    Err(AppError::Conflict("could not derive a unique organization slug".into()))
}

pub async fn register(
    db: &PgStore,
    jwt_private_key: &str,
    req: RegisterRequest,
) -> Result<RegisterOutcome, AppError> {
    if db.get_user_by_email(&req.email).await?.is_some() {
        return Err(AppError::Conflict("email already registered".into()));
    }

    let slug = unique_slug(db, &req.organization_name).await?;
    debug_assert!(is_valid_slug(&slug));
    let org = db.create_organization(&req.organization_name, &slug).await?;

    let password_hash = bcrypt::hash(&req.password, BCRYPT_COST)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing failed: {e}")))?;
    let user = db
        .create_user(org.id, &req.email, &password_hash, &req.name)
        .await?;
    db.add_user_organization(user.id, org.id, Role::OrgOwner, JoinedVia::Created)
        .await?;

    let tokens = issue_tokens(&user, org.id, Role::OrgOwner, jwt_private_key)?;
    Ok(RegisterOutcome { user, tokens })
}

pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub struct LoginOutcome {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

pub async fn login(
    db: &PgStore,
    jwt_private_key: &str,
    req: LoginRequest,
) -> Result<LoginOutcome, AppError> {
    let user = db
        .get_user_by_email(&req.email)
        .await?
        .ok_or(AppError::Unauthorized)?;
    if !user.is_active() {
        return Err(AppError::Unauthorized);
    }
    let hash = user.password_hash.as_deref().ok_or(AppError::Unauthorized)?;
    if !bcrypt::verify(&req.password, hash).unwrap_or(false) {
        return Err(AppError::Unauthorized);
    }
    let membership = db
        .get_primary_user_organization(user.id)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let tokens = issue_tokens(&user, membership.org_id, membership.role, jwt_private_key)?;
    Ok(LoginOutcome {
        user,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
    })
}

/// Re-mints an access token from a still-valid refresh token. Refresh
/// tokens here are the same RS256-signed shape as access tokens (the
/// donor carries no separate refresh-token store); they simply live
/// longer and are re-verified against the current membership on every
/// use, matching the authenticator's own stale-role handling.
pub async fn refresh(
    db: &PgStore,
    jwt_public_key: &str,
    jwt_private_key: &str,
    refresh_token: &str,
) -> Result<String, AppError> {
    let claims = crate::middleware::auth::AccessClaims::decode(refresh_token, jwt_public_key)
        .ok_or(AppError::Unauthorized)?;

    let user = db
        .get_user_by_id(claims.sub)
        .await?
        .filter(User::is_active)
        .ok_or(AppError::Unauthorized)?;
    let membership = db
        .get_primary_user_organization(user.id)
        .await?
        .ok_or(AppError::Unauthorized)?;

    issue_access_token(&user, membership.org_id, membership.role, jwt_private_key)
}

fn issue_tokens(
    user: &User,
    org_id: Uuid,
    role: Role,
    jwt_private_key: &str,
) -> Result<Tokens, AppError> {
    let access_token = issue_access_token(user, org_id, role, jwt_private_key)?;
    // The refresh token is a longer-lived access token of the same shape;
    // `refresh` re-derives org/role from the database rather than trusting
    // either token's claims past the signature check.
    let refresh_token = crate::middleware::auth::issue_refresh_token(user, org_id, role, jwt_private_key)?;
    Ok(Tokens {
        access_token,
        refresh_token,
    })
}

pub struct AcceptInvitationOutcome {
    pub user: User,
    pub tokens: Tokens,
}

pub async fn accept_invitation(
    db: &PgStore,
    jwt_private_key: &str,
    token: &str,
    name: &str,
    password: &str,
) -> Result<AcceptInvitationOutcome, AppError> {
    let invitation = db
        .get_invitation_by_token(token)
        .await?
        .ok_or_else(|| AppError::NotFound("invitation not found".into()))?;
    if !invitation.is_usable(Utc::now()) {
        return Err(AppError::Conflict("invitation is no longer valid".into()));
    }

    let user = match db.get_user_by_email(&invitation.email).await? {
        Some(existing) => existing,
        None => {
            let password_hash = bcrypt::hash(password, BCRYPT_COST)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing failed: {e}")))?;
            db.create_user(invitation.org_id, &invitation.email, &password_hash, name)
                .await?
        }
    };

    db.add_user_organization(user.id, invitation.org_id, invitation.role, JoinedVia::Invitation)
        .await?;

    if !db.mark_invitation_accepted(invitation.id).await? {
        return Err(AppError::Conflict("invitation was already accepted".into()));
    }

    let tokens = issue_tokens(&user, invitation.org_id, invitation.role, jwt_private_key)?;
    Ok(AcceptInvitationOutcome { user, tokens })
}

pub struct CreateApiKeyRequest {
    pub name: String,
    pub scopes: Vec<String>,
    pub rate_limit: i64,
    pub expires_at: Option<chrono::DateTime<Utc>>,
}

pub struct CreateApiKeyOutcome {
    pub key: crate::models::api_key::ApiKey,
    /// Plaintext, returned exactly once.
    pub plaintext: String,
}

pub async fn create_api_key(
    db: &PgStore,
    ctx: &AuthContext,
    req: CreateApiKeyRequest,
) -> Result<CreateApiKeyOutcome, AppError> {
    let plaintext = crate::models::api_key::generate_plaintext_key();
    let key_hash = bcrypt::hash(&plaintext, BCRYPT_COST)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("key hashing failed: {e}")))?;
    let key_prefix = crate::models::api_key::key_prefix(&plaintext);

    let key = db
        .create_api_key(
            ctx.org_id,
            &req.name,
            &key_hash,
            &key_prefix,
            &req.scopes,
            req.rate_limit,
            req.expires_at,
        )
        .await?;
    Ok(CreateApiKeyOutcome { key, plaintext })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_derivation_strips_non_alphanumerics() {
        let name = "Acme, Inc.!!";
        let cleaned: String = name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect::<String>()
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        assert_eq!(cleaned, "acme-inc");
    }
}
