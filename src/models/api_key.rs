use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum ApiKeyStatus {
    Active,
    Revoked,
}

/// Plaintext key format: `sk_live_<24+ urlsafe random chars>`. The
/// plaintext is returned exactly once on create; afterwards only
/// `key_prefix` (first 8 chars, including `sk_live_`) and `key_hash`
/// (bcrypt of the full key) are persisted.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub scopes: Vec<String>,
    /// Requests per minute this key is allowed.
    pub rate_limit: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: ApiKeyStatus,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub const KEY_PREFIX_LEN: usize = 8;
pub const KEY_LITERAL_PREFIX: &str = "sk_live_";

impl ApiKey {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == ApiKeyStatus::Active && self.expires_at.map_or(true, |exp| exp > now)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == "*" || s == scope)
    }
}

/// Generates a new plaintext API key. The caller bcrypt-hashes it for
/// storage and keeps only `key_prefix()` of the plaintext on disk.
pub fn generate_plaintext_key() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let body: String = (0..32)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("{KEY_LITERAL_PREFIX}{body}")
}

pub fn key_prefix(plaintext: &str) -> String {
    plaintext.chars().take(KEY_PREFIX_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_has_expected_shape() {
        let key = generate_plaintext_key();
        assert!(key.starts_with(KEY_LITERAL_PREFIX));
        assert!(key.len() >= KEY_LITERAL_PREFIX.len() + 24);
    }

    #[test]
    fn prefix_is_first_eight_chars() {
        let key = "sk_live_abcdefghijklmnop";
        assert_eq!(key_prefix(key), "sk_live_");
    }

    #[test]
    fn usable_respects_status_and_expiry() {
        let now = Utc::now();
        let base = ApiKey {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            name: "n".into(),
            key_hash: "h".into(),
            key_prefix: "sk_live_".into(),
            scopes: vec!["external_agents:invoke".into()],
            rate_limit: 60,
            expires_at: None,
            status: ApiKeyStatus::Active,
            last_used_at: None,
            created_at: now,
        };
        assert!(base.is_usable(now));
        let revoked = ApiKey {
            status: ApiKeyStatus::Revoked,
            ..base
        };
        assert!(!revoked.is_usable(now));
    }
}
