use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub port: u16,
    pub env: Environment,
    pub database_url: String,
    pub redis_url: String,
    /// Master key (KEK) for envelope-encrypting credentials/client secrets.
    pub master_key: String,
    /// RS256 private key PEM, used to sign access/refresh JWTs.
    pub jwt_private_key: String,
    /// RS256 public key PEM, used to verify JWTs.
    pub jwt_public_key: String,
    /// Origins allowed by CORS and accepted by the CSRF guard.
    pub cors_origins: Vec<String>,
    /// Default per-user rate limit for JWT-authenticated requests (rpm).
    pub default_jwt_rate_limit: u64,
    pub default_rate_limit_window: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Development,
    Test,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl Config {
    /// Whether the test-header authentication backdoor may be active.
    /// Always false in production, regardless of the `test-hooks` feature.
    pub fn test_hooks_allowed(&self) -> bool {
        cfg!(feature = "test-hooks") && !self.env.is_production()
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let env = match std::env::var("KAIZEN_ENV").as_deref() {
        Ok("production") => Environment::Production,
        Ok("test") => Environment::Test,
        _ => Environment::Development,
    };

    let master_key = std::env::var("KAIZEN_MASTER_KEY")
        .unwrap_or_else(|_| "CHANGE_ME_32_BYTE_HEX_KEY".into());
    let jwt_private_key = std::env::var("KAIZEN_JWT_PRIVATE_KEY")
        .or_else(|_| read_key_file("KAIZEN_JWT_PRIVATE_KEY_PATH"))
        .unwrap_or_default();
    let jwt_public_key = std::env::var("KAIZEN_JWT_PUBLIC_KEY")
        .or_else(|_| read_key_file("KAIZEN_JWT_PUBLIC_KEY_PATH"))
        .unwrap_or_default();

    if master_key == "CHANGE_ME_32_BYTE_HEX_KEY" || jwt_private_key.is_empty() {
        if env.is_production() {
            anyhow::bail!(
                "KAIZEN_MASTER_KEY / KAIZEN_JWT_PRIVATE_KEY are unset or placeholders. \
                 Set real values before running in production."
            );
        }
        eprintln!(
            "⚠️  running with placeholder master key and/or missing JWT keys — \
             fine for local development, refused in production."
        );
    }

    Ok(Config {
        port: std::env::var("KAIZEN_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
        env,
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/kaizen_studio".into()),
        redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
        master_key,
        jwt_private_key,
        jwt_public_key,
        cors_origins: std::env::var("KAIZEN_CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        default_jwt_rate_limit: std::env::var("KAIZEN_DEFAULT_JWT_RPM")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000),
        default_rate_limit_window: std::env::var("KAIZEN_DEFAULT_RPM_WINDOW")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60),
    })
}

fn read_key_file(var: &str) -> Result<String, std::env::VarError> {
    let path = std::env::var(var)?;
    std::fs::read_to_string(&path).map_err(|_| std::env::VarError::NotPresent)
}
