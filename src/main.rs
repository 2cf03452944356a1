use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cache;
mod cli;
mod config;
mod errors;
mod jobs;
mod middleware;
mod models;
mod notification;
mod services;
mod store;
mod vault;

use cache::TieredCache;
use config::Config;
use middleware::GatewayState;
use store::postgres::PgStore;
use vault::builtin::VaultCrypto;

/// Shared application state passed to handlers.
pub struct AppState {
    pub db: PgStore,
    pub vault: VaultCrypto,
    pub cache: TieredCache,
    pub http: reqwest::Client,
    pub webhook: notification::webhook::WebhookNotifier,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "kaizen-studio"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .expect("failed to install OpenTelemetry tracer");
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "kaizen_studio=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::SeedRbac) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_seed_rbac(&db).await
        }
        Some(cli::Commands::ApiKey { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_api_key_command(&db, command).await
        }
        Some(cli::Commands::Policy { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_policy_command(&db, command).await
        }
        Some(cli::Commands::Approval { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_approval_command(&db, command).await
        }
        None => run_server(cfg, 8443).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    tracing::info!("Initializing vault...");
    let vault = VaultCrypto::new(&cfg.master_key)?;

    tracing::info!("Connecting to Redis...");
    let redis_client = redis::Client::open(cfg.redis_url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;
    let cache = TieredCache::new(redis_conn);

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(35))
        .build()?;
    let webhook = notification::webhook::WebhookNotifier::new();
    let config = Arc::new(cfg);

    let gateway_state = GatewayState {
        db: db.clone(),
        cache: cache.clone(),
        config: config.clone(),
    };

    jobs::cleanup::spawn(db.clone());
    tracing::info!("Background lineage retention sweep started");
    jobs::budget_checker::spawn(db.clone());
    tracing::info!("Background budget threshold sweep started");
    jobs::metrics_gauges::spawn(db.clone());
    tracing::info!("Background metrics gauge refresh started");

    let state = Arc::new(AppState {
        db,
        vault,
        cache,
        http,
        webhook,
        config,
    });

    let app = api::api_router(state.clone(), gateway_state)
        .layer(DefaultBodyLimit::max(25 * 1024 * 1024))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Kaizen Studio governance core listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Injects a unique X-Request-Id into every response, so clients can
/// correlate errors with server-side logs, and stamps the same id into the
/// `error.request_id` field of any error envelope (§6) since `AppError`'s
/// `IntoResponse` impl has no access to the per-request id on its own.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let resp = next.run(req).await;
    let is_json = resp
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    let (parts, body) = resp.into_parts();

    let mut resp = if is_json {
        let bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .unwrap_or_default();
        let patched = match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(mut value) => {
                if let Some(error) = value.get_mut("error").and_then(|e| e.as_object_mut()) {
                    error.insert("request_id".into(), serde_json::Value::String(req_id.clone()));
                    serde_json::to_vec(&value).unwrap_or(bytes.to_vec())
                } else {
                    bytes.to_vec()
                }
            }
            Err(_) => bytes.to_vec(),
        };
        let len = patched.len();
        let mut resp = axum::response::Response::from_parts(parts, axum::body::Body::from(patched));
        if let Ok(val) = axum::http::HeaderValue::from_str(&len.to_string()) {
            resp.headers_mut().insert(axum::http::header::CONTENT_LENGTH, val);
        }
        resp
    } else {
        axum::response::Response::from_parts(parts, body)
    };

    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());
    headers.insert("X-Frame-Options", "DENY".parse().unwrap());
    headers.insert("X-XSS-Protection", "1; mode=block".parse().unwrap());
    headers.insert("Cache-Control", "no-store".parse().unwrap());
    headers.insert("Referrer-Policy", "no-referrer".parse().unwrap());
    headers.insert(
        "Permissions-Policy",
        "camera=(), microphone=(), geolocation=()".parse().unwrap(),
    );
    headers.remove("Server");

    resp
}

/// Materializes `middleware::rbac::PERMISSION_MATRIX` into the database so
/// it's introspectable via the API; safe to re-run, `seed_permission` is
/// idempotent on the permission name.
async fn handle_seed_rbac(db: &PgStore) -> anyhow::Result<()> {
    for (role, permissions) in middleware::rbac::PERMISSION_MATRIX.iter() {
        for permission in permissions {
            let (resource, action) = permission
                .split_once(':')
                .unwrap_or((permission, permission));
            db.seed_permission(permission, resource, action, *role)
                .await?;
            println!("seeded {} -> {}", role.as_str(), permission);
        }
    }
    Ok(())
}

async fn handle_api_key_command(db: &PgStore, cmd: cli::ApiKeyCommands) -> anyhow::Result<()> {
    const BCRYPT_COST: u32 = 12;

    match cmd {
        cli::ApiKeyCommands::Issue {
            org_id,
            name,
            scopes,
            rate_limit,
        } => {
            let org_id = uuid::Uuid::parse_str(&org_id).context("invalid org_id")?;
            let plaintext = models::api_key::generate_plaintext_key();
            let key_hash = bcrypt::hash(&plaintext, BCRYPT_COST)?;
            let key_prefix = models::api_key::key_prefix(&plaintext);

            let key = db
                .create_api_key(org_id, &name, &key_hash, &key_prefix, &scopes, rate_limit, None)
                .await?;
            println!("API key created:\n  id:     {}\n  prefix: {}\n  key:    {}", key.id, key.key_prefix, plaintext);
            println!("This is the only time the plaintext key is shown.");
        }
        cli::ApiKeyCommands::List { org_id } => {
            let org_id = uuid::Uuid::parse_str(&org_id).context("invalid org_id")?;
            let keys = db.list_api_keys(org_id).await?;
            if keys.is_empty() {
                println!("No API keys found.");
            } else {
                println!("{:<38} {:<20} {:<10} {:<10}", "ID", "NAME", "PREFIX", "STATUS");
                for k in keys {
                    println!("{:<38} {:<20} {:<10} {:?}", k.id, k.name, k.key_prefix, k.status);
                }
            }
        }
        cli::ApiKeyCommands::Revoke { org_id, id } => {
            let org_id = uuid::Uuid::parse_str(&org_id).context("invalid org_id")?;
            let id = uuid::Uuid::parse_str(&id).context("invalid id")?;
            if db.revoke_api_key(id, org_id).await? {
                println!("API key revoked.");
            } else {
                println!("API key not found or already revoked.");
            }
        }
    }
    Ok(())
}

async fn handle_policy_command(db: &PgStore, cmd: cli::PolicyCommands) -> anyhow::Result<()> {
    use models::policy::{Effect, Policy, PolicyStatus};

    match cmd {
        cli::PolicyCommands::Create {
            org_id,
            resource_type,
            action,
            effect,
            conditions,
            priority,
        } => {
            let org_id = uuid::Uuid::parse_str(&org_id).context("invalid org_id")?;
            let effect = match effect.as_str() {
                "allow" => Effect::Allow,
                "deny" => Effect::Deny,
                other => anyhow::bail!("invalid effect '{other}', expected 'allow' or 'deny'"),
            };
            let conditions: serde_json::Value =
                serde_json::from_str(&conditions).context("invalid conditions JSON")?;

            let now = chrono::Utc::now();
            let policy = Policy {
                id: uuid::Uuid::nil(),
                org_id,
                resource_type,
                action,
                effect,
                conditions,
                resource_refs: None,
                priority,
                status: PolicyStatus::Active,
                created_at: now,
                updated_at: now,
            };
            let created = db.create_policy(&policy).await?;
            println!(
                "Policy created:\n  id:            {}\n  resource_type: {}\n  action:        {}\n  effect:        {:?}",
                created.id, created.resource_type, created.action, created.effect
            );
        }
        cli::PolicyCommands::List { org_id } => {
            let org_id = uuid::Uuid::parse_str(&org_id).context("invalid org_id")?;
            let policies = db.list_policies(org_id).await?;
            if policies.is_empty() {
                println!("No policies found.");
            } else {
                println!("{:<38} {:<20} {:<12} {:<8} {:<8}", "ID", "RESOURCE", "ACTION", "EFFECT", "PRIORITY");
                for p in policies {
                    println!(
                        "{:<38} {:<20} {:<12} {:?} {:<8}",
                        p.id, p.resource_type, p.action, p.effect, p.priority
                    );
                }
            }
        }
        cli::PolicyCommands::Delete { org_id, id } => {
            let org_id = uuid::Uuid::parse_str(&org_id).context("invalid org_id")?;
            let id = uuid::Uuid::parse_str(&id).context("invalid id")?;
            if db.delete_policy(id, org_id).await? {
                println!("Policy deleted.");
            } else {
                println!("Policy not found.");
            }
        }
    }
    Ok(())
}

async fn handle_approval_command(db: &PgStore, cmd: cli::ApprovalCommands) -> anyhow::Result<()> {
    match cmd {
        cli::ApprovalCommands::Decide {
            org_id,
            id,
            reviewer_id,
            approve,
        } => {
            let org_id = uuid::Uuid::parse_str(&org_id).context("invalid org_id")?;
            let id = uuid::Uuid::parse_str(&id).context("invalid id")?;
            let reviewer_id = uuid::Uuid::parse_str(&reviewer_id).context("invalid reviewer_id")?;

            let decided = services::approval::decide(db, id, org_id, reviewer_id, approve)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("Approval {} decided: {:?}", decided.id, decided.status);
        }
    }
    Ok(())
}
