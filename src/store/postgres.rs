use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::api_key::{ApiKey, ApiKeyStatus};
use crate::models::approval::{ApprovalRequest, ApprovalStatus};
use crate::models::audit::AuditLog;
use crate::models::budget::{Budget, UsageQuota, UsageRecord};
use crate::models::external_agent::{ExternalAgent, ExternalAgentInvocation, WebhookDeliveryStatus};
use crate::models::identity::{Invitation, JoinedVia, Organization, Role, User, UserOrganization};
use crate::models::lineage::InvocationLineage;
use crate::models::policy::Policy;
use crate::models::rbac::Permission;
use crate::models::run::{Run, RunStatus};
use crate::models::webhook::{DeliveryStatus, Webhook, WebhookDelivery};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

/// Filters accepted by `GET /audit/logs` (§6).
#[derive(Debug, Default)]
pub struct AuditLogFilter {
    pub org_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // ── Organizations ────────────────────────────────────────────────

    pub async fn create_organization(&self, name: &str, slug: &str) -> anyhow::Result<Organization> {
        let org = sqlx::query_as::<_, Organization>(
            r#"INSERT INTO organizations (name, slug) VALUES ($1, $2)
               RETURNING id, name, slug, status, plan_tier, sso_domain, allow_domain_join, settings, created_at, updated_at"#,
        )
        .bind(name)
        .bind(slug)
        .fetch_one(&self.pool)
        .await?;
        Ok(org)
    }

    pub async fn get_organization(&self, id: Uuid) -> anyhow::Result<Option<Organization>> {
        let org = sqlx::query_as::<_, Organization>(
            "SELECT id, name, slug, status, plan_tier, sso_domain, allow_domain_join, settings, created_at, updated_at FROM organizations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(org)
    }

    pub async fn slug_exists(&self, slug: &str) -> anyhow::Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM organizations WHERE slug = $1)")
            .bind(slug)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    // ── Users / membership ───────────────────────────────────────────

    pub async fn create_user(
        &self,
        org_id: Uuid,
        email: &str,
        password_hash: &str,
        name: &str,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"INSERT INTO users (org_id, email, password_hash, name, primary_organization_id)
               VALUES ($1, $2, $3, $4, $1)
               RETURNING id, org_id, email, password_hash, name, status, role, mfa_enabled, is_super_admin, primary_organization_id, created_at, updated_at"#,
        )
        .bind(org_id)
        .bind(email)
        .bind(password_hash)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn get_user_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, org_id, email, password_hash, name, status, role, mfa_enabled, is_super_admin, primary_organization_id, created_at, updated_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn get_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, org_id, email, password_hash, name, status, role, mfa_enabled, is_super_admin, primary_organization_id, created_at, updated_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn add_user_organization(
        &self,
        user_id: Uuid,
        org_id: Uuid,
        role: Role,
        joined_via: JoinedVia,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO user_organizations (user_id, org_id, role, is_primary, joined_via)
               VALUES ($1, $2, $3, true, $4)
               ON CONFLICT (user_id, org_id) DO UPDATE SET role = EXCLUDED.role"#,
        )
        .bind(user_id)
        .bind(org_id)
        .bind(role)
        .bind(joined_via)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The membership row the authenticator trusts for `db.role`/`db.org_id`
    /// comparisons (§4.1 stale-JWT detection).
    pub async fn get_primary_user_organization(&self, user_id: Uuid) -> anyhow::Result<Option<UserOrganization>> {
        let membership = sqlx::query_as::<_, UserOrganization>(
            "SELECT user_id, org_id, role, is_primary, joined_via, created_at FROM user_organizations WHERE user_id = $1 AND is_primary = true",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(membership)
    }

    /// A user's role within a specific org, regardless of which org is
    /// their primary one — used to check approval authority (§4.6), since
    /// the reviewer need not be acting in their primary org.
    pub async fn get_user_role_in_org(&self, user_id: Uuid, org_id: Uuid) -> anyhow::Result<Option<Role>> {
        let role: Option<Role> = sqlx::query_scalar(
            "SELECT role FROM user_organizations WHERE user_id = $1 AND org_id = $2",
        )
        .bind(user_id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(role)
    }

    // ── Invitations ──────────────────────────────────────────────────

    pub async fn create_invitation(
        &self,
        org_id: Uuid,
        email: &str,
        role: Role,
        invited_by: Uuid,
        token: &str,
        ttl_days: i64,
    ) -> anyhow::Result<Invitation> {
        let invitation = sqlx::query_as::<_, Invitation>(
            r#"INSERT INTO invitations (org_id, email, role, invited_by, token, expires_at)
               VALUES ($1, $2, $3, $4, $5, now() + ($6 || ' days')::interval)
               RETURNING id, org_id, email, role, invited_by, token, status, expires_at, created_at"#,
        )
        .bind(org_id)
        .bind(email)
        .bind(role)
        .bind(invited_by)
        .bind(token)
        .bind(ttl_days.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(invitation)
    }

    pub async fn get_invitation_by_token(&self, token: &str) -> anyhow::Result<Option<Invitation>> {
        let invitation = sqlx::query_as::<_, Invitation>(
            "SELECT id, org_id, email, role, invited_by, token, status, expires_at, created_at FROM invitations WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invitation)
    }

    /// Marks the invitation accepted iff it is still pending — the
    /// `WHERE status = 'pending'` clause is what makes accept-at-most-once
    /// (§8) atomic against concurrent accepts.
    pub async fn mark_invitation_accepted(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE invitations SET status = 'accepted' WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn expire_stale_invitations(&self) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE invitations SET status = 'expired' WHERE status = 'pending' AND expires_at < now()",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_pending_invitations(&self) -> anyhow::Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT count(*) FROM invitations WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// "Active" here means present in `users` at all — there's no
    /// separate deactivation flag on the current model, so this is a
    /// total headcount gauge, not a last-seen-recently one.
    pub async fn count_active_users(&self) -> anyhow::Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ── API keys ─────────────────────────────────────────────────────

    pub async fn create_api_key(
        &self,
        org_id: Uuid,
        name: &str,
        key_hash: &str,
        key_prefix: &str,
        scopes: &[String],
        rate_limit: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<ApiKey> {
        let key = sqlx::query_as::<_, ApiKey>(
            r#"INSERT INTO api_keys (org_id, name, key_hash, key_prefix, scopes, rate_limit, expires_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING id, org_id, name, key_hash, key_prefix, scopes, rate_limit, expires_at, status, last_used_at, created_at"#,
        )
        .bind(org_id)
        .bind(name)
        .bind(key_hash)
        .bind(key_prefix)
        .bind(scopes)
        .bind(rate_limit)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(key)
    }

    /// Candidates sharing `key_prefix`; caller bcrypt-verifies each against
    /// the plaintext (prefix collisions across orgs are expected to be rare
    /// but not impossible with an 8-char prefix).
    pub async fn get_api_keys_by_prefix(&self, prefix: &str) -> anyhow::Result<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>(
            "SELECT id, org_id, name, key_hash, key_prefix, scopes, rate_limit, expires_at, status, last_used_at, created_at FROM api_keys WHERE key_prefix = $1",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    pub async fn touch_api_key_last_used(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_api_keys(&self, org_id: Uuid) -> anyhow::Result<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>(
            "SELECT id, org_id, name, key_hash, key_prefix, scopes, rate_limit, expires_at, status, last_used_at, created_at FROM api_keys WHERE org_id = $1 ORDER BY created_at DESC",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    pub async fn revoke_api_key(&self, id: Uuid, org_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE api_keys SET status = 'revoked' WHERE id = $1 AND org_id = $2 AND status = 'active'",
        )
        .bind(id)
        .bind(org_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    // ── RBAC seed ────────────────────────────────────────────────────

    /// Materializes the in-memory permission matrix (`middleware::rbac`)
    /// into `permissions`/`role_permissions` so it can be introspected via
    /// the API; idempotent on `permissions.name`.
    pub async fn seed_permission(&self, name: &str, resource: &str, action: &str, role: Role) -> anyhow::Result<()> {
        let permission = sqlx::query_as::<_, Permission>(
            r#"INSERT INTO permissions (name, resource, action) VALUES ($1, $2, $3)
               ON CONFLICT (name) DO UPDATE SET resource = EXCLUDED.resource
               RETURNING id, name, resource, action"#,
        )
        .bind(name)
        .bind(resource)
        .bind(action)
        .fetch_one(&self.pool)
        .await?;

        sqlx::query(
            "INSERT INTO role_permissions (role, permission_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(role)
        .bind(permission.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── Policies (ABAC) ──────────────────────────────────────────────

    pub async fn create_policy(&self, policy: &Policy) -> anyhow::Result<Policy> {
        let created = sqlx::query_as::<_, Policy>(
            r#"INSERT INTO policies (org_id, resource_type, action, effect, conditions, resource_refs, priority, status)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING id, org_id, resource_type, action, effect, conditions, resource_refs, priority, status, created_at, updated_at"#,
        )
        .bind(policy.org_id)
        .bind(&policy.resource_type)
        .bind(&policy.action)
        .bind(policy.effect)
        .bind(&policy.conditions)
        .bind(&policy.resource_refs)
        .bind(policy.priority)
        .bind(policy.status)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    /// Policies applicable to `(resource_type, action)`, active only,
    /// ordered by descending priority (§4.3).
    pub async fn active_policies_for(
        &self,
        org_id: Uuid,
        resource_type: &str,
        action: &str,
    ) -> anyhow::Result<Vec<Policy>> {
        let policies = sqlx::query_as::<_, Policy>(
            r#"SELECT id, org_id, resource_type, action, effect, conditions, resource_refs, priority, status, created_at, updated_at
               FROM policies
               WHERE org_id = $1 AND resource_type = $2 AND action = $3 AND status = 'active'
               ORDER BY priority DESC"#,
        )
        .bind(org_id)
        .bind(resource_type)
        .bind(action)
        .fetch_all(&self.pool)
        .await?;
        Ok(policies)
    }

    pub async fn list_policies(&self, org_id: Uuid) -> anyhow::Result<Vec<Policy>> {
        let policies = sqlx::query_as::<_, Policy>(
            "SELECT id, org_id, resource_type, action, effect, conditions, resource_refs, priority, status, created_at, updated_at FROM policies WHERE org_id = $1 ORDER BY priority DESC",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(policies)
    }

    pub async fn delete_policy(&self, id: Uuid, org_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM policies WHERE id = $1 AND org_id = $2")
            .bind(id)
            .bind(org_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    // ── External agents ──────────────────────────────────────────────

    pub async fn create_external_agent(&self, agent: &ExternalAgent) -> anyhow::Result<ExternalAgent> {
        let created = sqlx::query_as::<_, ExternalAgent>(
            r#"INSERT INTO external_agents
               (org_id, workspace_id, name, platform, auth_type, encrypted_credentials, platform_config, webhook_url, budget_limit_daily, budget_limit_monthly, rate_limit_per_minute, rate_limit_per_hour, status)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
               RETURNING id, org_id, workspace_id, name, platform, auth_type, encrypted_credentials, platform_config, webhook_url, budget_limit_daily, budget_limit_monthly, rate_limit_per_minute, rate_limit_per_hour, status, created_at, updated_at"#,
        )
        .bind(agent.org_id)
        .bind(agent.workspace_id)
        .bind(&agent.name)
        .bind(agent.platform)
        .bind(&agent.auth_type)
        .bind(&agent.encrypted_credentials)
        .bind(&agent.platform_config)
        .bind(&agent.webhook_url)
        .bind(agent.budget_limit_daily)
        .bind(agent.budget_limit_monthly)
        .bind(agent.rate_limit_per_minute)
        .bind(agent.rate_limit_per_hour)
        .bind(agent.status)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    pub async fn get_external_agent(&self, id: Uuid, org_id: Uuid) -> anyhow::Result<Option<ExternalAgent>> {
        let agent = sqlx::query_as::<_, ExternalAgent>(
            "SELECT id, org_id, workspace_id, name, platform, auth_type, encrypted_credentials, platform_config, webhook_url, budget_limit_daily, budget_limit_monthly, rate_limit_per_minute, rate_limit_per_hour, status, created_at, updated_at FROM external_agents WHERE id = $1 AND org_id = $2",
        )
        .bind(id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(agent)
    }

    pub async fn list_external_agents(&self, org_id: Uuid) -> anyhow::Result<Vec<ExternalAgent>> {
        let agents = sqlx::query_as::<_, ExternalAgent>(
            "SELECT id, org_id, workspace_id, name, platform, auth_type, encrypted_credentials, platform_config, webhook_url, budget_limit_daily, budget_limit_monthly, rate_limit_per_minute, rate_limit_per_hour, status, created_at, updated_at FROM external_agents WHERE org_id = $1 AND status != 'deleted' ORDER BY created_at DESC",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(agents)
    }

    // ── Budgets / usage ──────────────────────────────────────────────

    pub async fn get_budget(&self, external_agent_id: Uuid) -> anyhow::Result<Option<Budget>> {
        let budget = sqlx::query_as::<_, Budget>(
            "SELECT external_agent_id, period, max_cost_per_period, max_tokens_per_period, max_invocations_per_period, thresholds, enforcement_mode, rollover_unused, input_token_rate, output_token_rate, base_cost_per_invocation, timezone FROM budgets WHERE external_agent_id = $1",
        )
        .bind(external_agent_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(budget)
    }

    pub async fn upsert_budget(&self, budget: &Budget) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO budgets
               (external_agent_id, period, max_cost_per_period, max_tokens_per_period, max_invocations_per_period, thresholds, enforcement_mode, rollover_unused, input_token_rate, output_token_rate, base_cost_per_invocation, timezone)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
               ON CONFLICT (external_agent_id) DO UPDATE SET
                 period = EXCLUDED.period, max_cost_per_period = EXCLUDED.max_cost_per_period,
                 max_tokens_per_period = EXCLUDED.max_tokens_per_period,
                 max_invocations_per_period = EXCLUDED.max_invocations_per_period,
                 thresholds = EXCLUDED.thresholds, enforcement_mode = EXCLUDED.enforcement_mode,
                 rollover_unused = EXCLUDED.rollover_unused, input_token_rate = EXCLUDED.input_token_rate,
                 output_token_rate = EXCLUDED.output_token_rate, base_cost_per_invocation = EXCLUDED.base_cost_per_invocation,
                 timezone = EXCLUDED.timezone"#,
        )
        .bind(budget.external_agent_id)
        .bind(budget.period)
        .bind(budget.max_cost_per_period)
        .bind(budget.max_tokens_per_period)
        .bind(budget.max_invocations_per_period)
        .bind(&budget.thresholds)
        .bind(budget.enforcement_mode)
        .bind(budget.rollover_unused)
        .bind(budget.input_token_rate)
        .bind(budget.output_token_rate)
        .bind(budget.base_cost_per_invocation)
        .bind(&budget.timezone)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All configured budgets joined with their agent's org, for the
    /// periodic threshold sweep (`jobs::budget_checker`) rather than the
    /// single-agent pre-check path.
    pub async fn list_budgets_with_org(&self) -> anyhow::Result<Vec<(Uuid, Budget)>> {
        use sqlx::Row;

        let rows = sqlx::query(
            r#"SELECT ea.org_id AS org_id, b.external_agent_id, b.period, b.max_cost_per_period,
                      b.max_tokens_per_period, b.max_invocations_per_period, b.thresholds,
                      b.enforcement_mode, b.rollover_unused, b.input_token_rate,
                      b.output_token_rate, b.base_cost_per_invocation, b.timezone
               FROM budgets b
               JOIN external_agents ea ON ea.id = b.external_agent_id
               WHERE ea.status != 'deleted'"#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let org_id: Uuid = row.try_get("org_id")?;
                let budget = Budget {
                    external_agent_id: row.try_get("external_agent_id")?,
                    period: row.try_get("period")?,
                    max_cost_per_period: row.try_get("max_cost_per_period")?,
                    max_tokens_per_period: row.try_get("max_tokens_per_period")?,
                    max_invocations_per_period: row.try_get("max_invocations_per_period")?,
                    thresholds: row.try_get("thresholds")?,
                    enforcement_mode: row.try_get("enforcement_mode")?,
                    rollover_unused: row.try_get("rollover_unused")?,
                    input_token_rate: row.try_get("input_token_rate")?,
                    output_token_rate: row.try_get("output_token_rate")?,
                    base_cost_per_invocation: row.try_get("base_cost_per_invocation")?,
                    timezone: row.try_get("timezone")?,
                };
                Ok((org_id, budget))
            })
            .collect::<anyhow::Result<Vec<_>>>()
    }

    /// Aggregates `usage_records` within `[start, end)` for the pre-check
    /// (§4.5). Returns zeros, not an error, when there is no usage yet.
    pub async fn usage_in_period(
        &self,
        external_agent_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<UsageQuota> {
        #[derive(sqlx::FromRow)]
        struct Row {
            total_cost: Option<rust_decimal::Decimal>,
            total_tokens: Option<i64>,
            total_invocations: Option<i64>,
        }

        let row = sqlx::query_as::<_, Row>(
            r#"SELECT
                 COALESCE(SUM(total_cost), 0) AS total_cost,
                 COALESCE(SUM(quantity) FILTER (WHERE unit = 'token'), 0)::bigint AS total_tokens,
                 COUNT(*)::bigint AS total_invocations
               FROM usage_records
               WHERE external_agent_id = $1 AND recorded_at >= $2 AND recorded_at < $3"#,
        )
        .bind(external_agent_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok(UsageQuota {
            cost: row.total_cost.unwrap_or_default(),
            tokens: row.total_tokens.unwrap_or(0),
            invocations: row.total_invocations.unwrap_or(0),
        })
    }

    pub async fn insert_usage_record(&self, record: &UsageRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO usage_records (id, org_id, external_agent_id, resource_type, quantity, unit, unit_cost, total_cost, recorded_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(record.id)
        .bind(record.org_id)
        .bind(record.external_agent_id)
        .bind(&record.resource_type)
        .bind(record.quantity)
        .bind(&record.unit)
        .bind(record.unit_cost)
        .bind(record.total_cost)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── Invocations ──────────────────────────────────────────────────

    /// Written with `status=pending` before the upstream call (§4.7 step 7)
    /// so a crash mid-dispatch still leaves a row.
    pub async fn insert_invocation(&self, invocation: &ExternalAgentInvocation) -> anyhow::Result<ExternalAgentInvocation> {
        let row = sqlx::query_as::<_, ExternalAgentInvocation>(
            r#"INSERT INTO external_agent_invocations
               (id, org_id, external_agent_id, user_id, request_payload, request_ip, request_user_agent, auth_passed, budget_passed, rate_limit_passed, status, trace_id)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
               RETURNING id, org_id, external_agent_id, user_id, request_payload, request_ip, request_user_agent, response_payload, response_status_code, execution_time_ms, auth_passed, budget_passed, rate_limit_passed, status, trace_id, webhook_delivery_status, invoked_at, completed_at"#,
        )
        .bind(invocation.id)
        .bind(invocation.org_id)
        .bind(invocation.external_agent_id)
        .bind(invocation.user_id)
        .bind(&invocation.request_payload)
        .bind(&invocation.request_ip)
        .bind(&invocation.request_user_agent)
        .bind(invocation.auth_passed)
        .bind(invocation.budget_passed)
        .bind(invocation.rate_limit_passed)
        .bind(invocation.status)
        .bind(&invocation.trace_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn complete_invocation(
        &self,
        id: Uuid,
        status: crate::models::external_agent::InvocationStatus,
        response_payload: Option<serde_json::Value>,
        response_status_code: Option<i32>,
        execution_time_ms: i64,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"UPDATE external_agent_invocations
               SET status = $2, response_payload = $3, response_status_code = $4, execution_time_ms = $5, completed_at = now()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(status)
        .bind(response_payload)
        .bind(response_status_code)
        .bind(execution_time_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_invocation_webhook_status(&self, id: Uuid, status: WebhookDeliveryStatus) -> anyhow::Result<()> {
        sqlx::query("UPDATE external_agent_invocations SET webhook_delivery_status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Lineage ──────────────────────────────────────────────────────

    pub async fn insert_lineage(&self, lineage: &InvocationLineage) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO invocation_lineage
               (id, external_user_id, external_user_email, external_user_name, external_system, external_session_id,
                api_key_id, org_id, team_id, external_agent_id, endpoint, trace_id, span_id,
                request_snapshot, response_snapshot, cost_usd, input_tokens, output_tokens, status,
                budget_before, budget_after, approval_id, approval_status)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23)"#,
        )
        .bind(lineage.id)
        .bind(&lineage.external_user_id)
        .bind(&lineage.external_user_email)
        .bind(&lineage.external_user_name)
        .bind(&lineage.external_system)
        .bind(&lineage.external_session_id)
        .bind(lineage.api_key_id)
        .bind(lineage.org_id)
        .bind(lineage.team_id)
        .bind(lineage.external_agent_id)
        .bind(&lineage.endpoint)
        .bind(&lineage.trace_id)
        .bind(&lineage.span_id)
        .bind(&lineage.request_snapshot)
        .bind(&lineage.response_snapshot)
        .bind(lineage.cost_usd)
        .bind(lineage.input_tokens)
        .bind(lineage.output_tokens)
        .bind(&lineage.status)
        .bind(lineage.budget_before)
        .bind(lineage.budget_after)
        .bind(lineage.approval_id)
        .bind(&lineage.approval_status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Strips PII and raw snapshots from lineage rows older than `before`,
    /// preserving cost/token/status/budget/approval fields for billing and
    /// audit (`jobs::cleanup`). UPDATE not DELETE, matching the donor's
    /// preserve-billing-metadata pattern.
    pub async fn redact_expired_lineage(&self, before: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"UPDATE invocation_lineage
               SET external_user_email = NULL, external_user_name = NULL,
                   request_snapshot = '{"redacted": true}'::jsonb,
                   response_snapshot = '{"redacted": true}'::jsonb
               WHERE created_at < $1 AND request_snapshot != '{"redacted": true}'::jsonb"#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ── Approvals ────────────────────────────────────────────────────

    pub async fn create_approval_request(
        &self,
        org_id: Uuid,
        invocation_id: Uuid,
        requested_by: Uuid,
        trigger_reason: &str,
        request_summary: serde_json::Value,
        ttl: chrono::Duration,
    ) -> anyhow::Result<ApprovalRequest> {
        let approval = sqlx::query_as::<_, ApprovalRequest>(
            r#"INSERT INTO approval_requests (org_id, invocation_id, requested_by, trigger_reason, request_summary, expires_at)
               VALUES ($1, $2, $3, $4, $5, now() + $6)
               RETURNING id, org_id, invocation_id, requested_by, trigger_reason, request_summary, status, reviewed_by, reviewed_at, expires_at, created_at"#,
        )
        .bind(org_id)
        .bind(invocation_id)
        .bind(requested_by)
        .bind(trigger_reason)
        .bind(request_summary)
        .bind(ttl)
        .fetch_one(&self.pool)
        .await?;
        Ok(approval)
    }

    pub async fn get_approval(&self, id: Uuid, org_id: Uuid) -> anyhow::Result<Option<ApprovalRequest>> {
        let approval = sqlx::query_as::<_, ApprovalRequest>(
            "SELECT id, org_id, invocation_id, requested_by, trigger_reason, request_summary, status, reviewed_by, reviewed_at, expires_at, created_at FROM approval_requests WHERE id = $1 AND org_id = $2",
        )
        .bind(id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(approval)
    }

    pub async fn list_pending_approvals(&self, org_id: Uuid) -> anyhow::Result<Vec<ApprovalRequest>> {
        let approvals = sqlx::query_as::<_, ApprovalRequest>(
            "SELECT id, org_id, invocation_id, requested_by, trigger_reason, request_summary, status, reviewed_by, reviewed_at, expires_at, created_at FROM approval_requests WHERE org_id = $1 AND status = 'pending' ORDER BY created_at ASC",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(approvals)
    }

    /// Writes a terminal decision. The `WHERE status = 'pending'` clause
    /// makes "once a terminal decision is written it is immutable" (§4.6)
    /// atomic: a second decide() call affects zero rows.
    pub async fn decide_approval(
        &self,
        id: Uuid,
        org_id: Uuid,
        reviewer_id: Uuid,
        decision: ApprovalStatus,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE approval_requests SET status = $4, reviewed_by = $3, reviewed_at = now() WHERE id = $1 AND org_id = $2 AND status = 'pending'",
        )
        .bind(id)
        .bind(org_id)
        .bind(reviewer_id)
        .bind(decision)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn expire_stale_approvals(&self) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE approval_requests SET status = 'expired' WHERE status = 'pending' AND expires_at < now()",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ── Audit ────────────────────────────────────────────────────────

    pub async fn insert_audit_log(&self, log: &AuditLog) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO audit_logs (id, org_id, user_id, action, resource_type, resource_id, details, ip_address, user_agent, status, error_message)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
        )
        .bind(log.id)
        .bind(log.org_id)
        .bind(log.user_id)
        .bind(&log.action)
        .bind(&log.resource_type)
        .bind(&log.resource_id)
        .bind(&log.details)
        .bind(&log.ip_address)
        .bind(&log.user_agent)
        .bind(log.status)
        .bind(&log.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_audit_log(&self, id: Uuid, org_id: Uuid) -> anyhow::Result<Option<AuditLog>> {
        let log = sqlx::query_as::<_, AuditLog>(
            "SELECT id, org_id, user_id, action, resource_type, resource_id, details, ip_address, user_agent, status, error_message, created_at FROM audit_logs WHERE id = $1 AND org_id = $2",
        )
        .bind(id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(log)
    }

    pub async fn list_audit_logs(&self, filter: &AuditLogFilter) -> anyhow::Result<Vec<AuditLog>> {
        let logs = sqlx::query_as::<_, AuditLog>(
            r#"SELECT id, org_id, user_id, action, resource_type, resource_id, details, ip_address, user_agent, status, error_message, created_at
               FROM audit_logs
               WHERE org_id = $1
                 AND ($2::uuid IS NULL OR user_id = $2)
                 AND ($3::varchar IS NULL OR action = $3)
                 AND ($4::varchar IS NULL OR resource_type = $4)
                 AND ($5::timestamptz IS NULL OR created_at >= $5)
                 AND ($6::timestamptz IS NULL OR created_at <= $6)
               ORDER BY created_at DESC
               LIMIT $7 OFFSET $8"#,
        )
        .bind(filter.org_id)
        .bind(filter.user_id)
        .bind(&filter.action)
        .bind(&filter.resource_type)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    // ── Webhooks ─────────────────────────────────────────────────────

    pub async fn create_webhook(&self, org_id: Uuid, url: &str, secret: &str, event_filter: &[String]) -> anyhow::Result<Webhook> {
        let webhook = sqlx::query_as::<_, Webhook>(
            r#"INSERT INTO webhooks (org_id, url, secret, event_filter) VALUES ($1, $2, $3, $4)
               RETURNING id, org_id, url, secret, event_filter, is_active, created_at"#,
        )
        .bind(org_id)
        .bind(url)
        .bind(secret)
        .bind(event_filter)
        .fetch_one(&self.pool)
        .await?;
        Ok(webhook)
    }

    pub async fn list_webhooks(&self, org_id: Uuid) -> anyhow::Result<Vec<Webhook>> {
        let webhooks = sqlx::query_as::<_, Webhook>(
            "SELECT id, org_id, url, secret, event_filter, is_active, created_at FROM webhooks WHERE org_id = $1 AND is_active = true",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(webhooks)
    }

    pub async fn delete_webhook(&self, id: Uuid, org_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE webhooks SET is_active = false WHERE id = $1 AND org_id = $2")
            .bind(id)
            .bind(org_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn upsert_webhook_delivery(
        &self,
        webhook_id: Uuid,
        invocation_id: Uuid,
        event: &str,
        status: DeliveryStatus,
        response_status: Option<i32>,
        attempt_count: i32,
        latency_ms: Option<i64>,
    ) -> anyhow::Result<WebhookDelivery> {
        let delivery = sqlx::query_as::<_, WebhookDelivery>(
            r#"INSERT INTO webhook_deliveries (webhook_id, invocation_id, event, status, response_status, attempt_count, latency_ms, last_attempted_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, now())
               ON CONFLICT (webhook_id, invocation_id, event) DO UPDATE SET
                 status = EXCLUDED.status, response_status = EXCLUDED.response_status,
                 attempt_count = EXCLUDED.attempt_count, latency_ms = EXCLUDED.latency_ms,
                 last_attempted_at = now()
               RETURNING id, webhook_id, invocation_id, event, status, response_status, attempt_count, latency_ms, last_attempted_at, created_at"#,
        )
        .bind(webhook_id)
        .bind(invocation_id)
        .bind(event)
        .bind(status)
        .bind(response_status)
        .bind(attempt_count)
        .bind(latency_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(delivery)
    }

    // ── Runs ─────────────────────────────────────────────────────────

    pub async fn create_run(&self, org_id: Uuid, work_unit_id: Uuid, input: serde_json::Value) -> anyhow::Result<Run> {
        let run = sqlx::query_as::<_, Run>(
            r#"INSERT INTO runs (org_id, work_unit_id, input) VALUES ($1, $2, $3)
               RETURNING id, org_id, work_unit_id, status, input, output, error, started_at, completed_at, created_at"#,
        )
        .bind(org_id)
        .bind(work_unit_id)
        .bind(input)
        .fetch_one(&self.pool)
        .await?;
        Ok(run)
    }

    pub async fn get_run(&self, id: Uuid, org_id: Uuid) -> anyhow::Result<Option<Run>> {
        let run = sqlx::query_as::<_, Run>(
            "SELECT id, org_id, work_unit_id, status, input, output, error, started_at, completed_at, created_at FROM runs WHERE id = $1 AND org_id = $2",
        )
        .bind(id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    /// Caller is responsible for checking `RunStatus::can_transition_to`
    /// before calling; this does not enforce the state machine itself.
    pub async fn update_run_status(
        &self,
        id: Uuid,
        status: RunStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"UPDATE runs SET status = $2, output = $3, error = $4,
                 started_at = CASE WHEN $2 = 'running' THEN now() ELSE started_at END,
                 completed_at = CASE WHEN $2 IN ('completed', 'failed', 'cancelled') THEN now() ELSE completed_at END
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(status)
        .bind(output)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
