//! Cross-module coverage for identity/credential edge cases that unit
//! tests inside each module don't reach: an API key's scope list acting
//! through `AuthContext::has_permission`, invitation expiry, and budget
//! cost estimation feeding into the enforcement decision.

mod api_key_scopes {
    use kaizen_studio::middleware::auth::{AuthContext, AuthMethod, Principal};
    use uuid::Uuid;

    fn ctx_with_scopes(scopes: Vec<&str>) -> AuthContext {
        AuthContext {
            user_id: None,
            org_id: Uuid::new_v4(),
            principal: Principal::ApiKeyScopes(scopes.into_iter().map(String::from).collect()),
            auth_method: AuthMethod::ApiKey,
            role_stale: false,
            api_key_id: Some(Uuid::new_v4()),
            api_key_rate_limit: Some(120),
        }
    }

    #[test]
    fn exact_scope_grants_exact_permission_only() {
        let ctx = ctx_with_scopes(vec!["external_agents:invoke"]);
        assert!(ctx.has_permission("external_agents:invoke"));
        assert!(!ctx.has_permission("external_agents:create"));
        assert!(!ctx.has_permission("audit:read"));
    }

    #[test]
    fn resource_wildcard_scope_grants_every_action_on_that_resource() {
        let ctx = ctx_with_scopes(vec!["external_agents:*"]);
        assert!(ctx.has_permission("external_agents:invoke"));
        assert!(ctx.has_permission("external_agents:create"));
        assert!(!ctx.has_permission("audit:read"));
    }

    #[test]
    fn global_wildcard_scope_grants_anything() {
        let ctx = ctx_with_scopes(vec!["*"]);
        assert!(ctx.has_permission("billing:refund"));
        assert!(ctx.has_permission("external_agents:invoke"));
    }

    #[test]
    fn empty_scope_list_grants_nothing() {
        let ctx = ctx_with_scopes(vec![]);
        assert!(!ctx.has_permission("external_agents:invoke"));
    }
}

mod invitation_lifecycle {
    use chrono::Utc;
    use kaizen_studio::models::identity::{Invitation, InvitationStatus, Role, INVITATION_TTL_DAYS};
    use uuid::Uuid;

    fn fresh_invitation() -> Invitation {
        let now = Utc::now();
        Invitation {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            email: "new.hire@example.com".into(),
            role: Role::Developer,
            invited_by: Uuid::new_v4(),
            token: "tok_abc123".into(),
            status: InvitationStatus::Pending,
            expires_at: now + chrono::Duration::days(INVITATION_TTL_DAYS),
            created_at: now,
        }
    }

    #[test]
    fn freshly_issued_invitation_is_usable() {
        let inv = fresh_invitation();
        assert!(inv.is_usable(Utc::now()));
    }

    #[test]
    fn accepted_invitation_is_no_longer_usable_even_before_expiry() {
        let inv = Invitation {
            status: InvitationStatus::Accepted,
            ..fresh_invitation()
        };
        assert!(!inv.is_usable(Utc::now()));
    }

    #[test]
    fn invitation_past_its_seven_day_window_is_unusable() {
        let inv = fresh_invitation();
        let past_expiry = inv.expires_at + chrono::Duration::seconds(1);
        assert!(!inv.is_usable(past_expiry));
    }
}

mod budget_cost_estimation {
    use chrono::{TimeZone, Utc};
    use kaizen_studio::models::budget::{
        check_budget, current_period, estimate_cost, Budget, BudgetDecision, EnforcementMode,
        Period, UsageQuota,
    };
    use kaizen_studio::models::external_agent::UNLIMITED;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use uuid::Uuid;

    fn metered_budget() -> Budget {
        Budget {
            external_agent_id: Uuid::new_v4(),
            period: Period::Monthly,
            max_cost_per_period: Decimal::from_str("100.00").unwrap(),
            max_tokens_per_period: UNLIMITED,
            max_invocations_per_period: UNLIMITED,
            thresholds: vec![0.5, 0.9],
            enforcement_mode: EnforcementMode::Hard,
            rollover_unused: false,
            input_token_rate: Decimal::from_str("0.000003").unwrap(),
            output_token_rate: Decimal::from_str("0.000015").unwrap(),
            base_cost_per_invocation: Decimal::ZERO,
            timezone: "UTC".into(),
        }
    }

    #[test]
    fn cost_estimate_applies_distinct_input_and_output_rates() {
        let budget = metered_budget();
        let cost = estimate_cost(&budget, 10_000, 2_000);
        // 10000 * 0.000003 + 2000 * 0.000015 = 0.03 + 0.03
        assert_eq!(cost, Decimal::from_str("0.06").unwrap());
    }

    #[test]
    fn crossing_a_threshold_warns_without_denying_under_hard_mode() {
        let budget = metered_budget();
        let usage = UsageQuota {
            cost: Decimal::from_str("48.00").unwrap(),
            tokens: 0,
            invocations: 0,
        };
        let cost = estimate_cost(&budget, 1_000_000, 0); // pushes total past the 50% threshold
        let decision = check_budget(&budget, &usage, cost, 1_000_000);
        assert!(matches!(
            decision,
            BudgetDecision::AllowWithWarning { threshold_crossed } if threshold_crossed == 0.5
        ));
    }

    #[test]
    fn month_boundary_rolls_over_at_the_first_of_next_month() {
        let now = Utc.with_ymd_and_hms(2026, 7, 31, 23, 0, 0).unwrap();
        let period = current_period(Period::Monthly, now);
        assert_eq!(period.starts_at, Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap());
        assert_eq!(period.ends_at, Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap());
    }
}

mod lineage_sanitization {
    use kaizen_studio::models::lineage::sanitize_snapshot;
    use serde_json::json;

    #[test]
    fn request_snapshot_keeps_business_fields_and_strips_credentials() {
        let raw = json!({
            "prompt": "summarize this quarter's churn",
            "headers": {
                "Authorization": "Bearer sk_live_abc123",
                "X-Client-Secret": "super-secret"
            },
            "metadata": { "caller_team": "growth" }
        });
        let clean = sanitize_snapshot(&raw);
        assert_eq!(clean["prompt"], "summarize this quarter's churn");
        assert_eq!(clean["headers"]["Authorization"], "[redacted]");
        assert_eq!(clean["headers"]["X-Client-Secret"], "[redacted]");
        assert_eq!(clean["metadata"]["caller_team"], "growth");
    }
}
