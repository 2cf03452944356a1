//! Integration tests for webhook event payloads and the `AppError` →
//! HTTP response envelope.
//!
//! These exercise pure logic (event construction, HMAC signing inputs,
//! error-to-response shaping) and don't require a live Postgres/Redis.

mod webhook_events {
    use kaizen_studio::notification::webhook::WebhookEvent;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    #[test]
    fn invocation_completed_carries_cost_and_timing() {
        let invocation_id = Uuid::new_v4();
        let external_agent_id = Uuid::new_v4();
        let org_id = Uuid::new_v4();
        let event = WebhookEvent::invocation_completed(
            invocation_id,
            external_agent_id,
            org_id,
            842,
            Decimal::new(1250, 4), // 0.1250
        );

        assert_eq!(event.event_type, "invocation.completed");
        assert_eq!(event.invocation_id, invocation_id);
        assert_eq!(event.details["execution_time_ms"], 842);
        assert_eq!(event.details["cost_usd"], "0.1250");
        assert!(!event.timestamp.is_empty());
    }

    #[test]
    fn approval_requested_event_references_the_approval() {
        let event = WebhookEvent::approval_requested(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "spend over daily budget",
        );
        assert_eq!(event.event_type, "approval.requested");
        assert_eq!(event.details["trigger_reason"], "spend over daily budget");
    }

    #[test]
    fn budget_threshold_event_reports_the_crossed_value() {
        let event = WebhookEvent::budget_threshold_crossed(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Decimal::new(9000, 2), // 90.00
        );
        assert_eq!(event.event_type, "budget.threshold_crossed");
        assert_eq!(event.details["threshold"], "90.00");
    }

    #[test]
    fn invocation_failed_event_carries_a_reason_string() {
        let event = WebhookEvent::invocation_failed(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "upstream timed out after 30s",
        );
        assert_eq!(event.event_type, "invocation.failed");
        assert_eq!(event.details["reason"], "upstream timed out after 30s");
    }

    #[test]
    fn event_serializes_to_the_shape_webhook_consumers_expect() {
        let event = WebhookEvent::invocation_failed(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "blocked",
        );
        let value = serde_json::to_value(&event).unwrap();
        for key in ["event_type", "timestamp", "invocation_id", "external_agent_id", "org_id", "details"] {
            assert!(value.get(key).is_some(), "missing field: {key}");
        }
    }
}

mod error_envelope {
    use axum::response::IntoResponse;
    use kaizen_studio::errors::{AppError, FieldError};

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn validation_error_lists_field_errors_in_details() {
        let err = AppError::Validation(vec![FieldError {
            field: "email".into(),
            message: "must be a valid email address".into(),
        }]);
        let resp = err.into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["details"][0]["field"], "email");
    }

    #[tokio::test]
    async fn rate_limit_error_sets_retry_after_header() {
        let err = AppError::RateLimitExceeded { retry_after: 42 };
        let resp = err.into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get("retry-after").unwrap(), "42");
    }

    #[tokio::test]
    async fn approval_pending_reports_the_approval_id_and_202() {
        let approval_id = uuid::Uuid::new_v4();
        let err = AppError::ApprovalPending { approval_id };
        let resp = err.into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::ACCEPTED);
        let body = body_json(resp).await;
        assert_eq!(
            body["error"]["details"]["approval_id"],
            approval_id.to_string()
        );
    }

    #[tokio::test]
    async fn forbidden_by_policy_names_the_resource_and_action() {
        let err = AppError::ForbiddenByPolicy {
            resource_type: "external_agents".into(),
            action: "invoke".into(),
        };
        let resp = err.into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::FORBIDDEN);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["details"]["resource_type"], "external_agents");
    }

    #[tokio::test]
    async fn internal_errors_never_leak_their_cause_as_a_stable_code() {
        let err = AppError::Internal(anyhow::anyhow!("leaked connection string: postgres://..."));
        let resp = err.into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
    }
}
