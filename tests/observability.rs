//! Unit-level coverage for metrics label normalization: UUIDs and numeric
//! ids must collapse so the `/metrics` label set stays bounded regardless
//! of how many distinct resources get requested.

use kaizen_studio::middleware::metrics::normalize_path;

#[test]
fn uuid_path_segment_collapses_to_id() {
    let path = "/api/v1/external-agents/3fa85f64-5717-4562-b3fc-2c963f66afa6/invoke";
    assert_eq!(normalize_path(path), "/api/v1/external-agents/{id}/invoke");
}

#[test]
fn numeric_path_segment_collapses_to_id() {
    assert_eq!(normalize_path("/api/v1/audit/logs/4821"), "/api/v1/audit/logs/{id}");
}

#[test]
fn path_with_no_identifiers_passes_through_unchanged() {
    assert_eq!(normalize_path("/api/v1/auth/login"), "/api/v1/auth/login");
}

#[test]
fn mixed_uuid_and_numeric_segments_both_collapse() {
    let path = "/api/v1/orgs/3fa85f64-5717-4562-b3fc-2c963f66afa6/keys/77";
    assert_eq!(normalize_path(path), "/api/v1/orgs/{id}/keys/{id}");
}
