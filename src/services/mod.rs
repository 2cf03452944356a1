//! Orchestration layer between HTTP handlers and `store::postgres::PgStore`.
//!
//! Each module owns one piece of the invocation enforcement pipeline
//! (§4.5–§4.7); `invocation::invoke` composes them in the ordering §4.7
//! and §5 require.

pub mod approval;
pub mod auth;
pub mod budget;
pub mod invocation;
pub mod lineage;
pub mod rate_limit;
