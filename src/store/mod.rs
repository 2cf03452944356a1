pub mod postgres;

pub use postgres::{AuditLogFilter, PgStore};
