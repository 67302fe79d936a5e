//! Persistence layer for the plan-generation backend.
//!
//! Row models, typed plan payloads, connection handling, and one query
//! module per table group. Business rules live in `fitplan-core`.

pub mod config;
pub mod models;
pub mod payload;
pub mod pool;
pub mod queries;

/// Whether an error chain bottoms out in a PostgreSQL unique violation.
///
/// Query helpers wrap `sqlx::Error` in `anyhow` context, and `anyhow`
/// downcasting sees through the context layer.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
        _ => false,
    }
}
