//! Connection pool, embedded migrations and database bootstrap.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::info;

use crate::config::DbConfig;

/// Migrations embedded at compile time from `crates/fitplan-db/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Tables reported by [`table_counts`], in funnel order.
pub const TABLES: &[&str] = &[
    "users",
    "goals",
    "questions",
    "answers",
    "user_goals",
    "payments",
    "user_progress",
    "plan_generations",
    "workout_plans",
    "diet_plans",
    "plan_summaries",
    "plan_versions",
];

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pool used by the CLI and workers: 5 connections, 10 s acquire timeout.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("failed to connect to database at {}", config.database_url))
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to run fitplan migrations")?;

    info!(migrations = MIGRATOR.iter().count(), "fitplan schema is up to date");
    Ok(())
}

/// Create the target database through the `postgres` maintenance database
/// if it does not exist yet.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<()> {
    let db_name = config
        .database_name()
        .context("could not determine database name from URL")?;
    // CREATE DATABASE cannot take a bind parameter.
    if !db_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("database name {db_name:?} contains invalid characters");
    }

    let maintenance_url = config.maintenance_url();
    let maint_pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&maintenance_url)
        .await
        .with_context(|| format!("failed to connect to maintenance database at {maintenance_url}"))?;

    let result = create_if_missing(&maint_pool, db_name).await;
    maint_pool.close().await;
    result
}

async fn create_if_missing(maint_pool: &PgPool, db_name: &str) -> Result<()> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(db_name)
            .fetch_one(maint_pool)
            .await
            .context("failed to query pg_database")?;
    if exists {
        info!(db = db_name, "database already exists");
        return Ok(());
    }

    maint_pool
        .execute(format!("CREATE DATABASE {db_name}").as_str())
        .await
        .with_context(|| format!("failed to create database {db_name}"))?;
    info!(db = db_name, "database created");
    Ok(())
}

/// Row count of every fitplan table, in [`TABLES`] order.
pub async fn table_counts(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let mut counts = Vec::with_capacity(TABLES.len());
    for table in TABLES {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to count rows in {table}"))?;
        counts.push(((*table).to_owned(), count));
    }
    Ok(counts)
}
