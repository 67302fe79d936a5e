//! Periodic upkeep of the generation table.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use fitplan_db::queries::generations as db;

/// Error recorded on jobs reset by [`recover_stale_generations`].
pub const WORKER_LOST_MESSAGE: &str = "worker lost while processing";

/// Default age after which failed jobs are deleted.
pub const DEFAULT_FAILED_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Fail `processing` jobs that started more than `stale_after` ago.
///
/// Such jobs belong to a worker that died mid-run. Failing them (rather
/// than requeueing) keeps the manual retry bound meaningful.
pub async fn recover_stale_generations(pool: &PgPool, stale_after: Duration) -> Result<Vec<Uuid>> {
    let cutoff = Utc::now()
        - chrono::Duration::from_std(stale_after).context("stale_after out of range")?;
    let reset = db::fail_stale_processing(pool, cutoff, WORKER_LOST_MESSAGE).await?;

    for id in &reset {
        tracing::warn!(generation_id = %id, "reset stale plan generation to failed");
    }
    Ok(reset)
}

/// Delete failed jobs created more than `older_than` ago. Returns the
/// number removed.
pub async fn cleanup_failed_generations(pool: &PgPool, older_than: Duration) -> Result<u64> {
    let cutoff = Utc::now()
        - chrono::Duration::from_std(older_than).context("older_than out of range")?;
    let deleted = db::delete_failed_before(pool, cutoff).await?;

    tracing::info!(deleted, cutoff = %cutoff, "cleaned up failed plan generations");
    Ok(deleted)
}
