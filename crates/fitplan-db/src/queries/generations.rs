//! Database query functions for the `plan_generations` table.
//!
//! Every status change is conditioned on the status the caller expects,
//! so concurrent writers cannot skip a state. Callers decide what an
//! unmatched update means.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

use crate::models::PlanGeneration;

/// Insert a job directly in `queued` status.
///
/// Fails with a unique violation when the questionnaire already has a
/// queued, processing or completed job.
pub async fn insert_queued(
    executor: impl PgExecutor<'_>,
    user_goal_id: Uuid,
    user_id: Uuid,
    payment_id: Uuid,
    max_retries: i32,
) -> Result<PlanGeneration> {
    let job = sqlx::query_as::<_, PlanGeneration>(
        "INSERT INTO plan_generations \
             (user_goal_id, user_id, payment_id, status, max_retries, queued_at) \
         VALUES ($1, $2, $3, 'queued', $4, NOW()) \
         RETURNING *",
    )
    .bind(user_goal_id)
    .bind(user_id)
    .bind(payment_id)
    .bind(max_retries)
    .fetch_one(executor)
    .await
    .context("failed to insert plan generation")?;

    Ok(job)
}

pub async fn get_generation(
    executor: impl PgExecutor<'_>,
    id: Uuid,
) -> Result<Option<PlanGeneration>> {
    let job = sqlx::query_as::<_, PlanGeneration>("SELECT * FROM plan_generations WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch plan generation")?;

    Ok(job)
}

/// Fetch a job and hold its row lock until the transaction ends.
pub async fn get_generation_for_update(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<PlanGeneration>> {
    let job = sqlx::query_as::<_, PlanGeneration>(
        "SELECT * FROM plan_generations WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(conn)
    .await
    .context("failed to lock plan generation")?;

    Ok(job)
}

/// The job that currently occupies the questionnaire's slot, if any.
pub async fn find_blocking(
    executor: impl PgExecutor<'_>,
    user_goal_id: Uuid,
) -> Result<Option<PlanGeneration>> {
    let job = sqlx::query_as::<_, PlanGeneration>(
        "SELECT * FROM plan_generations \
         WHERE user_goal_id = $1 AND status IN ('queued', 'processing', 'completed') \
         LIMIT 1",
    )
    .bind(user_goal_id)
    .fetch_optional(executor)
    .await
    .context("failed to look up blocking plan generation")?;

    Ok(job)
}

/// The user's most recently created job.
pub async fn latest_for_user(
    executor: impl PgExecutor<'_>,
    user_id: Uuid,
) -> Result<Option<PlanGeneration>> {
    let job = sqlx::query_as::<_, PlanGeneration>(
        "SELECT * FROM plan_generations \
         WHERE user_id = $1 \
         ORDER BY created_at DESC \
         LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
    .context("failed to fetch latest plan generation")?;

    Ok(job)
}

// -----------------------------------------------------------------------
// State-machine queries
// -----------------------------------------------------------------------

/// Claim a queued job: `queued -> processing`, stamping `started_at`.
///
/// Returns `None` when the job is not queued any more (another worker
/// won the claim, or it was cancelled).
pub async fn claim(executor: impl PgExecutor<'_>, id: Uuid) -> Result<Option<PlanGeneration>> {
    let job = sqlx::query_as::<_, PlanGeneration>(
        "UPDATE plan_generations \
         SET status = 'processing', started_at = NOW() \
         WHERE id = $1 AND status = 'queued' \
         RETURNING *",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
    .context("failed to claim plan generation")?;

    Ok(job)
}

/// `processing -> failed` with an error message and `completed_at`.
pub async fn mark_failed(
    executor: impl PgExecutor<'_>,
    id: Uuid,
    error_message: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE plan_generations \
         SET status = 'failed', error_message = $1, completed_at = NOW() \
         WHERE id = $2 AND status = 'processing'",
    )
    .bind(error_message)
    .bind(id)
    .execute(executor)
    .await
    .context("failed to mark plan generation failed")?;

    Ok(result.rows_affected())
}

/// What a successful run records on the job row.
#[derive(Debug, Clone, Copy)]
pub struct CompletedRun<'a> {
    pub workout_plan_id: Uuid,
    pub diet_plan_id: Uuid,
    pub ai_provider: &'a str,
    pub algorithm_version: &'a str,
    pub completed_at: DateTime<Utc>,
    pub processing_time_seconds: f64,
}

/// `processing -> completed`, linking the stored plans.
pub async fn mark_completed(
    executor: impl PgExecutor<'_>,
    id: Uuid,
    run: CompletedRun<'_>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE plan_generations \
         SET status = 'completed', \
             workout_plan_id = $1, \
             diet_plan_id = $2, \
             ai_provider = $3, \
             algorithm_version = $4, \
             completed_at = $5, \
             processing_time_seconds = $6, \
             error_message = '' \
         WHERE id = $7 AND status = 'processing'",
    )
    .bind(run.workout_plan_id)
    .bind(run.diet_plan_id)
    .bind(run.ai_provider)
    .bind(run.algorithm_version)
    .bind(run.completed_at)
    .bind(run.processing_time_seconds)
    .bind(id)
    .execute(executor)
    .await
    .context("failed to mark plan generation completed")?;

    Ok(result.rows_affected())
}

/// Manual retry: `failed -> queued`.
///
/// Conditioned on the retry count the caller observed and on the bound,
/// so two concurrent retries cannot both increment. Clears the error and
/// the previous run's timestamps.
pub async fn requeue_failed(
    executor: impl PgExecutor<'_>,
    id: Uuid,
    observed_retry_count: i32,
) -> Result<Option<PlanGeneration>> {
    let job = sqlx::query_as::<_, PlanGeneration>(
        "UPDATE plan_generations \
         SET status = 'queued', \
             retry_count = retry_count + 1, \
             error_message = '', \
             queued_at = NOW(), \
             started_at = NULL, \
             completed_at = NULL, \
             processing_time_seconds = NULL \
         WHERE id = $1 \
           AND status = 'failed' \
           AND retry_count = $2 \
           AND retry_count < max_retries \
         RETURNING *",
    )
    .bind(id)
    .bind(observed_retry_count)
    .fetch_optional(executor)
    .await
    .context("failed to requeue plan generation")?;

    Ok(job)
}

/// `queued | processing -> cancelled`.
pub async fn cancel(executor: impl PgExecutor<'_>, id: Uuid) -> Result<Option<PlanGeneration>> {
    let job = sqlx::query_as::<_, PlanGeneration>(
        "UPDATE plan_generations \
         SET status = 'cancelled' \
         WHERE id = $1 AND status IN ('queued', 'processing') \
         RETURNING *",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
    .context("failed to cancel plan generation")?;

    Ok(job)
}

// -----------------------------------------------------------------------
// Worker and maintenance queries
// -----------------------------------------------------------------------

/// IDs of queued jobs, oldest first.
pub async fn list_queued_ids(executor: impl PgExecutor<'_>, limit: i64) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM plan_generations \
         WHERE status = 'queued' \
         ORDER BY queued_at ASC NULLS LAST \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(executor)
    .await
    .context("failed to list queued plan generations")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Fail `processing` jobs whose `started_at` is older than `cutoff`.
/// Returns the IDs that were reset.
pub async fn fail_stale_processing(
    executor: impl PgExecutor<'_>,
    cutoff: DateTime<Utc>,
    error_message: &str,
) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "UPDATE plan_generations \
         SET status = 'failed', error_message = $1, completed_at = NOW() \
         WHERE status = 'processing' AND started_at < $2 \
         RETURNING id",
    )
    .bind(error_message)
    .bind(cutoff)
    .fetch_all(executor)
    .await
    .context("failed to reset stale plan generations")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Delete `failed` jobs created before `cutoff`.
pub async fn delete_failed_before(
    executor: impl PgExecutor<'_>,
    cutoff: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM plan_generations WHERE status = 'failed' AND created_at < $1",
    )
    .bind(cutoff)
    .execute(executor)
    .await
    .context("failed to delete old failed plan generations")?;

    Ok(result.rows_affected())
}

/// Job counts by status.
#[derive(Debug, Clone, Default)]
pub struct GenerationCounts {
    pub pending: i64,
    pub queued: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub total: i64,
}

pub async fn status_counts(executor: impl PgExecutor<'_>) -> Result<GenerationCounts> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) AS cnt \
         FROM plan_generations \
         GROUP BY status",
    )
    .fetch_all(executor)
    .await
    .context("failed to count plan generations")?;

    let mut counts = GenerationCounts::default();
    for (status, count) in &rows {
        match status.as_str() {
            "pending" => counts.pending = *count,
            "queued" => counts.queued = *count,
            "processing" => counts.processing = *count,
            "completed" => counts.completed = *count,
            "failed" => counts.failed = *count,
            "cancelled" => counts.cancelled = *count,
            _ => {}
        }
        counts.total += count;
    }
    Ok(counts)
}
