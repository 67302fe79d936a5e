//! Plan generation job state machine.
//!
//! Validates and executes job transitions with optimistic locking. Every
//! write is conditioned on the status the transition starts from, so a
//! transition that lost a race shows up as an unmatched update rather
//! than a skipped state.

pub mod dispatch;
pub mod maintenance;

use anyhow::Result;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use fitplan_db::is_unique_violation;
use fitplan_db::models::{GenerationStatus, PlanGeneration};
use fitplan_db::queries::generations as db;

use crate::error::GenerationError;

/// The generation job state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// pending    -> queued
/// queued     -> processing   (worker claim)
/// processing -> completed
/// processing -> failed
/// queued     -> cancelled    (manual)
/// processing -> cancelled    (manual)
/// failed     -> queued       (manual retry, bounded by max_retries)
/// ```
pub struct GenerationStateMachine;

impl GenerationStateMachine {
    /// Check whether `from -> to` is an edge of the state graph.
    pub fn is_valid_transition(from: GenerationStatus, to: GenerationStatus) -> bool {
        use GenerationStatus::*;
        matches!(
            (from, to),
            (Pending, Queued)
                | (Queued, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Queued, Cancelled)
                | (Processing, Cancelled)
                | (Failed, Queued)
        )
    }

    /// Check the manual-retry guard against a job snapshot.
    pub fn check_retry(job: &PlanGeneration) -> Result<(), GenerationError> {
        if job.status != GenerationStatus::Failed {
            return Err(GenerationError::NotFailed {
                id: job.id,
                status: job.status,
            });
        }
        if job.retry_count >= job.max_retries {
            return Err(GenerationError::RetriesExhausted {
                id: job.id,
                retry_count: job.retry_count,
                max_retries: job.max_retries,
            });
        }
        Ok(())
    }

    /// Claim a queued job for processing (`queued -> processing`).
    ///
    /// Returns `None` when the job is missing or no longer queued. That is
    /// the losing side of a double delivery and is not an error.
    pub async fn claim(
        executor: impl PgExecutor<'_>,
        generation_id: Uuid,
    ) -> Result<Option<PlanGeneration>> {
        let claimed = db::claim(executor, generation_id).await?;
        match &claimed {
            Some(job) => tracing::info!(
                generation_id = %generation_id,
                retry_count = job.retry_count,
                "claimed plan generation"
            ),
            None => tracing::info!(
                generation_id = %generation_id,
                "plan generation not queued, claim skipped"
            ),
        }
        Ok(claimed)
    }

    /// Fail a processing job (`processing -> failed`), recording the error.
    ///
    /// Returns `false` when the job had already left `processing` (for
    /// example it was cancelled mid-run).
    pub async fn fail(
        executor: impl PgExecutor<'_>,
        generation_id: Uuid,
        error_message: &str,
    ) -> Result<bool> {
        let rows = db::mark_failed(executor, generation_id, error_message).await?;
        if rows == 0 {
            tracing::info!(
                generation_id = %generation_id,
                "plan generation left processing before it could be failed"
            );
            return Ok(false);
        }
        tracing::warn!(
            generation_id = %generation_id,
            error = %error_message,
            "plan generation failed"
        );
        Ok(true)
    }

    /// Manual retry (`failed -> queued`).
    ///
    /// Increments `retry_count`, clears the error and re-stamps
    /// `queued_at`. Rejected unless the job is failed with retries left.
    pub async fn retry(
        pool: &PgPool,
        generation_id: Uuid,
    ) -> Result<PlanGeneration, GenerationError> {
        let job = db::get_generation(pool, generation_id)
            .await?
            .ok_or(GenerationError::NotFound(generation_id))?;
        Self::check_retry(&job)?;

        let requeued = match db::requeue_failed(pool, generation_id, job.retry_count).await {
            Ok(requeued) => requeued,
            Err(e) if is_unique_violation(&e) => {
                // A newer job for the same questionnaire holds the slot.
                let existing = db::find_blocking(pool, job.user_goal_id)
                    .await?
                    .map(|j| j.id);
                return Err(GenerationError::AlreadyExists { existing });
            }
            Err(e) => return Err(e.into()),
        };

        match requeued {
            Some(job) => {
                tracing::info!(
                    generation_id = %generation_id,
                    retry_count = job.retry_count,
                    max_retries = job.max_retries,
                    "plan generation requeued"
                );
                Ok(job)
            }
            None => {
                // Lost a race with another writer; report what it left.
                let current = db::get_generation(pool, generation_id)
                    .await?
                    .ok_or(GenerationError::NotFound(generation_id))?;
                Self::check_retry(&current)?;
                Err(GenerationError::Other(anyhow::anyhow!(
                    "optimistic lock failed on retry for plan generation {generation_id}"
                )))
            }
        }
    }

    /// Manual cancel (`queued | processing -> cancelled`).
    pub async fn cancel(
        pool: &PgPool,
        generation_id: Uuid,
    ) -> Result<PlanGeneration, GenerationError> {
        if let Some(job) = db::cancel(pool, generation_id).await? {
            tracing::info!(generation_id = %generation_id, "plan generation cancelled");
            return Ok(job);
        }

        match db::get_generation(pool, generation_id).await? {
            None => Err(GenerationError::NotFound(generation_id)),
            Some(job) => Err(GenerationError::NotCancellable {
                id: generation_id,
                status: job.status,
            }),
        }
    }
}
