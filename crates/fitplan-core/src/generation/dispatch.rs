//! Orchestration operations over the generation state machine: enqueue,
//! retry, cancel and status lookups.
//!
//! These are what an API layer calls. Rejections come back as
//! [`GenerationError`]; execution failures of a job are only visible on
//! the job row.

use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use fitplan_db::is_unique_violation;
use fitplan_db::models::{PlanGeneration, ProgressStep};
use fitplan_db::queries::generations as db;
use fitplan_db::queries::{payments, questionnaire};

use super::GenerationStateMachine;
use crate::error::GenerationError;
use crate::progress;
use crate::queue::JobQueue;

/// Default bound on manual retries for new jobs.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Create a queued generation job for the user and hand it to the queue.
///
/// Preconditions, checked in order: a non-negative `max_retries`, a
/// completed questionnaire, a successful payment, and no queued,
/// processing or completed job for the questionnaire. The job row and the `payment_completed` progress step
/// commit together; the queue is told after commit and a failed dispatch
/// is only logged (polling workers still find the row).
pub async fn enqueue_generation(
    pool: &PgPool,
    queue: &dyn JobQueue,
    user_id: Uuid,
    max_retries: i32,
) -> Result<PlanGeneration, GenerationError> {
    if max_retries < 0 {
        return Err(GenerationError::InvalidMaxRetries(max_retries));
    }

    // 1. Questionnaire.
    let user_goal = questionnaire::completed_goal_selection(pool, user_id)
        .await?
        .ok_or(GenerationError::NoQuestionnaire)?;

    // 2. Payment.
    let payment = payments::latest_successful_for_user(pool, user_id)
        .await?
        .ok_or(GenerationError::NoPayment)?;

    // 3. Existing job.
    if let Some(existing) = db::find_blocking(pool, user_goal.id).await? {
        return Err(GenerationError::AlreadyExists {
            existing: Some(existing.id),
        });
    }

    // 4. Create the job and advance progress atomically. The partial unique
    //    index settles concurrent enqueues that both passed step 3.
    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    let job = match db::insert_queued(&mut *tx, user_goal.id, user_id, payment.id, max_retries)
        .await
    {
        Ok(job) => job,
        Err(e) if is_unique_violation(&e) => {
            drop(tx);
            let existing = db::find_blocking(pool, user_goal.id).await?.map(|j| j.id);
            return Err(GenerationError::AlreadyExists { existing });
        }
        Err(e) => return Err(e.into()),
    };
    progress::mark_step_completed_tx(&mut tx, user_id, ProgressStep::PaymentCompleted).await?;
    tx.commit().await.context("failed to commit plan generation")?;

    tracing::info!(
        generation_id = %job.id,
        user_id = %user_id,
        user_goal_id = %user_goal.id,
        payment_id = %payment.id,
        "plan generation queued"
    );

    // 5. Dispatch.
    dispatch_to_queue(queue, job.id).await;

    Ok(job)
}

/// Manually retry a failed job and hand it to the queue again.
pub async fn retry_generation(
    pool: &PgPool,
    queue: &dyn JobQueue,
    generation_id: Uuid,
) -> Result<PlanGeneration, GenerationError> {
    let job = GenerationStateMachine::retry(pool, generation_id).await?;
    dispatch_to_queue(queue, job.id).await;
    Ok(job)
}

/// Cancel a queued or processing job.
///
/// An in-flight assembly is not interrupted; the worker notices the
/// cancellation before its completion write and discards the result.
pub async fn cancel_generation(
    pool: &PgPool,
    generation_id: Uuid,
) -> Result<PlanGeneration, GenerationError> {
    GenerationStateMachine::cancel(pool, generation_id).await
}

/// Current state of a job.
pub async fn get_job_status(
    pool: &PgPool,
    generation_id: Uuid,
) -> Result<PlanGeneration, GenerationError> {
    db::get_generation(pool, generation_id)
        .await?
        .ok_or(GenerationError::NotFound(generation_id))
}

/// The user's most recent job, if any.
pub async fn latest_generation_for_user(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<PlanGeneration>, GenerationError> {
    Ok(db::latest_for_user(pool, user_id).await?)
}

async fn dispatch_to_queue(queue: &dyn JobQueue, generation_id: Uuid) {
    if let Err(e) = queue.enqueue(generation_id).await {
        tracing::warn!(
            generation_id = %generation_id,
            queue = queue.name(),
            error = %e,
            "failed to dispatch plan generation, leaving it for polling workers"
        );
    }
}
