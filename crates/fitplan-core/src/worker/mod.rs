//! Generation worker: runs one queued job from claim to a terminal state.
//!
//! [`process_generation`] is the unit of work; [`runner::run_worker`]
//! feeds it from the in-process queue and from polling.

pub mod runner;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use futures::FutureExt;
use sqlx::PgPool;
use uuid::Uuid;

use fitplan_db::models::{GenerationStatus, PlanGeneration, ProgressStep};
use fitplan_db::payload::GeneratedPlans;
use fitplan_db::queries::generations::{self as db, CompletedRun};
use fitplan_db::queries::plans::{self as plan_db, PlanOrigin};

use crate::assembler::{AssembleError, PlanAssembler, QuestionnaireAnswers};
use crate::generation::GenerationStateMachine;
use crate::progress;
use crate::questionnaire;

pub use runner::{WorkerStats, run_worker};

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Assembly attempts per claim, counting the first.
    pub max_attempts: u32,
    /// Delay before the first re-attempt; doubles each time.
    pub base_delay: Duration,
    /// Wall time allowed for one assembly call.
    pub assemble_timeout: Duration,
    /// Jobs processed at once by one worker.
    pub concurrency: usize,
    /// How often to look for queued rows nobody announced.
    pub poll_interval: Duration,
    /// Age after which a `processing` row is considered abandoned.
    pub stale_after: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
            assemble_timeout: Duration::from_secs(120),
            concurrency: 4,
            poll_interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(30 * 60),
        }
    }
}

/// How a call to [`process_generation`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Plans stored and the job completed.
    Completed,
    /// The job was failed with an error message.
    Failed,
    /// The job was not queued at claim time, or was moved to a state other
    /// than `cancelled` by someone else mid-run.
    Skipped,
    /// The job was cancelled while it ran; results were discarded.
    Cancelled,
}

/// Delay before re-attempt number `attempt + 1`: `base * 2^attempt`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Process one generation job.
///
/// Steps:
/// 1. Claim (`queued -> processing`); a lost claim is [`ProcessOutcome::Skipped`]
/// 2. Load the questionnaire answers
/// 3. Assemble with a timeout, re-attempting transient failures with backoff
/// 4. Store both plans and complete the job in one transaction
///
/// Any failure in 2-4 takes the fail transition and is recorded on the job
/// row. `Err` is returned only when the database itself is unreachable.
pub async fn process_generation(
    pool: &PgPool,
    assembler: &dyn PlanAssembler,
    generation_id: Uuid,
    config: &WorkerConfig,
) -> Result<ProcessOutcome> {
    // 1. Claim.
    let Some(job) = GenerationStateMachine::claim(pool, generation_id).await? else {
        return Ok(ProcessOutcome::Skipped);
    };

    // 2. Answers.
    let answers = match questionnaire::load_answers(pool, job.user_goal_id).await {
        Ok(answers) => answers,
        Err(e) => {
            let message = format!("failed to load questionnaire: {e:#}");
            return fail_job(pool, generation_id, &message).await;
        }
    };

    // 3. Assemble.
    let plans = match assemble_with_retry(pool, assembler, &job, &answers, config).await? {
        Assembly::Done(plans) => plans,
        Assembly::Abandoned(outcome) => return Ok(outcome),
        Assembly::Failed(message) => return fail_job(pool, generation_id, &message).await,
    };

    // 4. Complete.
    match complete(pool, assembler, &job, &plans).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            tracing::error!(
                generation_id = %generation_id,
                error = %format!("{e:#}"),
                "failed to store generated plans"
            );
            let message = format!("failed to store generated plans: {e:#}");
            fail_job(pool, generation_id, &message).await
        }
    }
}

enum Assembly {
    Done(GeneratedPlans),
    /// The job left `processing` between attempts.
    Abandoned(ProcessOutcome),
    Failed(String),
}

async fn assemble_with_retry(
    pool: &PgPool,
    assembler: &dyn PlanAssembler,
    job: &PlanGeneration,
    answers: &QuestionnaireAnswers,
    config: &WorkerConfig,
) -> Result<Assembly> {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        tracing::info!(
            generation_id = %job.id,
            assembler = assembler.name(),
            attempt = attempt + 1,
            max_attempts,
            "assembling plans"
        );

        let result = assemble_once(assembler, answers, config.assemble_timeout).await;

        let err = match result {
            Ok(plans) => return Ok(Assembly::Done(plans)),
            Err(e) => e,
        };

        if !err.is_transient() {
            return Ok(Assembly::Failed(err.to_string()));
        }

        attempt += 1;
        if attempt >= max_attempts {
            return Ok(Assembly::Failed(format!(
                "max attempts exceeded ({max_attempts}): {err}"
            )));
        }

        let delay = backoff_delay(config.base_delay, attempt - 1);
        tracing::warn!(
            generation_id = %job.id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient assembly failure, backing off"
        );
        tokio::time::sleep(delay).await;

        if let Some(outcome) = left_processing(pool, job.id).await? {
            return Ok(Assembly::Abandoned(outcome));
        }
    }
}

/// One assembly call under the timeout. A panic in the assembler is
/// caught and reported as [`AssembleError::Panicked`].
async fn assemble_once(
    assembler: &dyn PlanAssembler,
    answers: &QuestionnaireAnswers,
    timeout: Duration,
) -> Result<GeneratedPlans, AssembleError> {
    let attempt = AssertUnwindSafe(assembler.assemble(answers)).catch_unwind();
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(result)) => result,
        Ok(Err(payload)) => Err(AssembleError::Panicked(panic_message(payload.as_ref()))),
        Err(_) => Err(AssembleError::TimedOut(timeout)),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// `Some(outcome)` when the job is no longer `processing`.
async fn left_processing(pool: &PgPool, generation_id: Uuid) -> Result<Option<ProcessOutcome>> {
    let status = db::get_generation(pool, generation_id)
        .await?
        .map(|job| job.status);
    Ok(abandoned_outcome(status))
}

fn abandoned_outcome(status: Option<GenerationStatus>) -> Option<ProcessOutcome> {
    match status {
        Some(GenerationStatus::Processing) => None,
        Some(GenerationStatus::Cancelled) => Some(ProcessOutcome::Cancelled),
        _ => Some(ProcessOutcome::Skipped),
    }
}

async fn fail_job(pool: &PgPool, generation_id: Uuid, message: &str) -> Result<ProcessOutcome> {
    if GenerationStateMachine::fail(pool, generation_id, message).await? {
        return Ok(ProcessOutcome::Failed);
    }
    Ok(left_processing(pool, generation_id)
        .await?
        .unwrap_or(ProcessOutcome::Skipped))
}

/// Store both plans, swap the active summary, complete the job and
/// advance progress, all in one transaction.
///
/// The job row is locked first. If it is no longer `processing` nothing is
/// written and the matching outcome is returned.
async fn complete(
    pool: &PgPool,
    assembler: &dyn PlanAssembler,
    job: &PlanGeneration,
    plans: &GeneratedPlans,
) -> Result<ProcessOutcome> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let current = db::get_generation_for_update(&mut *tx, job.id)
        .await?
        .with_context(|| format!("plan generation {} disappeared", job.id))?;
    if let Some(outcome) = abandoned_outcome(Some(current.status)) {
        tx.rollback().await.context("failed to roll back")?;
        tracing::info!(
            generation_id = %job.id,
            status = %current.status,
            "plan generation left processing, discarding assembled plans"
        );
        return Ok(outcome);
    }

    let origin = PlanOrigin {
        user_id: job.user_id,
        user_goal_id: job.user_goal_id,
        plan_generation_id: job.id,
        generated_from_ai: assembler.is_ai(),
        algorithm_version: assembler.algorithm_version(),
    };
    let workout = plan_db::insert_workout_plan(&mut *tx, origin, &plans.workout).await?;
    let diet = plan_db::insert_diet_plan(&mut *tx, origin, &plans.diet).await?;

    plan_db::deactivate_summaries(&mut *tx, job.user_id).await?;
    plan_db::insert_summary(&mut *tx, job.user_id, job.user_goal_id, workout.id, diet.id).await?;

    let completed_at = Utc::now();
    let started_at = current.started_at.unwrap_or(completed_at);
    let processing_time_seconds =
        ((completed_at - started_at).num_milliseconds() as f64 / 1000.0).max(0.0);

    let rows = db::mark_completed(
        &mut *tx,
        job.id,
        CompletedRun {
            workout_plan_id: workout.id,
            diet_plan_id: diet.id,
            ai_provider: assembler.name(),
            algorithm_version: assembler.algorithm_version(),
            completed_at,
            processing_time_seconds,
        },
    )
    .await?;
    if rows == 0 {
        bail!("plan generation {} left processing under lock", job.id);
    }

    progress::mark_step_completed_tx(&mut tx, job.user_id, ProgressStep::PlanGeneration).await?;

    tx.commit().await.context("failed to commit plan generation")?;

    tracing::info!(
        generation_id = %job.id,
        user_id = %job.user_id,
        workout_plan_id = %workout.id,
        diet_plan_id = %diet.id,
        processing_time_seconds,
        "plan generation completed"
    );
    Ok(ProcessOutcome::Completed)
}
