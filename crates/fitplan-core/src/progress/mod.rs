//! User funnel progress.
//!
//! Each user has one progress row holding the current step and the set of
//! completed steps. Completing a step moves the current step to that
//! step's successor in a fixed progression table:
//!
//! ```text
//! goal_selection    -> questionnaire
//! questionnaire     -> payment_pending
//! payment_pending   -> payment_completed
//! payment_completed -> plan_generation
//! plan_generation   -> plan_ready
//! plan_ready        -> completed
//! ```
//!
//! Gating is advisory: callers check [`ProgressTracker::can_access_step`]
//! before allowing an action.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use fitplan_db::models::{CompletedSteps, ProgressStep, UserProgress};
use fitplan_db::queries::progress as db;

/// Pure progression rules over a [`UserProgress`] value.
pub struct ProgressTracker;

impl ProgressTracker {
    /// The step that follows `step`, or `None` for the final step.
    pub fn successor(step: ProgressStep) -> Option<ProgressStep> {
        match step {
            ProgressStep::GoalSelection => Some(ProgressStep::Questionnaire),
            ProgressStep::Questionnaire => Some(ProgressStep::PaymentPending),
            ProgressStep::PaymentPending => Some(ProgressStep::PaymentCompleted),
            ProgressStep::PaymentCompleted => Some(ProgressStep::PlanGeneration),
            ProgressStep::PlanGeneration => Some(ProgressStep::PlanReady),
            ProgressStep::PlanReady => Some(ProgressStep::Completed),
            ProgressStep::Completed => None,
        }
    }

    /// Record `step` as completed and advance `current_step` to its
    /// successor. Returns `true` if anything changed.
    pub fn apply_step(progress: &mut UserProgress, step: ProgressStep) -> bool {
        let mut changed = progress.completed_steps.insert(step);
        if let Some(next) = Self::successor(step) {
            if progress.current_step != next {
                progress.current_step = next;
                changed = true;
            }
        }
        changed
    }

    /// Whether `step` is at or before the user's current step.
    pub fn can_access_step(progress: &UserProgress, step: ProgressStep) -> bool {
        step.position() <= progress.current_step.position()
    }

    /// Whether `current` can be explained by `completed`: the first step
    /// when nothing is completed, otherwise the successor of some completed
    /// step (or the final step once it is completed).
    pub fn is_consistent(current: ProgressStep, completed: &CompletedSteps) -> bool {
        if completed.is_empty() {
            return current == ProgressStep::GoalSelection;
        }
        completed.iter().any(|step| {
            Self::successor(step) == Some(current)
                || (step == ProgressStep::Completed && current == ProgressStep::Completed)
        })
    }
}

/// Return the user's progress, creating it at `goal_selection` on first
/// access.
pub async fn get_progress(executor: impl PgExecutor<'_>, user_id: Uuid) -> Result<UserProgress> {
    db::get_or_create(executor, user_id).await
}

/// Mark `step` completed for the user inside an open transaction.
///
/// Locks the progress row for the rest of the transaction. A step that is
/// already completed with the current step already advanced is a no-op and
/// issues no write.
pub async fn mark_step_completed_tx(
    conn: &mut PgConnection,
    user_id: Uuid,
    step: ProgressStep,
) -> Result<UserProgress> {
    let mut progress = db::get_or_create(&mut *conn, user_id).await?;

    if !ProgressTracker::apply_step(&mut progress, step) {
        return Ok(progress);
    }

    let saved = db::save_steps(
        &mut *conn,
        user_id,
        progress.current_step,
        &progress.completed_steps,
    )
    .await?;

    tracing::info!(
        user_id = %user_id,
        step = %step,
        current_step = %saved.current_step,
        "progress step completed"
    );
    Ok(saved)
}

/// Mark `step` completed for the user in its own transaction.
pub async fn mark_step_completed(
    pool: &PgPool,
    user_id: Uuid,
    step: ProgressStep,
) -> Result<UserProgress> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    let progress = mark_step_completed_tx(&mut tx, user_id, step).await?;
    tx.commit().await.context("failed to commit progress")?;
    Ok(progress)
}

/// Mark a step given by name. Unknown names are an error, never a silent
/// no-op.
pub async fn mark_step_completed_named(
    pool: &PgPool,
    user_id: Uuid,
    step_name: &str,
) -> Result<UserProgress> {
    let step: ProgressStep = step_name
        .parse()
        .with_context(|| format!("cannot complete step for user {user_id}"))?;
    mark_step_completed(pool, user_id, step).await
}
