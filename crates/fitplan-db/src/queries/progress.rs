//! Database query functions for the `user_progress` table.

use anyhow::{Context, Result};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{CompletedSteps, ProgressStep, UserProgress};

/// Return the user's progress row, creating it at `goal_selection` with no
/// completed steps if it does not exist.
///
/// The no-op `DO UPDATE` makes the statement return the existing row and
/// also takes its row lock, so inside a transaction this doubles as
/// `SELECT ... FOR UPDATE`.
pub async fn get_or_create(executor: impl PgExecutor<'_>, user_id: Uuid) -> Result<UserProgress> {
    let progress = sqlx::query_as::<_, UserProgress>(
        "INSERT INTO user_progress (user_id) VALUES ($1) \
         ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id \
         RETURNING *",
    )
    .bind(user_id)
    .fetch_one(executor)
    .await
    .with_context(|| format!("failed to get or create progress for user {user_id}"))?;

    Ok(progress)
}

/// Persist the step fields of a progress row.
pub async fn save_steps(
    executor: impl PgExecutor<'_>,
    user_id: Uuid,
    current_step: ProgressStep,
    completed_steps: &CompletedSteps,
) -> Result<UserProgress> {
    let progress = sqlx::query_as::<_, UserProgress>(
        "UPDATE user_progress \
         SET current_step = $1, completed_steps = $2, updated_at = NOW() \
         WHERE user_id = $3 \
         RETURNING *",
    )
    .bind(current_step)
    .bind(completed_steps.to_names())
    .bind(user_id)
    .fetch_optional(executor)
    .await
    .context("failed to save progress steps")?;

    progress.with_context(|| format!("progress for user {user_id} not found"))
}

/// Record which questionnaire completion the user is working on.
pub async fn set_selected_goal(
    executor: impl PgExecutor<'_>,
    user_id: Uuid,
    user_goal_id: Uuid,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE user_progress SET selected_goal_id = $1, updated_at = NOW() WHERE user_id = $2",
    )
    .bind(user_goal_id)
    .bind(user_id)
    .execute(executor)
    .await
    .context("failed to set selected goal")?;

    Ok(result.rows_affected())
}

/// Record the payment that unlocked plan generation.
pub async fn set_payment(
    executor: impl PgExecutor<'_>,
    user_id: Uuid,
    payment_id: Uuid,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE user_progress SET payment_id = $1, updated_at = NOW() WHERE user_id = $2",
    )
    .bind(payment_id)
    .bind(user_id)
    .execute(executor)
    .await
    .context("failed to set progress payment")?;

    Ok(result.rows_affected())
}
