//! Read access to a user's generated plans, plan feedback, statistics and
//! modification requests.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use fitplan_db::models::{DietPlan, PlanSummary, PlanType, PlanVersion, ProgressStep, WorkoutPlan};
use fitplan_db::payload::{DailyMacros, DietType, Difficulty};
use fitplan_db::queries::plans::{self as db, NewPlanVersion};

use crate::progress;

/// Rejections of plan modification requests.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("modification request is required")]
    EmptyRequest,

    #[error("user {0} has no active plan")]
    NoActivePlan(Uuid),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The user's active plans.
#[derive(Debug, Clone, Serialize)]
pub struct PlanOverview {
    pub summary: PlanSummary,
    pub workout: WorkoutPlan,
    pub diet: DietPlan,
    pub daily_macros: DailyMacros,
}

/// Headline numbers for the user's active plans.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStatistics {
    pub plan_created: DateTime<Utc>,
    pub start_date: NaiveDate,
    pub days_since_start: i64,
    pub diet: DietStatistics,
    pub workout: WorkoutStatistics,
    pub feedback: FeedbackStatistics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DietStatistics {
    pub daily_calories: i32,
    pub duration_weeks: i32,
    pub diet_type: DietType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkoutStatistics {
    pub sessions_per_week: i32,
    pub duration_weeks: i32,
    pub difficulty: Difficulty,
    pub total_exercises: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackStatistics {
    pub rating: Option<i32>,
    pub has_feedback: bool,
}

impl PlanStatistics {
    fn new(summary: &PlanSummary, workout: &WorkoutPlan, diet: &DietPlan, today: NaiveDate) -> Self {
        Self {
            plan_created: summary.created_at,
            start_date: summary.start_date,
            days_since_start: days_since(summary.start_date, today),
            diet: DietStatistics {
                daily_calories: diet.daily_calorie_target,
                duration_weeks: diet.duration_weeks,
                diet_type: diet.diet_type,
            },
            workout: WorkoutStatistics {
                sessions_per_week: workout.sessions_per_week,
                duration_weeks: workout.duration_weeks,
                difficulty: workout.difficulty_level,
                total_exercises: workout.exercises.len(),
            },
            feedback: FeedbackStatistics {
                rating: summary.user_rating,
                has_feedback: !summary.user_feedback.trim().is_empty(),
            },
        }
    }
}

/// Whole days from `start` to `today`; a start in the future counts as 0.
fn days_since(start: NaiveDate, today: NaiveDate) -> i64 {
    (today - start).num_days().max(0)
}

async fn load_active(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<(PlanSummary, WorkoutPlan, DietPlan)>> {
    let Some(summary) = db::get_active_summary(pool, user_id).await? else {
        return Ok(None);
    };
    let workout = db::get_workout_plan(pool, summary.workout_plan_id)
        .await?
        .with_context(|| format!("workout plan {} not found", summary.workout_plan_id))?;
    let diet = db::get_diet_plan(pool, summary.diet_plan_id)
        .await?
        .with_context(|| format!("diet plan {} not found", summary.diet_plan_id))?;
    Ok(Some((summary, workout, diet)))
}

/// Fetch the user's active summary with both plans.
///
/// Returns `None` when no plan has been generated yet. The first view of a
/// ready plan completes the `plan_ready` step.
pub async fn get_plan_overview(pool: &PgPool, user_id: Uuid) -> Result<Option<PlanOverview>> {
    let Some((summary, workout, diet)) = load_active(pool, user_id).await? else {
        return Ok(None);
    };

    let current = progress::get_progress(pool, user_id).await?;
    if current.current_step == ProgressStep::PlanReady {
        progress::mark_step_completed(pool, user_id, ProgressStep::PlanReady).await?;
    }

    let daily_macros = diet.macro_split().daily_macros(diet.daily_calorie_target);
    Ok(Some(PlanOverview {
        summary,
        workout,
        diet,
        daily_macros,
    }))
}

/// Statistics for the active plans, `None` without one. Progress is not
/// touched.
pub async fn plan_statistics(pool: &PgPool, user_id: Uuid) -> Result<Option<PlanStatistics>> {
    let Some((summary, workout, diet)) = load_active(pool, user_id).await? else {
        return Ok(None);
    };
    let today = Utc::now().date_naive();
    Ok(Some(PlanStatistics::new(&summary, &workout, &diet, today)))
}

/// Rate and/or comment on the active plans. `None` leaves a field as is.
pub async fn submit_feedback(
    pool: &PgPool,
    user_id: Uuid,
    rating: Option<i32>,
    feedback: Option<&str>,
) -> Result<PlanSummary> {
    if let Some(r) = rating {
        if !(1..=5).contains(&r) {
            bail!("rating must be between 1 and 5, got {r}");
        }
    }

    let summary = db::update_feedback(pool, user_id, rating, feedback)
        .await?
        .with_context(|| format!("user {user_id} has no active plan"))?;

    tracing::info!(user_id = %user_id, rating = ?rating, "plan feedback recorded");
    Ok(summary)
}

/// Record a user's request to change the active plan of `plan_type`.
///
/// The request becomes the next [`PlanVersion`] for (user, plan type),
/// pointing at the active plan and marked not current until processed.
/// The active summary stays locked while the number is assigned.
pub async fn request_modification(
    pool: &PgPool,
    user_id: Uuid,
    plan_type: PlanType,
    request: &str,
) -> Result<PlanVersion, PlanError> {
    let request = request.trim();
    if request.is_empty() {
        return Err(PlanError::EmptyRequest);
    }

    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    let summary = db::lock_active_summary(&mut *tx, user_id)
        .await?
        .ok_or(PlanError::NoActivePlan(user_id))?;
    let plan_id = match plan_type {
        PlanType::Workout => summary.workout_plan_id,
        PlanType::Diet => summary.diet_plan_id,
    };

    let plan_data = serde_json::json!({ "modification_request": request });
    let version = db::insert_version(
        &mut *tx,
        NewPlanVersion {
            user_id,
            plan_type,
            plan_id,
            plan_data: &plan_data,
            modification_reason: request,
            modified_by_user: true,
            is_current: false,
        },
    )
    .await?;
    tx.commit().await.context("failed to commit plan version")?;

    tracing::info!(
        user_id = %user_id,
        plan_type = %plan_type,
        plan_id = %plan_id,
        version_number = version.version_number,
        "plan modification requested"
    );
    Ok(version)
}

/// The user's plan history for `plan_type`, newest first.
pub async fn plan_history(
    pool: &PgPool,
    user_id: Uuid,
    plan_type: PlanType,
) -> Result<Vec<PlanVersion>> {
    db::list_versions(pool, user_id, plan_type).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn days_since_counts_whole_days() {
        assert_eq!(days_since(date(2025, 3, 1), date(2025, 3, 1)), 0);
        assert_eq!(days_since(date(2025, 2, 27), date(2025, 3, 1)), 2);
        assert_eq!(days_since(date(2024, 12, 31), date(2025, 3, 1)), 60);
    }

    #[test]
    fn days_since_future_start_is_zero() {
        assert_eq!(days_since(date(2025, 3, 2), date(2025, 3, 1)), 0);
    }

    #[test]
    fn plan_error_messages() {
        assert_eq!(
            PlanError::EmptyRequest.to_string(),
            "modification request is required"
        );
        assert_eq!(
            PlanError::NoActivePlan(Uuid::nil()).to_string(),
            format!("user {} has no active plan", Uuid::nil())
        );
    }
}
