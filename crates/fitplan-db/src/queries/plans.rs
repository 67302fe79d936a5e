//! Database query functions for `workout_plans`, `diet_plans`,
//! `plan_summaries` and `plan_versions`.

use anyhow::{Context, Result};
use sqlx::PgExecutor;
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::{DietPlan, PlanSummary, PlanType, PlanVersion, WorkoutPlan};
use crate::payload::{DietPlanPayload, WorkoutPlanPayload};

/// Ownership and provenance columns shared by both plan tables.
#[derive(Debug, Clone, Copy)]
pub struct PlanOrigin<'a> {
    pub user_id: Uuid,
    pub user_goal_id: Uuid,
    pub plan_generation_id: Uuid,
    pub generated_from_ai: bool,
    pub algorithm_version: &'a str,
}

pub async fn insert_workout_plan(
    executor: impl PgExecutor<'_>,
    origin: PlanOrigin<'_>,
    plan: &WorkoutPlanPayload,
) -> Result<WorkoutPlan> {
    let row = sqlx::query_as::<_, WorkoutPlan>(
        "INSERT INTO workout_plans \
             (user_id, user_goal_id, plan_generation_id, name, description, difficulty_level, \
              duration_weeks, sessions_per_week, schedule, exercises, equipment_needed, \
              generated_from_ai, algorithm_version) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
         RETURNING *",
    )
    .bind(origin.user_id)
    .bind(origin.user_goal_id)
    .bind(origin.plan_generation_id)
    .bind(&plan.name)
    .bind(&plan.description)
    .bind(plan.difficulty)
    .bind(plan.duration_weeks)
    .bind(plan.sessions_per_week)
    .bind(Json(&plan.schedule))
    .bind(Json(&plan.exercises))
    .bind(&plan.equipment_needed)
    .bind(origin.generated_from_ai)
    .bind(origin.algorithm_version)
    .fetch_one(executor)
    .await
    .context("failed to insert workout plan")?;

    Ok(row)
}

pub async fn insert_diet_plan(
    executor: impl PgExecutor<'_>,
    origin: PlanOrigin<'_>,
    plan: &DietPlanPayload,
) -> Result<DietPlan> {
    let row = sqlx::query_as::<_, DietPlan>(
        "INSERT INTO diet_plans \
             (user_id, user_goal_id, plan_generation_id, name, description, diet_type, \
              daily_calorie_target, duration_weeks, protein_percentage, carb_percentage, \
              fat_percentage, meal_plan, food_restrictions, preferred_foods, shopping_list, \
              generated_from_ai, algorithm_version) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
         RETURNING *",
    )
    .bind(origin.user_id)
    .bind(origin.user_goal_id)
    .bind(origin.plan_generation_id)
    .bind(&plan.name)
    .bind(&plan.description)
    .bind(plan.diet_type)
    .bind(plan.daily_calorie_target)
    .bind(plan.duration_weeks)
    .bind(plan.macros.protein_percentage)
    .bind(plan.macros.carb_percentage)
    .bind(plan.macros.fat_percentage)
    .bind(Json(&plan.meal_plan))
    .bind(&plan.food_restrictions)
    .bind(&plan.preferred_foods)
    .bind(Json(&plan.shopping_list))
    .bind(origin.generated_from_ai)
    .bind(origin.algorithm_version)
    .fetch_one(executor)
    .await
    .context("failed to insert diet plan")?;

    Ok(row)
}

pub async fn get_workout_plan(
    executor: impl PgExecutor<'_>,
    id: Uuid,
) -> Result<Option<WorkoutPlan>> {
    let row = sqlx::query_as::<_, WorkoutPlan>("SELECT * FROM workout_plans WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch workout plan")?;

    Ok(row)
}

pub async fn get_diet_plan(executor: impl PgExecutor<'_>, id: Uuid) -> Result<Option<DietPlan>> {
    let row = sqlx::query_as::<_, DietPlan>("SELECT * FROM diet_plans WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch diet plan")?;

    Ok(row)
}

/// Number of workout and diet plan rows stored for one job.
pub async fn count_for_generation(
    executor: impl PgExecutor<'_>,
    plan_generation_id: Uuid,
) -> Result<(i64, i64)> {
    let row: (i64, i64) = sqlx::query_as(
        "SELECT \
             (SELECT COUNT(*) FROM workout_plans WHERE plan_generation_id = $1), \
             (SELECT COUNT(*) FROM diet_plans WHERE plan_generation_id = $1)",
    )
    .bind(plan_generation_id)
    .fetch_one(executor)
    .await
    .context("failed to count plans for generation")?;

    Ok(row)
}

// -----------------------------------------------------------------------
// Summaries
// -----------------------------------------------------------------------

/// Deactivate every active summary of a user.
pub async fn deactivate_summaries(executor: impl PgExecutor<'_>, user_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE plan_summaries SET is_active = FALSE, updated_at = NOW() \
         WHERE user_id = $1 AND is_active",
    )
    .bind(user_id)
    .execute(executor)
    .await
    .context("failed to deactivate plan summaries")?;

    Ok(result.rows_affected())
}

pub async fn insert_summary(
    executor: impl PgExecutor<'_>,
    user_id: Uuid,
    user_goal_id: Uuid,
    workout_plan_id: Uuid,
    diet_plan_id: Uuid,
) -> Result<PlanSummary> {
    let row = sqlx::query_as::<_, PlanSummary>(
        "INSERT INTO plan_summaries (user_id, user_goal_id, workout_plan_id, diet_plan_id) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(user_id)
    .bind(user_goal_id)
    .bind(workout_plan_id)
    .bind(diet_plan_id)
    .fetch_one(executor)
    .await
    .context("failed to insert plan summary")?;

    Ok(row)
}

pub async fn get_active_summary(
    executor: impl PgExecutor<'_>,
    user_id: Uuid,
) -> Result<Option<PlanSummary>> {
    let row = sqlx::query_as::<_, PlanSummary>(
        "SELECT * FROM plan_summaries WHERE user_id = $1 AND is_active",
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
    .context("failed to fetch active plan summary")?;

    Ok(row)
}

/// Active summary, locked `FOR UPDATE` until the transaction ends.
pub async fn lock_active_summary(
    executor: impl PgExecutor<'_>,
    user_id: Uuid,
) -> Result<Option<PlanSummary>> {
    let row = sqlx::query_as::<_, PlanSummary>(
        "SELECT * FROM plan_summaries WHERE user_id = $1 AND is_active FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
    .context("failed to lock active plan summary")?;

    Ok(row)
}

/// Update rating and/or feedback on the user's active summary. `None`
/// leaves a field unchanged.
pub async fn update_feedback(
    executor: impl PgExecutor<'_>,
    user_id: Uuid,
    user_rating: Option<i32>,
    user_feedback: Option<&str>,
) -> Result<Option<PlanSummary>> {
    let row = sqlx::query_as::<_, PlanSummary>(
        "UPDATE plan_summaries \
         SET user_rating = COALESCE($1, user_rating), \
             user_feedback = COALESCE($2, user_feedback), \
             updated_at = NOW() \
         WHERE user_id = $3 AND is_active \
         RETURNING *",
    )
    .bind(user_rating)
    .bind(user_feedback)
    .bind(user_id)
    .fetch_optional(executor)
    .await
    .context("failed to update plan feedback")?;

    Ok(row)
}

// -----------------------------------------------------------------------
// Versions
// -----------------------------------------------------------------------

/// Columns of a new `plan_versions` row; the version number is assigned
/// on insert.
#[derive(Debug, Clone, Copy)]
pub struct NewPlanVersion<'a> {
    pub user_id: Uuid,
    pub plan_type: PlanType,
    pub plan_id: Uuid,
    pub plan_data: &'a serde_json::Value,
    pub modification_reason: &'a str,
    pub modified_by_user: bool,
    pub is_current: bool,
}

/// Insert a version numbered one past the user's highest for the plan
/// type. Concurrent inserts for the same (user, plan type) must be
/// serialized by the caller; a lost race is a unique violation.
pub async fn insert_version(
    executor: impl PgExecutor<'_>,
    version: NewPlanVersion<'_>,
) -> Result<PlanVersion> {
    let row = sqlx::query_as::<_, PlanVersion>(
        "INSERT INTO plan_versions \
             (user_id, plan_type, plan_id, version_number, plan_data, modification_reason, \
              modified_by_user, is_current) \
         SELECT $1, $2, $3, COALESCE(MAX(version_number), 0) + 1, $4, $5, $6, $7 \
         FROM plan_versions WHERE user_id = $1 AND plan_type = $2 \
         RETURNING *",
    )
    .bind(version.user_id)
    .bind(version.plan_type)
    .bind(version.plan_id)
    .bind(Json(version.plan_data))
    .bind(version.modification_reason)
    .bind(version.modified_by_user)
    .bind(version.is_current)
    .fetch_one(executor)
    .await
    .context("failed to insert plan version")?;

    Ok(row)
}

/// A user's versions of one plan type, newest first.
pub async fn list_versions(
    executor: impl PgExecutor<'_>,
    user_id: Uuid,
    plan_type: PlanType,
) -> Result<Vec<PlanVersion>> {
    let rows = sqlx::query_as::<_, PlanVersion>(
        "SELECT * FROM plan_versions WHERE user_id = $1 AND plan_type = $2 \
         ORDER BY version_number DESC",
    )
    .bind(user_id)
    .bind(plan_type)
    .fetch_all(executor)
    .await
    .context("failed to list plan versions")?;

    Ok(rows)
}
