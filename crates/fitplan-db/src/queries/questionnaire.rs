//! Database query functions for `goals`, `questions`, `answers` and
//! `user_goals`.

use anyhow::{Context, Result};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{AnsweredQuestion, Goal, Question, QuestionType, UserGoal};

/// Insert a goal, or refresh the description of an existing goal with the
/// same name.
pub async fn upsert_goal(
    executor: impl PgExecutor<'_>,
    name: &str,
    description: &str,
) -> Result<Goal> {
    let goal = sqlx::query_as::<_, Goal>(
        "INSERT INTO goals (name, description) VALUES ($1, $2) \
         ON CONFLICT (name) DO UPDATE SET description = EXCLUDED.description \
         RETURNING *",
    )
    .bind(name)
    .bind(description)
    .fetch_one(executor)
    .await
    .context("failed to upsert goal")?;

    Ok(goal)
}

pub async fn get_goal(executor: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Goal>> {
    let goal = sqlx::query_as::<_, Goal>("SELECT * FROM goals WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch goal")?;

    Ok(goal)
}

pub async fn get_goal_by_name(executor: impl PgExecutor<'_>, name: &str) -> Result<Option<Goal>> {
    let goal = sqlx::query_as::<_, Goal>("SELECT * FROM goals WHERE name = $1")
        .bind(name)
        .fetch_optional(executor)
        .await
        .context("failed to fetch goal by name")?;

    Ok(goal)
}

/// Insert a question. `goal_id = None` makes it a general question shown
/// for every goal.
pub async fn insert_question(
    executor: impl PgExecutor<'_>,
    goal_id: Option<Uuid>,
    question: &str,
    question_type: QuestionType,
    position: i32,
) -> Result<Question> {
    let q = sqlx::query_as::<_, Question>(
        "INSERT INTO questions (goal_id, question, question_type, position) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(goal_id)
    .bind(question)
    .bind(question_type)
    .bind(position)
    .fetch_one(executor)
    .await
    .context("failed to insert question")?;

    Ok(q)
}

pub async fn get_question(executor: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Question>> {
    let q = sqlx::query_as::<_, Question>("SELECT * FROM questions WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch question")?;

    Ok(q)
}

/// Questions shown for a goal (goal-specific plus general), in display
/// order.
pub async fn list_questions_for_goal(
    executor: impl PgExecutor<'_>,
    goal_id: Uuid,
) -> Result<Vec<Question>> {
    let qs = sqlx::query_as::<_, Question>(
        "SELECT * FROM questions \
         WHERE goal_id = $1 OR goal_id IS NULL \
         ORDER BY position ASC, question ASC",
    )
    .bind(goal_id)
    .fetch_all(executor)
    .await
    .context("failed to list questions for goal")?;

    Ok(qs)
}

/// Insert or replace a user's answer to one question.
///
/// Exactly one of the value arguments is expected to be set; the caller
/// validates that against the question type.
#[allow(clippy::too_many_arguments)]
pub async fn upsert_answer(
    executor: impl PgExecutor<'_>,
    user_id: Uuid,
    question_id: Uuid,
    text_answer: Option<&str>,
    numeric_answer: Option<f64>,
    choice_answer: Option<&str>,
    multi_choice_answer: &[String],
) -> Result<()> {
    sqlx::query(
        "INSERT INTO answers \
             (user_id, question_id, text_answer, numeric_answer, choice_answer, multi_choice_answer) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (user_id, question_id) DO UPDATE SET \
             text_answer = EXCLUDED.text_answer, \
             numeric_answer = EXCLUDED.numeric_answer, \
             choice_answer = EXCLUDED.choice_answer, \
             multi_choice_answer = EXCLUDED.multi_choice_answer",
    )
    .bind(user_id)
    .bind(question_id)
    .bind(text_answer)
    .bind(numeric_answer)
    .bind(choice_answer)
    .bind(multi_choice_answer)
    .execute(executor)
    .await
    .context("failed to upsert answer")?;

    Ok(())
}

/// Mark the (user, goal) questionnaire as completed, creating the row if
/// needed. `completed_at` keeps its first value.
pub async fn complete_user_goal(
    executor: impl PgExecutor<'_>,
    user_id: Uuid,
    goal_id: Uuid,
) -> Result<UserGoal> {
    let ug = sqlx::query_as::<_, UserGoal>(
        "INSERT INTO user_goals (user_id, goal_id, is_completed, completed_at) \
         VALUES ($1, $2, TRUE, NOW()) \
         ON CONFLICT (user_id, goal_id) DO UPDATE SET \
             is_completed = TRUE, \
             completed_at = COALESCE(user_goals.completed_at, EXCLUDED.completed_at) \
         RETURNING *",
    )
    .bind(user_id)
    .bind(goal_id)
    .fetch_one(executor)
    .await
    .context("failed to complete user goal")?;

    Ok(ug)
}

pub async fn get_user_goal(executor: impl PgExecutor<'_>, id: Uuid) -> Result<Option<UserGoal>> {
    let ug = sqlx::query_as::<_, UserGoal>("SELECT * FROM user_goals WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch user goal")?;

    Ok(ug)
}

/// The user's completed questionnaire, if any.
///
/// The goal recorded as selected on the progress row wins; otherwise the
/// most recently completed one.
pub async fn completed_goal_selection(
    executor: impl PgExecutor<'_>,
    user_id: Uuid,
) -> Result<Option<UserGoal>> {
    let ug = sqlx::query_as::<_, UserGoal>(
        "SELECT ug.* FROM user_goals ug \
         LEFT JOIN user_progress up ON up.selected_goal_id = ug.id \
         WHERE ug.user_id = $1 AND ug.is_completed \
         ORDER BY (up.user_id IS NOT NULL) DESC, ug.completed_at DESC NULLS LAST \
         LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
    .context("failed to look up completed goal selection")?;

    Ok(ug)
}

/// All answers the user gave for the questionnaire behind `user_goal_id`,
/// joined with their questions, in display order.
pub async fn answers_for_user_goal(
    executor: impl PgExecutor<'_>,
    user_goal_id: Uuid,
) -> Result<Vec<AnsweredQuestion>> {
    let rows = sqlx::query_as::<_, AnsweredQuestion>(
        "SELECT q.question, q.question_type, \
                a.text_answer, a.numeric_answer, a.choice_answer, a.multi_choice_answer \
         FROM user_goals ug \
         JOIN questions q ON q.goal_id = ug.goal_id OR q.goal_id IS NULL \
         JOIN answers a ON a.question_id = q.id AND a.user_id = ug.user_id \
         WHERE ug.id = $1 \
         ORDER BY q.position ASC, q.question ASC",
    )
    .bind(user_goal_id)
    .fetch_all(executor)
    .await
    .context("failed to load answers for user goal")?;

    Ok(rows)
}
