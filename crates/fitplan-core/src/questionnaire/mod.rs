//! Questionnaire submission and the assembler's view of the answers.

use anyhow::{Context, Result, bail};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use fitplan_db::models::{ProgressStep, QuestionType, UserGoal};
use fitplan_db::queries::{progress as progress_db, questionnaire as db};

use crate::assembler::{AnswerValue, QuestionnaireAnswers};
use crate::progress;

/// One answer as submitted by the user.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedAnswer {
    pub question_id: Uuid,
    pub value: AnswerValue,
}

impl SubmittedAnswer {
    pub fn new(question_id: Uuid, value: AnswerValue) -> Self {
        Self { question_id, value }
    }
}

/// Whether `value` is an acceptable answer to a question of `question_type`.
pub fn value_matches(question_type: QuestionType, value: &AnswerValue) -> bool {
    matches!(
        (question_type, value),
        (QuestionType::Text, AnswerValue::Text(_))
            | (QuestionType::Number, AnswerValue::Number(_))
            | (QuestionType::Choice, AnswerValue::Choice(_))
            | (QuestionType::MultiChoice, AnswerValue::MultiChoice(_))
    )
}

/// Record the user's answers for `goal_id` and complete the questionnaire.
///
/// Runs in one transaction: answers are upserted, the (user, goal)
/// completion is recorded and selected on the progress row, and the
/// `goal_selection` and `questionnaire` steps are marked completed.
/// Unknown goals, questions that belong to another goal, and values of
/// the wrong kind are rejected before anything is written.
pub async fn submit_questionnaire(
    pool: &PgPool,
    user_id: Uuid,
    goal_id: Uuid,
    answers: &[SubmittedAnswer],
) -> Result<UserGoal> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let goal = db::get_goal(&mut *tx, goal_id)
        .await?
        .with_context(|| format!("goal {goal_id} not found"))?;

    for answer in answers {
        let question = db::get_question(&mut *tx, answer.question_id)
            .await?
            .with_context(|| format!("question {} not found", answer.question_id))?;
        if question.goal_id.is_some_and(|g| g != goal.id) {
            bail!(
                "question {} does not belong to goal {}",
                question.id,
                goal.name
            );
        }
        if !value_matches(question.question_type, &answer.value) {
            bail!(
                "answer to {:?} must be a {} value",
                question.question,
                question.question_type
            );
        }

        let (text, numeric, choice, multi) = match &answer.value {
            AnswerValue::Text(s) => (Some(s.as_str()), None, None, &[][..]),
            AnswerValue::Number(n) => (None, Some(*n), None, &[][..]),
            AnswerValue::Choice(s) => (None, None, Some(s.as_str()), &[][..]),
            AnswerValue::MultiChoice(items) => (None, None, None, items.as_slice()),
        };
        db::upsert_answer(&mut *tx, user_id, question.id, text, numeric, choice, multi).await?;
    }

    let user_goal = db::complete_user_goal(&mut *tx, user_id, goal.id).await?;
    progress_db::get_or_create(&mut *tx, user_id).await?;
    progress_db::set_selected_goal(&mut *tx, user_id, user_goal.id).await?;
    progress::mark_step_completed_tx(&mut tx, user_id, ProgressStep::GoalSelection).await?;
    progress::mark_step_completed_tx(&mut tx, user_id, ProgressStep::Questionnaire).await?;

    tx.commit().await.context("failed to commit questionnaire")?;

    tracing::info!(
        user_id = %user_id,
        goal = %goal.name,
        user_goal_id = %user_goal.id,
        answers = answers.len(),
        "questionnaire submitted"
    );
    Ok(user_goal)
}

/// Build the assembler input for a completed questionnaire.
pub async fn load_answers(
    executor: impl PgExecutor<'_> + Copy,
    user_goal_id: Uuid,
) -> Result<QuestionnaireAnswers> {
    let user_goal = db::get_user_goal(executor, user_goal_id)
        .await?
        .with_context(|| format!("questionnaire {user_goal_id} not found"))?;
    let goal = db::get_goal(executor, user_goal.goal_id)
        .await?
        .with_context(|| format!("goal {} not found", user_goal.goal_id))?;
    let rows = db::answers_for_user_goal(executor, user_goal_id).await?;

    Ok(QuestionnaireAnswers::from_rows(goal.name, rows))
}
