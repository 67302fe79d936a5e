//! Integration tests for questionnaire submission and funnel progress.

use fitplan_core::assembler::AnswerValue;
use fitplan_core::progress::{self, ProgressTracker};
use fitplan_core::questionnaire::{SubmittedAnswer, load_answers, submit_questionnaire};
use fitplan_db::models::{ProgressStep, QuestionType};
use fitplan_db::queries::{questionnaire, users};
use fitplan_test_utils::{create_test_db, drop_test_db, unique_phone};

#[tokio::test]
async fn fresh_user_starts_at_goal_selection() {
    let (pool, db_name) = create_test_db().await;
    let user = users::insert_user(&pool, &unique_phone(), "New", "User")
        .await
        .unwrap();

    let p = progress::get_progress(&pool, user.id).await.unwrap();
    assert_eq!(p.current_step, ProgressStep::GoalSelection);
    assert!(p.completed_steps.is_empty());
    assert!(ProgressTracker::can_access_step(&p, ProgressStep::GoalSelection));
    assert!(!ProgressTracker::can_access_step(&p, ProgressStep::Questionnaire));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn completing_a_step_by_name() {
    let (pool, db_name) = create_test_db().await;
    let user = users::insert_user(&pool, &unique_phone(), "Step", "User")
        .await
        .unwrap();

    progress::mark_step_completed(&pool, user.id, ProgressStep::GoalSelection)
        .await
        .unwrap();
    let p = progress::mark_step_completed_named(&pool, user.id, "questionnaire")
        .await
        .unwrap();
    assert!(p.completed_steps.contains(ProgressStep::Questionnaire));
    assert_eq!(p.current_step, ProgressStep::PaymentPending);

    // Repeating is a no-op.
    let again = progress::mark_step_completed_named(&pool, user.id, "questionnaire")
        .await
        .unwrap();
    assert_eq!(again.current_step, ProgressStep::PaymentPending);
    assert_eq!(again.completed_steps, p.completed_steps);
    assert_eq!(again.updated_at, p.updated_at);

    let err = progress::mark_step_completed_named(&pool, user.id, "onboarding")
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("onboarding"), "got {err:#}");
    let unchanged = progress::get_progress(&pool, user.id).await.unwrap();
    assert_eq!(unchanged.current_step, ProgressStep::PaymentPending);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn submitting_a_questionnaire() {
    let (pool, db_name) = create_test_db().await;
    let user = users::insert_user(&pool, &unique_phone(), "Quiz", "User")
        .await
        .unwrap();
    let goal = questionnaire::upsert_goal(&pool, "muscle_gain", "Build muscle")
        .await
        .unwrap();
    let other = questionnaire::upsert_goal(&pool, "flexibility", "Stretch")
        .await
        .unwrap();
    let weight = questionnaire::insert_question(
        &pool,
        Some(goal.id),
        "What is your current weight?",
        QuestionType::Number,
        1,
    )
    .await
    .unwrap();
    let diet = questionnaire::insert_question(
        &pool,
        None,
        "Any dietary restrictions?",
        QuestionType::MultiChoice,
        2,
    )
    .await
    .unwrap();
    let foreign = questionnaire::insert_question(
        &pool,
        Some(other.id),
        "Can you touch your toes?",
        QuestionType::Choice,
        1,
    )
    .await
    .unwrap();

    // Wrong goal: rejected, nothing written.
    let err = submit_questionnaire(
        &pool,
        user.id,
        goal.id,
        &[SubmittedAnswer::new(foreign.id, AnswerValue::Choice("no".into()))],
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("does not belong"), "got {err:#}");

    // Wrong kind: rejected.
    let err = submit_questionnaire(
        &pool,
        user.id,
        goal.id,
        &[SubmittedAnswer::new(weight.id, AnswerValue::Text("heavy".into()))],
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("number"), "got {err:#}");
    assert!(
        questionnaire::completed_goal_selection(&pool, user.id)
            .await
            .unwrap()
            .is_none()
    );

    let user_goal = submit_questionnaire(
        &pool,
        user.id,
        goal.id,
        &[
            SubmittedAnswer::new(weight.id, AnswerValue::Number(72.5)),
            SubmittedAnswer::new(
                diet.id,
                AnswerValue::MultiChoice(vec!["vegetarian".into()]),
            ),
        ],
    )
    .await
    .unwrap();
    assert!(user_goal.is_completed);
    assert!(user_goal.completed_at.is_some());

    let p = progress::get_progress(&pool, user.id).await.unwrap();
    assert_eq!(p.current_step, ProgressStep::PaymentPending);
    assert!(p.completed_steps.contains(ProgressStep::GoalSelection));
    assert!(p.completed_steps.contains(ProgressStep::Questionnaire));
    assert_eq!(p.selected_goal_id, Some(user_goal.id));

    let answers = load_answers(&pool, user_goal.id).await.unwrap();
    assert_eq!(answers.goal, "muscle_gain");
    assert_eq!(answers.answers.len(), 2);
    assert_eq!(answers.answers[0].value, AnswerValue::Number(72.5));
    assert_eq!(
        answers.answers[1].value,
        AnswerValue::MultiChoice(vec!["vegetarian".into()])
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}
