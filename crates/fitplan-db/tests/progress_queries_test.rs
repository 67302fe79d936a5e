//! Integration tests for the `user_progress` queries.

use fitplan_db::models::{CompletedSteps, ProgressStep};
use fitplan_db::queries::{progress, users};
use fitplan_test_utils::{create_test_db, drop_test_db, unique_phone};

#[tokio::test]
async fn get_or_create_is_idempotent() {
    let (pool, db_name) = create_test_db().await;
    let user = users::insert_user(&pool, &unique_phone(), "A", "B").await.unwrap();

    let first = progress::get_or_create(&pool, user.id).await.unwrap();
    assert_eq!(first.current_step, ProgressStep::GoalSelection);
    assert!(first.completed_steps.is_empty());

    let second = progress::get_or_create(&pool, user.id).await.unwrap();
    assert_eq!(second.created_at, first.created_at);

    let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_progress")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn save_steps_round_trips_completed_set() {
    let (pool, db_name) = create_test_db().await;
    let user = users::insert_user(&pool, &unique_phone(), "A", "B").await.unwrap();
    progress::get_or_create(&pool, user.id).await.unwrap();

    let steps: CompletedSteps = [ProgressStep::GoalSelection, ProgressStep::Questionnaire]
        .into_iter()
        .collect();
    let saved = progress::save_steps(&pool, user.id, ProgressStep::PaymentPending, &steps)
        .await
        .unwrap();
    assert_eq!(saved.current_step, ProgressStep::PaymentPending);
    assert_eq!(saved.completed_steps, steps);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn unknown_stored_step_fails_to_decode() {
    let (pool, db_name) = create_test_db().await;
    let user = users::insert_user(&pool, &unique_phone(), "A", "B").await.unwrap();
    progress::get_or_create(&pool, user.id).await.unwrap();

    // The array column has no CHECK; decoding is the guard.
    sqlx::query("UPDATE user_progress SET completed_steps = ARRAY['warmup'] WHERE user_id = $1")
        .bind(user.id)
        .execute(&pool)
        .await
        .unwrap();
    assert!(progress::get_or_create(&pool, user.id).await.is_err());

    pool.close().await;
    drop_test_db(&db_name).await;
}
