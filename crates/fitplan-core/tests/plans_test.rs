//! Integration tests for plan statistics and modification requests.

use fitplan_core::assembler::RuleBasedAssembler;
use fitplan_core::generation::dispatch::enqueue_generation;
use fitplan_core::plans::{self, PlanError};
use fitplan_core::progress;
use fitplan_core::queue::PollingQueue;
use fitplan_core::worker::{ProcessOutcome, WorkerConfig, process_generation};
use fitplan_db::models::{PlanType, ProgressStep};
use fitplan_db::queries::users;
use fitplan_test_utils::{create_test_db, drop_test_db, seed_ready_user, unique_phone};
use uuid::Uuid;

/// A user whose plans were generated by the rule-based assembler.
async fn user_with_plans(pool: &sqlx::PgPool) -> Uuid {
    let seeded = seed_ready_user(pool, "weight_loss").await.expect("seed");
    let job = enqueue_generation(pool, &PollingQueue, seeded.user_id, 3)
        .await
        .expect("enqueue");
    let outcome = process_generation(pool, &RuleBasedAssembler, job.id, &WorkerConfig::default())
        .await
        .expect("process");
    assert_eq!(outcome, ProcessOutcome::Completed);
    seeded.user_id
}

#[tokio::test]
async fn statistics_summarize_active_plans() {
    let (pool, db_name) = create_test_db().await;
    let user_id = user_with_plans(&pool).await;

    let stats = plans::plan_statistics(&pool, user_id)
        .await
        .unwrap()
        .expect("active plans");
    assert!((0..=1).contains(&stats.days_since_start));
    assert_eq!(stats.feedback.rating, None);
    assert!(!stats.feedback.has_feedback);

    // Statistics are read-only; the overview is what completes plan_ready.
    let p = progress::get_progress(&pool, user_id).await.unwrap();
    assert_eq!(p.current_step, ProgressStep::PlanReady);

    let overview = plans::get_plan_overview(&pool, user_id)
        .await
        .unwrap()
        .expect("active plans");
    assert_eq!(stats.plan_created, overview.summary.created_at);
    assert_eq!(stats.start_date, overview.summary.start_date);
    assert_eq!(stats.diet.daily_calories, overview.diet.daily_calorie_target);
    assert_eq!(stats.diet.duration_weeks, overview.diet.duration_weeks);
    assert_eq!(stats.diet.diet_type, overview.diet.diet_type);
    assert_eq!(stats.workout.sessions_per_week, overview.workout.sessions_per_week);
    assert_eq!(stats.workout.difficulty, overview.workout.difficulty_level);
    assert_eq!(stats.workout.total_exercises, overview.workout.exercises.len());
    assert!(stats.workout.total_exercises > 0);

    plans::submit_feedback(&pool, user_id, Some(4), Some("more cardio"))
        .await
        .unwrap();
    let stats = plans::plan_statistics(&pool, user_id).await.unwrap().unwrap();
    assert_eq!(stats.feedback.rating, Some(4));
    assert!(stats.feedback.has_feedback);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn statistics_without_plans_is_none() {
    let (pool, db_name) = create_test_db().await;
    let user = users::insert_user(&pool, &unique_phone(), "No", "Plan")
        .await
        .unwrap();

    assert!(plans::plan_statistics(&pool, user.id).await.unwrap().is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn modification_requests_are_numbered_per_plan_type() {
    let (pool, db_name) = create_test_db().await;
    let user_id = user_with_plans(&pool).await;
    let overview = plans::get_plan_overview(&pool, user_id)
        .await
        .unwrap()
        .expect("active plans");

    let first = plans::request_modification(&pool, user_id, PlanType::Diet, "  no dairy please ")
        .await
        .unwrap();
    assert_eq!(first.version_number, 1);
    assert_eq!(first.plan_type, PlanType::Diet);
    assert_eq!(first.plan_id, overview.diet.id);
    assert_eq!(first.modification_reason, "no dairy please");
    assert_eq!(
        first.plan_data.0,
        serde_json::json!({ "modification_request": "no dairy please" })
    );
    assert!(first.modified_by_user);
    assert!(!first.is_current);

    let second = plans::request_modification(&pool, user_id, PlanType::Diet, "fewer carbs")
        .await
        .unwrap();
    assert_eq!(second.version_number, 2);

    let workout = plans::request_modification(&pool, user_id, PlanType::Workout, "no running")
        .await
        .unwrap();
    assert_eq!(workout.version_number, 1);
    assert_eq!(workout.plan_id, overview.workout.id);

    let history = plans::plan_history(&pool, user_id, PlanType::Diet).await.unwrap();
    let numbers: Vec<i32> = history.iter().map(|v| v.version_number).collect();
    assert_eq!(numbers, vec![2, 1]);
    assert_eq!(
        plans::plan_history(&pool, user_id, PlanType::Workout)
            .await
            .unwrap()
            .len(),
        1
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn concurrent_modification_requests_get_distinct_numbers() {
    let (pool, db_name) = create_test_db().await;
    let user_id = user_with_plans(&pool).await;

    let requests = (0..5).map(|i| {
        let pool = pool.clone();
        async move {
            plans::request_modification(&pool, user_id, PlanType::Workout, &format!("change {i}"))
                .await
        }
    });
    let results = futures::future::join_all(requests).await;

    let mut numbers: Vec<i32> = results
        .into_iter()
        .map(|r| r.expect("request").version_number)
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn modification_request_rejections() {
    let (pool, db_name) = create_test_db().await;
    let user = users::insert_user(&pool, &unique_phone(), "No", "Plan")
        .await
        .unwrap();

    let err = plans::request_modification(&pool, user.id, PlanType::Diet, "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::EmptyRequest));

    let err = plans::request_modification(&pool, user.id, PlanType::Diet, "no dairy")
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::NoActivePlan(id) if id == user.id));
    assert!(
        plans::plan_history(&pool, user.id, PlanType::Diet)
            .await
            .unwrap()
            .is_empty()
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}
