//! Integration tests for the `plan_generations` queries.

use chrono::{Duration, Utc};

use fitplan_db::is_unique_violation;
use fitplan_db::models::GenerationStatus;
use fitplan_db::queries::generations;
use fitplan_test_utils::{SeededUser, create_test_db, drop_test_db, seed_ready_user};

async fn queue_one(pool: &sqlx::PgPool, seeded: &SeededUser) -> fitplan_db::models::PlanGeneration {
    generations::insert_queued(
        pool,
        seeded.user_goal_id,
        seeded.user_id,
        seeded.payment_id.expect("ready user has a payment"),
        3,
    )
    .await
    .expect("insert queued job")
}

#[tokio::test]
async fn insert_queued_stamps_queued_at() {
    let (pool, db_name) = create_test_db().await;
    let seeded = seed_ready_user(&pool, "weight_loss").await.expect("seed");

    let job = queue_one(&pool, &seeded).await;
    assert_eq!(job.status, GenerationStatus::Queued);
    assert!(job.queued_at.is_some());
    assert!(job.started_at.is_none());
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.max_retries, 3);
    assert_eq!(job.error_message, "");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn second_active_job_for_same_goal_is_a_unique_violation() {
    let (pool, db_name) = create_test_db().await;
    let seeded = seed_ready_user(&pool, "weight_loss").await.expect("seed");
    queue_one(&pool, &seeded).await;

    let err = generations::insert_queued(
        &pool,
        seeded.user_goal_id,
        seeded.user_id,
        seeded.payment_id.unwrap(),
        3,
    )
    .await
    .unwrap_err();
    assert!(is_unique_violation(&err), "got {err:#}");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_succeeds_once() {
    let (pool, db_name) = create_test_db().await;
    let seeded = seed_ready_user(&pool, "muscle_gain").await.expect("seed");
    let job = queue_one(&pool, &seeded).await;

    let (a, b) = tokio::join!(
        generations::claim(&pool, job.id),
        generations::claim(&pool, job.id)
    );
    let winners = [a.unwrap(), b.unwrap()]
        .into_iter()
        .filter(Option::is_some)
        .count();
    assert_eq!(winners, 1);

    let current = generations::get_generation(&pool, job.id).await.unwrap().unwrap();
    assert_eq!(current.status, GenerationStatus::Processing);
    assert!(current.started_at.is_some());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn requeue_respects_bound_and_observed_count() {
    let (pool, db_name) = create_test_db().await;
    let seeded = seed_ready_user(&pool, "endurance").await.expect("seed");
    let job = queue_one(&pool, &seeded).await;

    // Not failed yet.
    assert!(generations::requeue_failed(&pool, job.id, 0).await.unwrap().is_none());

    generations::claim(&pool, job.id).await.unwrap();
    assert_eq!(generations::mark_failed(&pool, job.id, "boom").await.unwrap(), 1);

    // Stale observation loses.
    assert!(generations::requeue_failed(&pool, job.id, 5).await.unwrap().is_none());

    let requeued = generations::requeue_failed(&pool, job.id, 0)
        .await
        .unwrap()
        .expect("requeue should succeed");
    assert_eq!(requeued.status, GenerationStatus::Queued);
    assert_eq!(requeued.retry_count, 1);
    assert_eq!(requeued.error_message, "");
    assert!(requeued.started_at.is_none());
    assert!(requeued.completed_at.is_none());

    // Exhaust: force retry_count to the bound.
    sqlx::query("UPDATE plan_generations SET status = 'failed', retry_count = 3 WHERE id = $1")
        .bind(job.id)
        .execute(&pool)
        .await
        .unwrap();
    assert!(generations::requeue_failed(&pool, job.id, 3).await.unwrap().is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn cancel_only_from_active_states() {
    let (pool, db_name) = create_test_db().await;
    let seeded = seed_ready_user(&pool, "flexibility").await.expect("seed");
    let job = queue_one(&pool, &seeded).await;

    let cancelled = generations::cancel(&pool, job.id).await.unwrap().expect("cancel queued");
    assert_eq!(cancelled.status, GenerationStatus::Cancelled);

    assert!(generations::cancel(&pool, job.id).await.unwrap().is_none());
    assert_eq!(generations::mark_failed(&pool, job.id, "late").await.unwrap(), 0);

    // A cancelled job frees the slot.
    let again = queue_one(&pool, &seeded).await;
    assert_ne!(again.id, job.id);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn stale_processing_jobs_are_failed_and_old_failures_deleted() {
    let (pool, db_name) = create_test_db().await;
    let seeded = seed_ready_user(&pool, "weight_loss").await.expect("seed");
    let job = queue_one(&pool, &seeded).await;
    generations::claim(&pool, job.id).await.unwrap();

    sqlx::query(
        "UPDATE plan_generations \
         SET started_at = NOW() - INTERVAL '2 hours', created_at = NOW() - INTERVAL '10 days' \
         WHERE id = $1",
    )
    .bind(job.id)
    .execute(&pool)
    .await
    .unwrap();

    let reset = generations::fail_stale_processing(&pool, Utc::now() - Duration::minutes(30), "lost")
        .await
        .unwrap();
    assert_eq!(reset, vec![job.id]);

    let counts = generations::status_counts(&pool).await.unwrap();
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.total, 1);

    let deleted = generations::delete_failed_before(&pool, Utc::now() - Duration::days(7))
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(generations::get_generation(&pool, job.id).await.unwrap().is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}
