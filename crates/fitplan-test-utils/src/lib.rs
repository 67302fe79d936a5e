//! Shared test utilities for fitplan integration tests.
//!
//! Provides a PostgreSQL instance shared across tests. Each test gets its
//! own database within the instance.
//!
//! Two modes:
//! - **`FITPLAN_TEST_PG_URL`** set: use that server directly. No
//!   testcontainers overhead per process.
//! - **No env var**: spin up a container via testcontainers, shared per
//!   binary through a `OnceCell`.
//!
//! When neither is available (no Docker daemon) the harness panics, so a
//! missing database fails the suite instead of passing it.

use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use fitplan_db::models::{Currency, QuestionType};
use fitplan_db::pool;
use fitplan_db::queries::{payments, progress, questionnaire, users};

/// Environment variable naming an already-running server for tests.
pub const TEST_PG_URL_VAR: &str = "FITPLAN_TEST_PG_URL";

/// Shared server state: base URL and optional container handle (kept alive).
struct SharedPg {
    base_url: String,
    /// Held to keep the container alive. `None` when using an external URL.
    _container: Option<ContainerAsync<Postgres>>,
}

/// Lazily-initialized shared PostgreSQL.
static SHARED_PG: OnceCell<SharedPg> = OnceCell::const_new();

/// Server root from the external URL variable, without a trailing slash.
/// Blank values count as unset.
fn external_base_url(value: Option<String>) -> Option<String> {
    let url = value?;
    let url = url.trim().trim_end_matches('/');
    (!url.is_empty()).then(|| url.to_owned())
}

async fn init_shared_pg() -> SharedPg {
    if let Some(base_url) = external_base_url(std::env::var(TEST_PG_URL_VAR).ok()) {
        return SharedPg {
            base_url,
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("16")
        .start()
        .await
        .unwrap_or_else(|e| {
            panic!("no {TEST_PG_URL_VAR} set and the PostgreSQL container failed to start: {e}")
        });

    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("failed to get mapped port");

    SharedPg {
        base_url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _container: Some(container),
    }
}

/// Base URL for the shared PostgreSQL (server root, no database name).
///
/// Lazily starts a container on first call unless `FITPLAN_TEST_PG_URL`
/// is set. Panics when neither works.
pub async fn pg_url() -> &'static str {
    let shared = SHARED_PG.get_or_init(init_shared_pg).await;
    &shared.base_url
}

/// Create a temporary database with migrations applied.
///
/// Returns `(pool, db_name)`. Call [`drop_test_db`] with the returned
/// `db_name` when the test is done.
pub async fn create_test_db() -> (PgPool, String) {
    let base_url = pg_url().await;

    let maint_url = format!("{base_url}/postgres");
    let maint_pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&maint_url)
        .await
        .expect("failed to connect to maintenance database");

    let db_name = format!("fitplan_test_{}", Uuid::new_v4().simple());
    let stmt = format!("CREATE DATABASE {db_name}");
    maint_pool
        .execute(stmt.as_str())
        .await
        .unwrap_or_else(|e| panic!("failed to create temp database {db_name}: {e}"));
    maint_pool.close().await;

    let temp_url = format!("{base_url}/{db_name}");
    let temp_pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&temp_url)
        .await
        .unwrap_or_else(|e| panic!("failed to connect to temp database {db_name}: {e}"));

    pool::run_migrations(&temp_pool)
        .await
        .expect("migrations should succeed");

    (temp_pool, db_name)
}

/// URL of a database created by [`create_test_db`].
pub async fn test_db_url(db_name: &str) -> String {
    format!("{}/{db_name}", pg_url().await)
}

/// Drop a temporary database.
///
/// Terminates existing connections and drops the database. Safe to call
/// even if the database was already dropped.
pub async fn drop_test_db(db_name: &str) {
    let base_url = pg_url().await;
    let maint_url = format!("{base_url}/postgres");

    let Ok(maint_pool) = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&maint_url)
        .await
    else {
        return;
    };

    let terminate = format!(
        "SELECT pg_terminate_backend(pid) \
         FROM pg_stat_activity \
         WHERE datname = '{db_name}' AND pid <> pg_backend_pid()"
    );
    let _ = maint_pool.execute(terminate.as_str()).await;

    let stmt = format!("DROP DATABASE IF EXISTS {db_name}");
    let _ = maint_pool.execute(stmt.as_str()).await;
    maint_pool.close().await;
}

// ---------------------------------------------------------------------------
// Seeding
// ---------------------------------------------------------------------------

/// IDs created by the seeding helpers.
#[derive(Debug, Clone, Copy)]
pub struct SeededUser {
    pub user_id: Uuid,
    pub goal_id: Uuid,
    pub user_goal_id: Uuid,
    /// Set by [`seed_ready_user`] only.
    pub payment_id: Option<Uuid>,
}

/// A unique phone number per call.
pub fn unique_phone() -> String {
    let digits: String = Uuid::new_v4()
        .as_u128()
        .to_string()
        .chars()
        .take(9)
        .collect();
    format!("+98{digits}")
}

/// Seed a user who picked `goal_name` and answered its questionnaire, but
/// has not paid. Progress ends at `payment_pending`.
pub async fn seed_questionnaire_user(pool: &PgPool, goal_name: &str) -> Result<SeededUser> {
    let user = users::insert_user(pool, &unique_phone(), "Test", "User").await?;
    let goal = questionnaire::upsert_goal(pool, goal_name, "seeded goal").await?;

    let age = questionnaire::insert_question(
        pool,
        Some(goal.id),
        "What is your age?",
        QuestionType::Number,
        1,
    )
    .await?;
    let experience = questionnaire::insert_question(
        pool,
        Some(goal.id),
        "What is your fitness experience level?",
        QuestionType::Choice,
        2,
    )
    .await?;
    let equipment = questionnaire::insert_question(
        pool,
        Some(goal.id),
        "What equipment do you have access to?",
        QuestionType::MultiChoice,
        3,
    )
    .await?;

    questionnaire::upsert_answer(pool, user.id, age.id, None, Some(29.0), None, &[]).await?;
    questionnaire::upsert_answer(
        pool,
        user.id,
        experience.id,
        None,
        None,
        Some("intermediate"),
        &[],
    )
    .await?;
    questionnaire::upsert_answer(
        pool,
        user.id,
        equipment.id,
        None,
        None,
        None,
        &["dumbbells".to_owned(), "yoga mat".to_owned()],
    )
    .await?;

    let user_goal = questionnaire::complete_user_goal(pool, user.id, goal.id).await?;

    progress::get_or_create(pool, user.id).await?;
    progress::set_selected_goal(pool, user.id, user_goal.id).await?;
    sqlx::query(
        "UPDATE user_progress \
         SET current_step = 'payment_pending', \
             completed_steps = ARRAY['goal_selection', 'questionnaire'] \
         WHERE user_id = $1",
    )
    .bind(user.id)
    .execute(pool)
    .await?;

    Ok(SeededUser {
        user_id: user.id,
        goal_id: goal.id,
        user_goal_id: user_goal.id,
        payment_id: None,
    })
}

/// Seed a user with a completed questionnaire and a successful payment,
/// ready for plan generation. Progress ends at `payment_completed`.
pub async fn seed_ready_user(pool: &PgPool, goal_name: &str) -> Result<SeededUser> {
    let mut seeded = seed_questionnaire_user(pool, goal_name).await?;

    let payment = payments::insert_pending(
        pool,
        seeded.user_id,
        500_000,
        Currency::Irr,
        "plan purchase",
        "mock",
    )
    .await?;
    let ref_id = format!("TESTREF{}", Uuid::new_v4().simple());
    payments::mark_successful(
        pool,
        payment.id,
        &ref_id,
        Some("**** **** **** 1234"),
        &serde_json::json!({ "code": 100 }),
    )
    .await?;
    progress::set_payment(pool, seeded.user_id, payment.id).await?;
    sqlx::query(
        "UPDATE user_progress \
         SET current_step = 'payment_completed', \
             completed_steps = ARRAY['goal_selection', 'questionnaire', 'payment_pending'] \
         WHERE user_id = $1",
    )
    .bind(seeded.user_id)
    .execute(pool)
    .await?;

    seeded.payment_id = Some(payment.id);
    Ok(seeded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_url_is_normalized() {
        assert_eq!(
            external_base_url(Some("postgresql://u:p@db:5432/".into())).as_deref(),
            Some("postgresql://u:p@db:5432")
        );
        assert_eq!(
            external_base_url(Some(" postgresql://db ".into())).as_deref(),
            Some("postgresql://db")
        );
    }

    #[test]
    fn unset_or_blank_url_falls_through_to_container() {
        assert_eq!(external_base_url(None), None);
        assert_eq!(external_base_url(Some(String::new())), None);
        assert_eq!(external_base_url(Some("  /".into())), None);
    }

    #[tokio::test]
    async fn create_test_db_returns_a_migrated_database() {
        let (pool, db_name) = create_test_db().await;
        assert!(db_name.starts_with("fitplan_test_"));
        assert!(test_db_url(&db_name).await.ends_with(&db_name));

        let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(users, 0);

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
