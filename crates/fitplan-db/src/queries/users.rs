//! Database query functions for the `users` table.

use anyhow::{Context, Result};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::User;

/// Insert a new user.
pub async fn insert_user(
    executor: impl PgExecutor<'_>,
    phone: &str,
    first_name: &str,
    last_name: &str,
) -> Result<User> {
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (phone, first_name, last_name) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(phone)
    .bind(first_name)
    .bind(last_name)
    .fetch_one(executor)
    .await
    .with_context(|| format!("failed to insert user with phone {phone}"))?;

    Ok(user)
}

/// Fetch a single user by ID.
pub async fn get_user(executor: impl PgExecutor<'_>, id: Uuid) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch user")?;

    Ok(user)
}

/// Fetch a single user by phone number.
pub async fn get_user_by_phone(executor: impl PgExecutor<'_>, phone: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE phone = $1")
        .bind(phone)
        .fetch_optional(executor)
        .await
        .context("failed to fetch user by phone")?;

    Ok(user)
}
