//! Database query functions for the `payments` table.

use anyhow::{Context, Result};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{Currency, Payment};

/// Insert a new `pending` payment.
pub async fn insert_pending(
    executor: impl PgExecutor<'_>,
    user_id: Uuid,
    amount: i64,
    currency: Currency,
    description: &str,
    gateway: &str,
) -> Result<Payment> {
    let payment = sqlx::query_as::<_, Payment>(
        "INSERT INTO payments (user_id, amount, currency, description, gateway) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(user_id)
    .bind(amount)
    .bind(currency)
    .bind(description)
    .bind(gateway)
    .fetch_one(executor)
    .await
    .context("failed to insert payment")?;

    Ok(payment)
}

pub async fn get_payment(executor: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Payment>> {
    let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch payment")?;

    Ok(payment)
}

pub async fn get_by_authority(
    executor: impl PgExecutor<'_>,
    authority: &str,
) -> Result<Option<Payment>> {
    let payment =
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE gateway_authority = $1")
            .bind(authority)
            .fetch_optional(executor)
            .await
            .context("failed to fetch payment by authority")?;

    Ok(payment)
}

/// The user's most recent successful payment.
pub async fn latest_successful_for_user(
    executor: impl PgExecutor<'_>,
    user_id: Uuid,
) -> Result<Option<Payment>> {
    let payment = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments \
         WHERE user_id = $1 AND status = 'successful' \
         ORDER BY created_at DESC \
         LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
    .context("failed to look up latest successful payment")?;

    Ok(payment)
}

/// Record the gateway authority issued for a pending payment.
pub async fn set_authority(
    executor: impl PgExecutor<'_>,
    id: Uuid,
    authority: &str,
    response: &serde_json::Value,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE payments \
         SET gateway_authority = $1, gateway_response = $2, updated_at = NOW() \
         WHERE id = $3 AND status = 'pending'",
    )
    .bind(authority)
    .bind(response)
    .bind(id)
    .execute(executor)
    .await
    .context("failed to set payment authority")?;

    Ok(result.rows_affected())
}

/// Move a pending payment to `failed`, keeping the gateway's answer.
pub async fn mark_failed(
    executor: impl PgExecutor<'_>,
    id: Uuid,
    response: &serde_json::Value,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE payments \
         SET status = 'failed', gateway_response = $1, updated_at = NOW() \
         WHERE id = $2 AND status = 'pending'",
    )
    .bind(response)
    .bind(id)
    .execute(executor)
    .await
    .context("failed to mark payment failed")?;

    Ok(result.rows_affected())
}

/// Move a pending payment to `cancelled` (user aborted at the gateway).
pub async fn mark_cancelled(executor: impl PgExecutor<'_>, id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE payments \
         SET status = 'cancelled', updated_at = NOW() \
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .execute(executor)
    .await
    .context("failed to mark payment cancelled")?;

    Ok(result.rows_affected())
}

/// Move a pending payment to `successful` with the verification details.
///
/// Returns `None` when the payment was no longer pending.
pub async fn mark_successful(
    executor: impl PgExecutor<'_>,
    id: Uuid,
    ref_id: &str,
    card_number_masked: Option<&str>,
    response: &serde_json::Value,
) -> Result<Option<Payment>> {
    let payment = sqlx::query_as::<_, Payment>(
        "UPDATE payments \
         SET status = 'successful', \
             ref_id = $1, \
             tracking_code = $1, \
             card_number_masked = $2, \
             gateway_response = $3, \
             verified_at = NOW(), \
             updated_at = NOW() \
         WHERE id = $4 AND status = 'pending' \
         RETURNING *",
    )
    .bind(ref_id)
    .bind(card_number_masked)
    .bind(response)
    .bind(id)
    .fetch_optional(executor)
    .await
    .context("failed to mark payment successful")?;

    Ok(payment)
}
