//! Payments: the gateway seam and the create/verify flows around it.
//!
//! A payment starts `pending`, gets a gateway authority, and is settled
//! by the gateway callback. Only a `successful` payment unlocks plan
//! generation.

pub mod mock;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use fitplan_db::models::{Currency, Payment, PaymentStatus, ProgressStep};
use fitplan_db::queries::{payments as db, progress as progress_db};

use crate::progress;

pub use mock::{MockGateway, MockPaymentStore};

/// Smallest accepted amount, in minor units.
pub const MIN_AMOUNT: i64 = 1000;

/// What a gateway needs to open a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: i64,
    pub description: String,
    pub mobile: Option<String>,
    pub email: Option<String>,
    pub callback_url: Option<String>,
}

/// Gateway answer to a payment request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GatewayRequestOutcome {
    Accepted {
        authority: String,
        payment_url: String,
        code: i32,
    },
    Rejected {
        code: i32,
        message: String,
    },
}

/// Gateway answer to a verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GatewayVerifyOutcome {
    Verified {
        ref_id: String,
        card_pan: Option<String>,
        fee: i64,
        code: i32,
    },
    Rejected {
        code: i32,
        message: String,
    },
}

/// A payment provider.
///
/// `Err` means the gateway could not be reached; a gateway that answered
/// "no" returns a `Rejected` outcome.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Name stored on the payment row.
    fn name(&self) -> &str;

    async fn request_payment(
        &self,
        request: &PaymentRequest,
    ) -> anyhow::Result<GatewayRequestOutcome>;

    async fn verify_payment(
        &self,
        authority: &str,
        amount: i64,
    ) -> anyhow::Result<GatewayVerifyOutcome>;
}

// Compile-time assertion: PaymentGateway must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn PaymentGateway) {}
};

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("amount {amount} is below the minimum of {minimum}")]
    AmountTooSmall { amount: i64, minimum: i64 },

    #[error("no payment with authority {0}")]
    NotFound(String),

    #[error("payment was cancelled by user")]
    CancelledByUser,

    #[error("gateway rejected the payment (code {code}): {message}")]
    GatewayRejected { code: i32, message: String },

    #[error("payment verification failed: {message}")]
    VerificationFailed { code: Option<i32>, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A pending payment and where to send the user to pay it.
#[derive(Debug, Clone)]
pub struct CreatedPayment {
    pub payment: Payment,
    pub authority: String,
    pub payment_url: String,
}

/// `1234567812345678` -> `**** **** **** 5678`. Inputs shorter than four
/// characters come back unchanged.
pub fn mask_card_number(pan: &str) -> String {
    let chars: Vec<char> = pan.chars().collect();
    if chars.len() < 4 {
        return pan.to_owned();
    }
    let last4: String = chars[chars.len() - 4..].iter().collect();
    format!("**** **** **** {last4}")
}

/// Open a payment for the user with the gateway.
///
/// The payment row is written before the gateway is called, so a
/// rejection or an unreachable gateway leaves a `failed` row behind.
pub async fn create_payment(
    pool: &PgPool,
    gateway: &dyn PaymentGateway,
    user_id: Uuid,
    amount: i64,
    currency: Currency,
    mobile: Option<&str>,
) -> Result<CreatedPayment, PaymentError> {
    if amount < MIN_AMOUNT {
        return Err(PaymentError::AmountTooSmall {
            amount,
            minimum: MIN_AMOUNT,
        });
    }

    let description = format!(
        "User with id {user_id} paying {amount} {currency} on {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    );
    let payment =
        db::insert_pending(pool, user_id, amount, currency, &description, gateway.name()).await?;

    let request = PaymentRequest {
        amount,
        description,
        mobile: mobile.map(str::to_owned),
        email: None,
        callback_url: None,
    };

    let outcome = match gateway.request_payment(&request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let response = serde_json::json!({ "error": format!("{e:#}") });
            db::mark_failed(pool, payment.id, &response).await?;
            return Err(PaymentError::Other(
                e.context("payment gateway communication failed"),
            ));
        }
    };
    let response = serde_json::to_value(&outcome).context("failed to encode gateway response")?;

    match outcome {
        GatewayRequestOutcome::Accepted {
            authority,
            payment_url,
            ..
        } => {
            db::set_authority(pool, payment.id, &authority, &response).await?;
            let payment = db::get_payment(pool, payment.id)
                .await?
                .with_context(|| format!("payment {} disappeared", payment.id))?;

            tracing::info!(
                payment_id = %payment.id,
                user_id = %user_id,
                amount,
                authority = %authority,
                "payment requested"
            );
            Ok(CreatedPayment {
                payment,
                authority,
                payment_url,
            })
        }
        GatewayRequestOutcome::Rejected { code, message } => {
            db::mark_failed(pool, payment.id, &response).await?;
            tracing::warn!(payment_id = %payment.id, code, message = %message, "payment request rejected");
            Err(PaymentError::GatewayRejected { code, message })
        }
    }
}

/// Settle a payment from the gateway callback.
///
/// `callback_ok` is the callback's status flag; `false` means the user
/// aborted at the gateway. On success the payment is linked on the
/// progress row and `payment_pending` is marked completed in the same
/// transaction. Verifying an already successful payment returns it
/// unchanged.
pub async fn verify_payment(
    pool: &PgPool,
    gateway: &dyn PaymentGateway,
    authority: &str,
    callback_ok: bool,
) -> Result<Payment, PaymentError> {
    let payment = db::get_by_authority(pool, authority)
        .await?
        .ok_or_else(|| PaymentError::NotFound(authority.to_owned()))?;

    if payment.status == PaymentStatus::Successful {
        return Ok(payment);
    }
    if payment.status != PaymentStatus::Pending {
        return Err(PaymentError::VerificationFailed {
            code: None,
            message: format!("payment is {}", payment.status),
        });
    }
    if !callback_ok {
        db::mark_cancelled(pool, payment.id).await?;
        tracing::info!(payment_id = %payment.id, "payment cancelled by user");
        return Err(PaymentError::CancelledByUser);
    }

    let outcome = match gateway.verify_payment(authority, payment.amount).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let response = serde_json::json!({ "error": format!("{e:#}") });
            db::mark_failed(pool, payment.id, &response).await?;
            return Err(PaymentError::Other(e.context("payment verification failed")));
        }
    };
    let response = serde_json::to_value(&outcome).context("failed to encode gateway response")?;

    match outcome {
        GatewayVerifyOutcome::Verified {
            ref_id, card_pan, ..
        } => {
            let masked = card_pan.as_deref().map(mask_card_number);

            let mut tx = pool.begin().await.context("failed to begin transaction")?;
            let Some(settled) =
                db::mark_successful(&mut *tx, payment.id, &ref_id, masked.as_deref(), &response)
                    .await?
            else {
                // Settled by a concurrent callback.
                drop(tx);
                let current = db::get_payment(pool, payment.id)
                    .await?
                    .with_context(|| format!("payment {} disappeared", payment.id))?;
                return match current.status {
                    PaymentStatus::Successful => Ok(current),
                    status => Err(PaymentError::VerificationFailed {
                        code: None,
                        message: format!("payment is {status}"),
                    }),
                };
            };
            progress_db::get_or_create(&mut *tx, settled.user_id).await?;
            progress_db::set_payment(&mut *tx, settled.user_id, settled.id).await?;
            progress::mark_step_completed_tx(&mut tx, settled.user_id, ProgressStep::PaymentPending)
                .await?;
            tx.commit().await.context("failed to commit payment")?;

            tracing::info!(
                payment_id = %settled.id,
                user_id = %settled.user_id,
                ref_id = %ref_id,
                "payment verified"
            );
            Ok(settled)
        }
        GatewayVerifyOutcome::Rejected { code, message } => {
            db::mark_failed(pool, payment.id, &response).await?;
            tracing::warn!(payment_id = %payment.id, code, message = %message, "payment verification rejected");
            Err(PaymentError::VerificationFailed {
                code: Some(code),
                message,
            })
        }
    }
}
