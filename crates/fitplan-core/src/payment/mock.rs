//! In-memory gateway for development and tests.
//!
//! Authorities live in a [`MockPaymentStore`] owned by the caller, so each
//! test or CLI run gets its own set and nothing leaks between them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rand::Rng;
use uuid::Uuid;

use super::{GatewayRequestOutcome, GatewayVerifyOutcome, PaymentGateway, PaymentRequest};

pub const CODE_OK: i32 = 100;
pub const CODE_ALREADY_VERIFIED: i32 = 101;
pub const CODE_REQUEST_FAILED: i32 = -12;
pub const CODE_NOT_FOUND: i32 = -10;
pub const CODE_AMOUNT_MISMATCH: i32 = -52;
pub const CODE_VERIFY_FAILED: i32 = -53;

/// A payment the mock gateway has issued an authority for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockPayment {
    pub amount: i64,
    pub description: String,
    pub mobile: Option<String>,
    pub verified: bool,
}

/// Shared authority table. Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct MockPaymentStore {
    payments: Arc<Mutex<HashMap<String, MockPayment>>>,
}

impl MockPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MockPayment>> {
        self.payments.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, authority: &str) -> Option<MockPayment> {
        self.lock().get(authority).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Authorities issued but not yet verified, sorted.
    pub fn unverified(&self) -> Vec<String> {
        let mut list: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, p)| !p.verified)
            .map(|(authority, _)| authority.clone())
            .collect();
        list.sort();
        list
    }
}

/// Gateway that succeeds with configurable probabilities.
#[derive(Debug, Clone)]
pub struct MockGateway {
    store: MockPaymentStore,
    request_success_rate: f64,
    verify_success_rate: f64,
}

impl MockGateway {
    pub const NAME: &str = "mock";

    /// A gateway that succeeds 90% of the time on both calls.
    pub fn new(store: MockPaymentStore) -> Self {
        Self::with_success_rates(store, 0.9, 0.9)
    }

    /// Rates are clamped to `0.0..=1.0`.
    pub fn with_success_rates(store: MockPaymentStore, request: f64, verify: f64) -> Self {
        Self {
            store,
            request_success_rate: request.clamp(0.0, 1.0),
            verify_success_rate: verify.clamp(0.0, 1.0),
        }
    }

    /// A gateway that never fails on its own.
    pub fn always_succeeds(store: MockPaymentStore) -> Self {
        Self::with_success_rates(store, 1.0, 1.0)
    }

    pub fn store(&self) -> &MockPaymentStore {
        &self.store
    }
}

fn roll(probability: f64) -> bool {
    rand::rng().random_bool(probability)
}

fn new_authority() -> String {
    let hex = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("MOCK{}", &hex[..30])
}

fn ref_id_for(authority: &str) -> String {
    let tail_start = authority.len().saturating_sub(10);
    format!("MOCKREF{}", &authority[tail_start..])
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn request_payment(
        &self,
        request: &PaymentRequest,
    ) -> anyhow::Result<GatewayRequestOutcome> {
        if !roll(self.request_success_rate) {
            return Ok(GatewayRequestOutcome::Rejected {
                code: CODE_REQUEST_FAILED,
                message: "mock gateway simulated failure".to_owned(),
            });
        }

        let authority = new_authority();
        self.store.lock().insert(
            authority.clone(),
            MockPayment {
                amount: request.amount,
                description: request.description.clone(),
                mobile: request.mobile.clone(),
                verified: false,
            },
        );

        Ok(GatewayRequestOutcome::Accepted {
            payment_url: format!("http://mock-gateway.test/pay/{authority}"),
            authority,
            code: CODE_OK,
        })
    }

    async fn verify_payment(
        &self,
        authority: &str,
        amount: i64,
    ) -> anyhow::Result<GatewayVerifyOutcome> {
        let succeed = roll(self.verify_success_rate);
        let mut payments = self.store.lock();

        let Some(payment) = payments.get_mut(authority) else {
            return Ok(GatewayVerifyOutcome::Rejected {
                code: CODE_NOT_FOUND,
                message: "payment not found".to_owned(),
            });
        };

        if payment.verified {
            return Ok(GatewayVerifyOutcome::Verified {
                ref_id: ref_id_for(authority),
                card_pan: None,
                fee: 0,
                code: CODE_ALREADY_VERIFIED,
            });
        }
        if payment.amount != amount {
            return Ok(GatewayVerifyOutcome::Rejected {
                code: CODE_AMOUNT_MISMATCH,
                message: "amount mismatch".to_owned(),
            });
        }
        if !succeed {
            return Ok(GatewayVerifyOutcome::Rejected {
                code: CODE_VERIFY_FAILED,
                message: "mock verification failed".to_owned(),
            });
        }

        payment.verified = true;
        let last4: u32 = rand::rng().random_range(1000..10000);
        Ok(GatewayVerifyOutcome::Verified {
            ref_id: ref_id_for(authority),
            card_pan: Some(format!("************{last4}")),
            fee: amount / 100,
            code: CODE_OK,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(amount: i64) -> PaymentRequest {
        PaymentRequest {
            amount,
            description: "plan purchase".into(),
            mobile: Some("+989121234567".into()),
            email: None,
            callback_url: None,
        }
    }

    async fn open(gateway: &MockGateway, amount: i64) -> String {
        match gateway.request_payment(&request(amount)).await.unwrap() {
            GatewayRequestOutcome::Accepted {
                authority,
                payment_url,
                code,
            } => {
                assert_eq!(code, CODE_OK);
                assert_eq!(payment_url, format!("http://mock-gateway.test/pay/{authority}"));
                authority
            }
            other => panic!("expected accepted, got {other:?}"),
        }
    }

    #[test]
    fn authority_shape() {
        let authority = new_authority();
        assert_eq!(authority.len(), 34);
        assert!(authority.starts_with("MOCK"));
        assert!(
            authority[4..]
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase())
        );
        assert_eq!(ref_id_for(&authority), format!("MOCKREF{}", &authority[24..]));
    }

    #[tokio::test]
    async fn request_then_verify() {
        let store = MockPaymentStore::new();
        let gateway = MockGateway::always_succeeds(store.clone());

        let authority = open(&gateway, 500_000).await;
        assert_eq!(store.unverified(), vec![authority.clone()]);

        match gateway.verify_payment(&authority, 500_000).await.unwrap() {
            GatewayVerifyOutcome::Verified {
                ref_id,
                card_pan,
                fee,
                code,
            } => {
                assert_eq!(code, CODE_OK);
                assert_eq!(fee, 5000);
                assert!(ref_id.starts_with("MOCKREF"));
                let pan = card_pan.unwrap();
                assert_eq!(pan.len(), 16);
                assert!(pan.starts_with("************"));
            }
            other => panic!("expected verified, got {other:?}"),
        }
        assert!(store.get(&authority).unwrap().verified);
        assert!(store.unverified().is_empty());
    }

    #[tokio::test]
    async fn verifying_twice_is_idempotent() {
        let gateway = MockGateway::always_succeeds(MockPaymentStore::new());
        let authority = open(&gateway, 20_000).await;
        gateway.verify_payment(&authority, 20_000).await.unwrap();

        let again = gateway.verify_payment(&authority, 20_000).await.unwrap();
        assert!(matches!(
            again,
            GatewayVerifyOutcome::Verified {
                code: CODE_ALREADY_VERIFIED,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn rejections() {
        let gateway = MockGateway::always_succeeds(MockPaymentStore::new());
        let authority = open(&gateway, 20_000).await;

        let mismatch = gateway.verify_payment(&authority, 19_999).await.unwrap();
        assert!(matches!(
            mismatch,
            GatewayVerifyOutcome::Rejected {
                code: CODE_AMOUNT_MISMATCH,
                ..
            }
        ));

        let unknown = gateway.verify_payment("MOCKUNKNOWN", 20_000).await.unwrap();
        assert!(matches!(
            unknown,
            GatewayVerifyOutcome::Rejected {
                code: CODE_NOT_FOUND,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn zero_rates_always_fail() {
        let store = MockPaymentStore::new();
        let failing = MockGateway::with_success_rates(store.clone(), 0.0, 0.0);
        let outcome = failing.request_payment(&request(20_000)).await.unwrap();
        assert!(matches!(
            outcome,
            GatewayRequestOutcome::Rejected {
                code: CODE_REQUEST_FAILED,
                ..
            }
        ));
        assert!(store.is_empty());

        let authority = open(&MockGateway::always_succeeds(store.clone()), 20_000).await;
        let outcome = failing.verify_payment(&authority, 20_000).await.unwrap();
        assert!(matches!(
            outcome,
            GatewayVerifyOutcome::Rejected {
                code: CODE_VERIFY_FAILED,
                ..
            }
        ));
        assert!(!store.get(&authority).unwrap().verified);
    }

    #[test]
    fn stores_are_independent() {
        let a = MockPaymentStore::new();
        let b = MockPaymentStore::new();
        a.lock().insert(
            "MOCKX".into(),
            MockPayment {
                amount: 1,
                description: String::new(),
                mobile: None,
                verified: false,
            },
        );
        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
        assert_eq!(a.clone().len(), 1);
    }

    #[test]
    fn rates_are_clamped() {
        let g = MockGateway::with_success_rates(MockPaymentStore::new(), 2.0, -1.0);
        assert_eq!(g.request_success_rate, 1.0);
        assert_eq!(g.verify_success_rate, 0.0);
    }
}
