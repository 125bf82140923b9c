//! Scriptable mock rail for reconciliation tests and dev mode.
//!
//! Outcomes are queued per call; when the queue runs dry, verification
//! reports still pending.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Initiation, RailAdapter, RailContext, RailError, RailOutcome, VerifyProof};
use crate::journal::{PaymentRail, RailPayload, Transaction};

pub struct MockRail {
    rail: PaymentRail,
    outcomes: Mutex<VecDeque<RailOutcome>>,
    initiate_count: AtomicUsize,
    verify_count: AtomicUsize,
}

impl MockRail {
    pub fn new(rail: PaymentRail) -> Self {
        Self {
            rail,
            outcomes: Mutex::new(VecDeque::new()),
            initiate_count: AtomicUsize::new(0),
            verify_count: AtomicUsize::new(0),
        }
    }

    pub fn push_outcome(&self, outcome: RailOutcome) {
        self.outcomes
            .lock()
            .expect("outcome lock poisoned")
            .push_back(outcome);
    }

    pub fn initiations(&self) -> usize {
        self.initiate_count.load(Ordering::SeqCst)
    }

    pub fn verifications(&self) -> usize {
        self.verify_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RailAdapter for MockRail {
    fn rail(&self) -> PaymentRail {
        self.rail
    }

    async fn initiate(
        &self,
        txn: &Transaction,
        _ctx: &RailContext,
    ) -> Result<Initiation, RailError> {
        self.initiate_count.fetch_add(1, Ordering::SeqCst);
        let payload = match self.rail {
            PaymentRail::Card => RailPayload::Card {
                authorization_url: format!("https://mock.pay/{}", txn.reference),
                processor_reference: txn.reference.clone(),
            },
            PaymentRail::Invoice => RailPayload::Invoice {
                order_id: format!("ORD-{}", txn.reference),
                invoice_url: format!("https://mock.invoice/{}", txn.reference),
            },
            PaymentRail::Onchain => RailPayload::Onchain {
                expected_wallet: "0xmockcompanywallet".to_string(),
                tx_hash: None,
                sender_wallet: None,
            },
            _ => txn.rail_payload.clone(),
        };
        let redirect_url = match &payload {
            RailPayload::Card {
                authorization_url, ..
            } => Some(authorization_url.clone()),
            RailPayload::Invoice { invoice_url, .. } => Some(invoice_url.clone()),
            _ => None,
        };
        Ok(Initiation {
            payload,
            redirect_url,
        })
    }

    async fn verify(
        &self,
        _txn: &Transaction,
        _proof: &VerifyProof,
    ) -> Result<RailOutcome, RailError> {
        self.verify_count.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .outcomes
            .lock()
            .expect("outcome lock poisoned")
            .pop_front()
            .unwrap_or(RailOutcome::StillPending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{ShareClass, TierBreakdown, TxStatus};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn txn() -> Transaction {
        Transaction {
            reference: "SHR-MOCK".to_string(),
            user_id: 1,
            class: ShareClass::Regular,
            rail: PaymentRail::Card,
            shares: 1,
            price_per_share: Decimal::from(50_000),
            currency: crate::money::Currency::Naira,
            total_amount: Decimal::from(50_000),
            tier_breakdown: Some(TierBreakdown::new(1, 0, 0)),
            status: TxStatus::Pending,
            rail_payload: RailPayload::None,
            ratio_snapshot: None,
            verifier_id: None,
            status_note: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    #[tokio::test]
    async fn test_scripted_outcomes_in_order() {
        let rail = MockRail::new(PaymentRail::Card);
        rail.push_outcome(RailOutcome::StillPending);
        rail.push_outcome(RailOutcome::settled());

        let t = txn();
        assert!(matches!(
            rail.verify(&t, &VerifyProof::None).await.unwrap(),
            RailOutcome::StillPending
        ));
        assert!(matches!(
            rail.verify(&t, &VerifyProof::None).await.unwrap(),
            RailOutcome::Settled { .. }
        ));
        // Queue exhausted
        assert!(matches!(
            rail.verify(&t, &VerifyProof::None).await.unwrap(),
            RailOutcome::StillPending
        ));
        assert_eq!(rail.verifications(), 3);
    }

    #[tokio::test]
    async fn test_initiation_payload_matches_rail() {
        let rail = MockRail::new(PaymentRail::Invoice);
        let ctx = RailContext {
            user_id: 1,
            email: "buyer@example.com".to_string(),
            name: None,
        };
        let init = rail.initiate(&txn(), &ctx).await.unwrap();
        assert!(matches!(init.payload, RailPayload::Invoice { .. }));
        assert!(init.redirect_url.is_some());
        assert_eq!(rail.initiations(), 1);
    }
}
