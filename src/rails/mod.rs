//! Payment Rail Adapters
//!
//! One adapter per payment provider behind a common trait. Adapters talk
//! to the outside world and report an outcome; they never touch the
//! journal or ledger. The reconciliation engine owns all state changes.
//!
//! Transport failures while checking a provider are reported as
//! `StillPending`, never as a rejection: a transaction only fails on an
//! affirmative signal.

pub mod card;
pub mod invoice;
pub mod manual;
pub mod onchain;

#[cfg(any(test, feature = "mock-api"))]
pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::journal::{PaymentRail, RailPayload, Transaction};

#[derive(Debug, Error)]
pub enum RailError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Rail {0} does not support {1}")]
    Unsupported(PaymentRail, &'static str),

    #[error("Invalid proof: {0}")]
    InvalidProof(String),

    #[error("No adapter registered for rail {0}")]
    NoAdapter(PaymentRail),

    #[error("Amount error: {0}")]
    Amount(#[from] crate::money::MoneyError),
}

/// Purchaser details a provider needs at initiation
#[derive(Debug, Clone)]
pub struct RailContext {
    pub user_id: i64,
    pub email: String,
    pub name: Option<String>,
}

/// What initiation produced: the payload to store on the journal record
/// and, for redirect rails, where to send the purchaser
#[derive(Debug, Clone)]
pub struct Initiation {
    pub payload: RailPayload,
    pub redirect_url: Option<String>,
}

/// Evidence supplied alongside a verification request
#[derive(Debug, Clone)]
pub enum VerifyProof {
    /// Provider-side lookup by reference; nothing extra needed
    None,
    /// User-reported on-chain transfer
    Onchain {
        tx_hash: String,
        sender_wallet: String,
    },
    /// Manual-rail review outcome entered by an admin
    AdminDecision {
        approved: bool,
        verifier_id: i64,
        note: Option<String>,
    },
}

/// Verification verdict from a rail adapter
#[derive(Debug, Clone)]
pub enum RailOutcome {
    Settled {
        /// Amount the provider reports as actually paid
        amount: Option<Decimal>,
        settled_at: Option<DateTime<Utc>>,
        /// Updated payload when verification learned something new
        payload: Option<RailPayload>,
    },
    Rejected {
        reason: String,
    },
    StillPending,
}

impl RailOutcome {
    pub fn settled() -> Self {
        RailOutcome::Settled {
            amount: None,
            settled_at: None,
            payload: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        RailOutcome::Rejected {
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait RailAdapter: Send + Sync {
    fn rail(&self) -> PaymentRail;

    /// Start a payment with the provider. The returned payload is stored
    /// on the journal record before the purchaser sees anything.
    async fn initiate(
        &self,
        txn: &Transaction,
        ctx: &RailContext,
    ) -> Result<Initiation, RailError>;

    /// Check whether a pending payment has settled
    async fn verify(
        &self,
        txn: &Transaction,
        proof: &VerifyProof,
    ) -> Result<RailOutcome, RailError>;
}

/// Registry mapping each payment rail to its adapter. The three manual
/// rails share one adapter; admin grants never initiate and have none.
#[derive(Default)]
pub struct RailSet {
    adapters: HashMap<PaymentRail, Arc<dyn RailAdapter>>,
}

impl RailSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, rail: PaymentRail, adapter: Arc<dyn RailAdapter>) -> Self {
        self.adapters.insert(rail, adapter);
        self
    }

    pub fn register_manual(self, adapter: Arc<dyn RailAdapter>) -> Self {
        self.register(PaymentRail::ManualBank, adapter.clone())
            .register(PaymentRail::ManualCash, adapter.clone())
            .register(PaymentRail::ManualOther, adapter)
    }

    pub fn adapter(&self, rail: PaymentRail) -> Result<&Arc<dyn RailAdapter>, RailError> {
        self.adapters.get(&rail).ok_or(RailError::NoAdapter(rail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rail_set_manual_sharing() {
        let adapter = Arc::new(manual::ManualRail::new());
        let set = RailSet::new().register_manual(adapter);
        assert!(set.adapter(PaymentRail::ManualBank).is_ok());
        assert!(set.adapter(PaymentRail::ManualCash).is_ok());
        assert!(set.adapter(PaymentRail::ManualOther).is_ok());
        assert!(set.adapter(PaymentRail::Card).is_err());
    }
}
