//! Reconciliation Store
//!
//! Persistence seam for the three stores that must move together: the
//! journal (source of truth), the per-user ledger mirror, and the pricing
//! catalog counters. `apply_settlement` and `apply_reversal` are the only
//! ways those three mutate, and each call is one atomic unit with a
//! single-winner CAS on the journal status.
//!
//! Two implementations: PostgreSQL (production) and an in-memory store
//! behind the `mock-api` feature for tests and dev mode.

pub mod pg;

#[cfg(any(test, feature = "mock-api"))]
pub mod mem;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

use crate::catalog::{CatalogError, PriceUpdate, PricingCatalog, TierLevel};
use crate::journal::{
    JournalFilter, JournalPage, JournalStats, PaymentRail, RailPayload, ShareClass, TierBreakdown,
    Transaction,
};
use crate::ledger::{LedgerEntry, UserShareLedger};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Transaction not found: {0}")]
    NotFound(String),

    #[error("Duplicate reference: {0}")]
    DuplicateReference(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Concurrent catalog update, retries exhausted")]
    VersionConflict,

    #[error("Store corruption: {0}")]
    Corrupt(String),
}

/// Terminal transition requested by the reconciliation engine
#[derive(Debug, Clone)]
pub enum SettlementUpdate {
    Complete {
        /// Amount the rail actually settled, when it reports one
        settled_amount: Option<Decimal>,
        settled_at: DateTime<Utc>,
        verifier_id: Option<i64>,
        note: Option<String>,
    },
    Fail {
        reason: String,
        verifier_id: Option<i64>,
    },
    Cancel {
        reason: String,
    },
}

impl SettlementUpdate {
    pub fn target_status(&self) -> crate::journal::TxStatus {
        match self {
            SettlementUpdate::Complete { .. } => crate::journal::TxStatus::Completed,
            SettlementUpdate::Fail { .. } => crate::journal::TxStatus::Failed,
            SettlementUpdate::Cancel { .. } => crate::journal::TxStatus::Cancelled,
        }
    }
}

/// Outcome of a CAS-guarded settlement or reversal
#[derive(Debug, Clone)]
pub enum SettleResult {
    /// This call won the transition; side effects belong to the caller
    Applied(Transaction),
    /// Another worker got there first; the stored record is returned
    AlreadyTerminal(Transaction),
}

impl SettleResult {
    pub fn transaction(&self) -> &Transaction {
        match self {
            SettleResult::Applied(t) | SettleResult::AlreadyTerminal(t) => t,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, SettleResult::Applied(_))
    }
}

/// Side effect kinds tracked in the outbox, keyed by (reference, kind)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum SideEffectKind {
    ReferralCommission = 1,
    ReferralRollback = 2,
    PurchaseEmail = 3,
    FailureEmail = 4,
    AdminReviewEmail = 5,
}

impl SideEffectKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(SideEffectKind::ReferralCommission),
            2 => Some(SideEffectKind::ReferralRollback),
            3 => Some(SideEffectKind::PurchaseEmail),
            4 => Some(SideEffectKind::FailureEmail),
            5 => Some(SideEffectKind::AdminReviewEmail),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SideEffectKind::ReferralCommission => "REFERRAL_COMMISSION",
            SideEffectKind::ReferralRollback => "REFERRAL_ROLLBACK",
            SideEffectKind::PurchaseEmail => "PURCHASE_EMAIL",
            SideEffectKind::FailureEmail => "FAILURE_EMAIL",
            SideEffectKind::AdminReviewEmail => "ADMIN_REVIEW_EMAIL",
        }
    }
}

impl fmt::Display for SideEffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outbox row for a claimed side effect
#[derive(Debug, Clone)]
pub struct SideEffectRecord {
    pub reference: String,
    pub kind: SideEffectKind,
    pub sent: bool,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The persistence contract shared by the PostgreSQL and in-memory stores
#[async_trait]
pub trait ReconStore: Send + Sync {
    // === Pricing catalog (singleton row, guarded accessors only) ===

    async fn catalog(&self) -> Result<PricingCatalog, StoreError>;

    async fn update_tier_price(
        &self,
        level: TierLevel,
        update: PriceUpdate,
    ) -> Result<PricingCatalog, StoreError>;

    async fn update_co_founder_price(
        &self,
        update: PriceUpdate,
    ) -> Result<PricingCatalog, StoreError>;

    // === Journal + ledger writes ===

    /// Record a pending transaction in the journal and its mirror entry in
    /// the user's ledger, in one atomic unit
    async fn insert_pending(&self, txn: &Transaction) -> Result<(), StoreError>;

    /// Record an already-settled transaction (admin grant): journal +
    /// ledger insert + catalog increment in one atomic unit
    async fn insert_settled(&self, txn: &Transaction) -> Result<Transaction, StoreError>;

    /// Rail adapters own the payload until settlement
    async fn set_rail_payload(
        &self,
        reference: &str,
        payload: &RailPayload,
    ) -> Result<(), StoreError>;

    /// Single-winner terminal transition. Completing also flips the ledger
    /// entry and increments the catalog sold counters; all three happen in
    /// one transaction or not at all.
    async fn apply_settlement(
        &self,
        reference: &str,
        update: SettlementUpdate,
    ) -> Result<SettleResult, StoreError>;

    /// Admin reversal: completed -> pending plus compensating catalog
    /// decrement, in one atomic unit
    async fn apply_reversal(
        &self,
        reference: &str,
        verifier_id: i64,
        note: &str,
    ) -> Result<SettleResult, StoreError>;

    /// Admin-only removal of a journal record and its ledger mirror.
    /// Callers must reverse a completed record first.
    async fn delete_transaction(&self, reference: &str) -> Result<bool, StoreError>;

    // === Journal reads ===

    async fn get_transaction(&self, reference: &str) -> Result<Option<Transaction>, StoreError>;

    /// Resolve an invoice-rail webhook order id back to its transaction
    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Transaction>, StoreError>;

    async fn list_pending_by_rail(
        &self,
        rail: PaymentRail,
        older_than_secs: i64,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn list_by_user(
        &self,
        user_id: i64,
        class: Option<ShareClass>,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn list_page(&self, filter: &JournalFilter) -> Result<JournalPage, StoreError>;

    async fn journal_stats(&self) -> Result<JournalStats, StoreError>;

    /// Per-tier completed sums plus completed co-founder total, for the
    /// catalog/journal agreement sweep
    async fn completed_tier_sums(&self) -> Result<(TierBreakdown, i64), StoreError>;

    // === Ledger ===

    async fn user_ledger(&self, user_id: i64) -> Result<UserShareLedger, StoreError>;

    async fn find_ledger_entry(
        &self,
        reference: &str,
    ) -> Result<Option<(i64, LedgerEntry)>, StoreError>;

    /// Admin-only ledger repair; returns whether an entry was removed
    async fn remove_ledger_entry(
        &self,
        user_id: i64,
        reference: &str,
    ) -> Result<bool, StoreError>;

    // === Side-effect outbox ===

    /// Claim a side effect for emission. Returns true when this caller
    /// claimed it; false when it was already claimed (exactly-once guard).
    async fn claim_side_effect(
        &self,
        reference: &str,
        kind: SideEffectKind,
    ) -> Result<bool, StoreError>;

    async fn mark_side_effect(
        &self,
        reference: &str,
        kind: SideEffectKind,
        success: bool,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Drop a claim so the opposite direction can fire again after a
    /// reversal / re-settle cycle
    async fn clear_side_effect(
        &self,
        reference: &str,
        kind: SideEffectKind,
    ) -> Result<(), StoreError>;

    async fn list_failed_side_effects(
        &self,
        limit: i64,
    ) -> Result<Vec<SideEffectRecord>, StoreError>;
}
