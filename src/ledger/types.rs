use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::journal::{ShareClass, TierBreakdown, Transaction, TxStatus};
use crate::money::Currency;

/// One line in a user's share ledger.
///
/// Created synchronously with its journal transaction and mutated only by
/// the reconciliation engine. Invariant: an entry always has a journal
/// record with the same reference and the same status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LedgerEntry {
    pub reference: String,
    pub class: ShareClass,
    pub shares: i64,
    pub status: TxStatus,
    #[schema(value_type = String)]
    pub price_per_share: Decimal,
    pub currency: Currency,
    #[schema(value_type = String)]
    pub total_amount: Decimal,
    pub tier_breakdown: Option<TierBreakdown>,
    /// Ratio this entry was credited under; set at completion
    pub ratio_snapshot: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Mirror a freshly created journal transaction
    pub fn from_transaction(txn: &Transaction) -> Self {
        Self {
            reference: txn.reference.clone(),
            class: txn.class,
            shares: txn.shares,
            status: txn.status,
            price_per_share: txn.price_per_share,
            currency: txn.currency,
            total_amount: txn.total_amount,
            tier_breakdown: txn.tier_breakdown,
            ratio_snapshot: txn.ratio_snapshot,
            note: txn.status_note.clone(),
            created_at: txn.created_at,
        }
    }
}

/// A user's ordered ledger with derived totals
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct UserShareLedger {
    pub user_id: i64,
    pub entries: Vec<LedgerEntry>,
}

impl UserShareLedger {
    pub fn empty(user_id: i64) -> Self {
        Self {
            user_id,
            entries: Vec::new(),
        }
    }

    fn sum(&self, class: ShareClass, status: TxStatus) -> i64 {
        self.entries
            .iter()
            .filter(|e| e.class == class && e.status == status)
            .map(|e| e.shares)
            .sum()
    }

    /// Recomputed from scratch on every call
    pub fn owned_regular(&self) -> i64 {
        self.sum(ShareClass::Regular, TxStatus::Completed)
    }

    pub fn owned_co_founder(&self) -> i64 {
        self.sum(ShareClass::CoFounder, TxStatus::Completed)
    }

    pub fn pending_regular(&self) -> i64 {
        self.sum(ShareClass::Regular, TxStatus::Pending)
    }

    pub fn pending_co_founder(&self) -> i64 {
        self.sum(ShareClass::CoFounder, TxStatus::Pending)
    }

    pub fn find(&self, reference: &str) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| e.reference == reference)
    }
}
