//! Effective Share Views
//!
//! Read-side projections. All figures are derived from the journal, the
//! authoritative record; the per-user ledger is a mirror and is only
//! consulted to detect drift. A co-founder share counts as its
//! ratio-snapshot worth of regular shares, snapshotted at completion so
//! later ratio changes never rescale history.

use serde::Serialize;

use crate::catalog::{PricingCatalog, TierLevel};
use crate::journal::{JournalStats, ShareClass, Transaction, TxStatus};
use crate::ledger::UserShareLedger;

/// A user's holdings as the product surfaces show them
#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct EffectiveShareView {
    pub user_id: i64,
    /// Completed regular shares held directly
    pub regular_shares: i64,
    /// Completed co-founder shares held directly
    pub co_founder_shares: i64,
    /// Regular shares plus each co-founder share at its snapshot ratio
    pub effective_regular: i64,
    /// Ratio used for presenting equivalents today
    pub current_ratio: i64,
    /// `effective_regular` restated in co-founder units
    pub equivalent_co_founder: i64,
    /// Regular shares left over after the co-founder restatement
    pub equivalent_remainder: i64,
    pub pending_regular: i64,
    pub pending_co_founder: i64,
}

/// Project a user's view from their journal transactions.
///
/// Co-founder entries completed before the ratio was ever snapshotted
/// fall back to the current ratio.
pub fn project_user(
    user_id: i64,
    transactions: &[Transaction],
    current_ratio: i64,
) -> EffectiveShareView {
    let mut regular = 0i64;
    let mut co_founder = 0i64;
    let mut effective = 0i64;
    let mut pending_regular = 0i64;
    let mut pending_co_founder = 0i64;

    for txn in transactions.iter().filter(|t| t.user_id == user_id) {
        match (txn.status, txn.class) {
            (TxStatus::Completed, ShareClass::Regular) => {
                regular += txn.shares;
                effective += txn.shares;
            }
            (TxStatus::Completed, ShareClass::CoFounder) => {
                co_founder += txn.shares;
                effective += txn.shares * txn.ratio_snapshot.unwrap_or(current_ratio);
            }
            (TxStatus::Pending, ShareClass::Regular) => pending_regular += txn.shares,
            (TxStatus::Pending, ShareClass::CoFounder) => pending_co_founder += txn.shares,
            _ => {}
        }
    }

    let (equivalent, remainder) = if current_ratio > 0 {
        (effective / current_ratio, effective % current_ratio)
    } else {
        (0, effective)
    };

    EffectiveShareView {
        user_id,
        regular_shares: regular,
        co_founder_shares: co_founder,
        effective_regular: effective,
        current_ratio,
        equivalent_co_founder: equivalent,
        equivalent_remainder: remainder,
        pending_regular,
        pending_co_founder,
    }
}

/// Journal/ledger disagreement for one user, surfaced as a diagnostic
#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct LedgerDrift {
    pub user_id: i64,
    pub journal_regular: i64,
    pub ledger_regular: i64,
    pub journal_co_founder: i64,
    pub ledger_co_founder: i64,
}

/// Cross-check the mirror against the journal-derived view
pub fn check_ledger(view: &EffectiveShareView, ledger: &UserShareLedger) -> Option<LedgerDrift> {
    let ledger_regular = ledger.owned_regular();
    let ledger_co_founder = ledger.owned_co_founder();
    if view.regular_shares == ledger_regular && view.co_founder_shares == ledger_co_founder {
        return None;
    }
    Some(LedgerDrift {
        user_id: view.user_id,
        journal_regular: view.regular_shares,
        ledger_regular,
        journal_co_founder: view.co_founder_shares,
        ledger_co_founder,
    })
}

/// Public availability figures for the purchase page
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct TierAvailability {
    pub level: TierLevel,
    pub capacity: i64,
    pub sold: i64,
    pub remaining: i64,
    #[schema(value_type = String)]
    pub price_naira: rust_decimal::Decimal,
    #[schema(value_type = String)]
    pub price_usdt: rust_decimal::Decimal,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct CatalogView {
    pub tiers: Vec<TierAvailability>,
    pub regular_remaining: i64,
    pub co_founder_total: i64,
    pub co_founder_sold: i64,
    pub co_founder_remaining: i64,
    #[schema(value_type = String)]
    pub co_founder_price_naira: rust_decimal::Decimal,
    #[schema(value_type = String)]
    pub co_founder_price_usdt: rust_decimal::Decimal,
    pub co_founder_to_regular_ratio: i64,
}

pub fn project_catalog(catalog: &PricingCatalog) -> CatalogView {
    CatalogView {
        tiers: TierLevel::ALL
            .iter()
            .map(|level| {
                let tier = catalog.tier(*level);
                TierAvailability {
                    level: *level,
                    capacity: tier.capacity,
                    sold: tier.sold,
                    remaining: tier.remaining(),
                    price_naira: tier.price_naira,
                    price_usdt: tier.price_usdt,
                }
            })
            .collect(),
        regular_remaining: catalog.regular_remaining(),
        co_founder_total: catalog.co_founder_total,
        co_founder_sold: catalog.co_founder_sold,
        co_founder_remaining: catalog.co_founder_remaining(),
        co_founder_price_naira: catalog.co_founder_price_naira,
        co_founder_price_usdt: catalog.co_founder_price_usdt,
        co_founder_to_regular_ratio: catalog.co_founder_to_regular_ratio,
    }
}

/// Admin dashboard aggregate: journal stats plus live supply
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct AdminOverview {
    pub stats: JournalStats,
    pub catalog: CatalogView,
}
