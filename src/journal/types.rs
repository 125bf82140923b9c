//! Journal Core Types
//!
//! Type definitions for the global transaction journal and the payment
//! status lifecycle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Share class sold by the platform
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum ShareClass {
    /// Tier-priced regular shares
    Regular = 1,
    /// Fixed-premium co-founder shares
    CoFounder = 2,
}

impl ShareClass {
    /// Numeric ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(ShareClass::Regular),
            2 => Some(ShareClass::CoFounder),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShareClass::Regular => "regular",
            ShareClass::CoFounder => "cofounder",
        }
    }
}

impl fmt::Display for ShareClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ShareClass {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "regular" => Ok(ShareClass::Regular),
            "cofounder" | "co_founder" => Ok(ShareClass::CoFounder),
            _ => Err(()),
        }
    }
}

/// Payment rail. Each purchase uses exactly one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum PaymentRail {
    Card = 1,
    Invoice = 2,
    Onchain = 3,
    ManualBank = 4,
    ManualCash = 5,
    ManualOther = 6,
    AdminGrant = 7,
}

impl PaymentRail {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(PaymentRail::Card),
            2 => Some(PaymentRail::Invoice),
            3 => Some(PaymentRail::Onchain),
            4 => Some(PaymentRail::ManualBank),
            5 => Some(PaymentRail::ManualCash),
            6 => Some(PaymentRail::ManualOther),
            7 => Some(PaymentRail::AdminGrant),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRail::Card => "card",
            PaymentRail::Invoice => "invoice",
            PaymentRail::Onchain => "onchain",
            PaymentRail::ManualBank => "manual_bank",
            PaymentRail::ManualCash => "manual_cash",
            PaymentRail::ManualOther => "manual_other",
            PaymentRail::AdminGrant => "admin_grant",
        }
    }

    /// Manual rails settle only on an explicit admin decision
    pub fn is_manual(&self) -> bool {
        matches!(
            self,
            PaymentRail::ManualBank | PaymentRail::ManualCash | PaymentRail::ManualOther
        )
    }

    /// Rails whose provider can be queried for settlement status; the
    /// scheduled sweeper only re-drives these.
    pub fn supports_remote_poll(&self) -> bool {
        matches!(self, PaymentRail::Card | PaymentRail::Invoice)
    }
}

impl fmt::Display for PaymentRail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentRail {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "card" | "paystack" => Ok(PaymentRail::Card),
            "invoice" | "centiiv" => Ok(PaymentRail::Invoice),
            "onchain" | "web3" => Ok(PaymentRail::Onchain),
            "manual_bank" => Ok(PaymentRail::ManualBank),
            "manual_cash" => Ok(PaymentRail::ManualCash),
            "manual_other" => Ok(PaymentRail::ManualOther),
            "admin_grant" => Ok(PaymentRail::AdminGrant),
            _ => Err(()),
        }
    }
}

/// Transaction status.
///
/// Transitions are monotonic: `pending` moves to exactly one terminal
/// state, and only an admin reversal may re-open a completed record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum TxStatus {
    Pending = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

impl TxStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TxStatus::Pending),
            2 => Some(TxStatus::Completed),
            3 => Some(TxStatus::Failed),
            4 => Some(TxStatus::Cancelled),
            _ => None,
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }

    /// Legal transitions of the lifecycle state machine. The reverse edge
    /// `completed -> pending` exists only for admin reversal.
    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        matches!(
            (self, next),
            (TxStatus::Pending, TxStatus::Completed)
                | (TxStatus::Pending, TxStatus::Failed)
                | (TxStatus::Pending, TxStatus::Cancelled)
                | (TxStatus::Completed, TxStatus::Pending)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
            TxStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(TxStatus::Pending),
            "completed" => Ok(TxStatus::Completed),
            "failed" => Ok(TxStatus::Failed),
            "cancelled" => Ok(TxStatus::Cancelled),
            _ => Err(()),
        }
    }
}

/// How a regular-share purchase splits across the three price tiers.
///
/// Always sums to the purchased share count; co-founder purchases carry
/// no breakdown.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, utoipa::ToSchema,
)]
pub struct TierBreakdown {
    pub tier1: i64,
    pub tier2: i64,
    pub tier3: i64,
}

impl TierBreakdown {
    pub fn new(tier1: i64, tier2: i64, tier3: i64) -> Self {
        Self { tier1, tier2, tier3 }
    }

    pub fn total(&self) -> i64 {
        self.tier1 + self.tier2 + self.tier3
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Rail-specific payload, owned by the rail adapter until settlement.
/// Stored as JSONB in PostgreSQL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RailPayload {
    /// Nothing recorded yet
    None,
    Card {
        authorization_url: String,
        /// Reference as known to the card processor (same string we sent)
        processor_reference: String,
    },
    Invoice {
        order_id: String,
        invoice_url: String,
    },
    Onchain {
        expected_wallet: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tx_hash: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sender_wallet: Option<String>,
    },
    Manual {
        proof_handle: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        bank_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        account_name: Option<String>,
    },
    AdminGrant {
        granted_by: i64,
        note: String,
    },
}

impl Default for RailPayload {
    fn default() -> Self {
        RailPayload::None
    }
}

/// One journal record per purchase attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Opaque unique payment reference (primary key)
    pub reference: String,
    pub user_id: i64,
    pub class: ShareClass,
    pub rail: PaymentRail,
    /// Whole shares purchased, >= 1
    pub shares: i64,
    /// Quoted price per share, weighted across tiers for regular class.
    /// Price updates never touch an existing quote.
    pub price_per_share: Decimal,
    pub currency: crate::money::Currency,
    pub total_amount: Decimal,
    /// Regular class only; sums to `shares`
    pub tier_breakdown: Option<TierBreakdown>,
    pub status: TxStatus,
    pub rail_payload: RailPayload,
    /// Co-founder ratio the entry was credited under, snapshotted at
    /// completion so later config changes never rescale history
    pub ratio_snapshot: Option<i64>,
    /// Admin who drove a manual decision or reversal
    pub verifier_id: Option<i64>,
    /// Diagnostic or admin note attached to the last transition
    pub status_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Structural invariants checked before a record enters the journal
    pub fn validate(&self) -> Result<(), String> {
        if self.shares < 1 {
            return Err("shares must be >= 1".to_string());
        }
        if self.price_per_share < Decimal::ZERO || self.total_amount < Decimal::ZERO {
            return Err("amounts must be non-negative".to_string());
        }
        match (self.class, &self.tier_breakdown) {
            (ShareClass::Regular, Some(b)) if b.total() != self.shares => {
                Err("tier breakdown must sum to shares".to_string())
            }
            (ShareClass::Regular, None) => Err("regular purchase needs a tier breakdown".to_string()),
            (ShareClass::CoFounder, Some(_)) => {
                Err("co-founder purchase carries no tier breakdown".to_string())
            }
            _ => Ok(()),
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Txn[{}] user={} {} x{} via {} status={}",
            self.reference, self.user_id, self.class, self.shares, self.rail, self.status
        )
    }
}

/// Admin journal listing filter (`?status,?paymentMethod,?page,?limit`)
#[derive(Debug, Clone, Default)]
pub struct JournalFilter {
    pub status: Option<TxStatus>,
    pub rail: Option<PaymentRail>,
    pub class: Option<ShareClass>,
    pub page: u32,
    pub limit: u32,
}

impl JournalFilter {
    pub fn page_bounds(&self) -> (u32, u32) {
        let limit = self.limit.clamp(1, 200);
        let page = self.page.max(1);
        (page, limit)
    }
}

/// One page of the admin journal listing
#[derive(Debug, Clone, Serialize)]
pub struct JournalPage {
    pub items: Vec<Transaction>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

/// Journal-wide aggregates for the admin dashboard surface
#[derive(Debug, Clone, Default, Serialize, utoipa::ToSchema)]
pub struct JournalStats {
    pub completed_regular_shares: i64,
    pub completed_co_founder_shares: i64,
    pub pending_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub cancelled_count: i64,
    #[schema(value_type = String)]
    pub completed_naira_volume: Decimal,
    #[schema(value_type = String)]
    pub completed_usdt_volume: Decimal,
}
