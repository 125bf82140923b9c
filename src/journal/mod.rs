//! Global transaction journal types.
//!
//! The journal is the source of truth for payment lifecycle state. One
//! record per purchase attempt, keyed by the opaque payment reference.

pub mod types;

pub use types::{
    JournalFilter, JournalPage, JournalStats, PaymentRail, RailPayload, ShareClass, TierBreakdown,
    Transaction, TxStatus,
};
