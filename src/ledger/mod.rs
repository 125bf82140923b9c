//! Per-user share ledger types.
//!
//! Each user owns an ordered sequence of ledger entries mirroring their
//! journal transactions. Owned totals are always recomputed from the
//! entries, never maintained incrementally, so they cannot drift.

pub mod types;

pub use types::{LedgerEntry, UserShareLedger};
