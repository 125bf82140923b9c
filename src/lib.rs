//! Share Ledger - Payment Reconciliation Engine
//!
//! Records equity share purchases across several payment rails and
//! reconciles provider callbacks, user-driven verification, scheduled
//! sweeps and admin decisions into exactly-once share credits.
//!
//! # Modules
//!
//! - [`money`] - Currency and minor-unit helpers
//! - [`catalog`] - Tiered pricing catalog (singleton supply row)
//! - [`journal`] - Authoritative transaction journal types
//! - [`ledger`] - Per-user share ledger mirror
//! - [`calculator`] - Pure purchase pricing
//! - [`reference`] - Opaque payment reference generation
//! - [`store`] - Persistence contract; PostgreSQL and in-memory stores
//! - [`rails`] - Payment rail adapters (card, invoice, on-chain, manual)
//! - [`engine`] - Settlement lifecycle driver, side effects, sweeper
//! - [`view`] - Effective-share read projections
//! - [`proof_store`] - Uploaded proof-of-payment documents
//! - [`gateway`] - Axum HTTP surface

pub mod calculator;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod gateway;
pub mod journal;
pub mod ledger;
pub mod logging;
pub mod money;
pub mod proof_store;
pub mod rails;
pub mod reference;
pub mod store;
pub mod view;

pub use calculator::{Quote, QuoteError};
pub use catalog::{PricingCatalog, Tier, TierLevel};
pub use engine::{ReconEngine, SettleOutcome};
pub use journal::{PaymentRail, RailPayload, ShareClass, Transaction, TxStatus};
pub use money::Currency;
pub use reference::PaymentReference;
pub use store::{ReconStore, SettlementUpdate, StoreError};
