//! Reconciliation engine: lifecycle driver, side effects and sweeps

pub mod service;
pub mod side_effects;
pub mod sweeper;

pub use service::{EngineError, PurchaseInitiated, ReconEngine, SettleOutcome};
pub use side_effects::{LogNotifier, LogReferral, Notifier, Referral, SideEffects};
pub use sweeper::Sweeper;
