//! Pricing Catalog
//!
//! Authoritative current prices per tier and share class, plus sold
//! counters. The catalog is a singleton row; every mutation goes through
//! the store's guarded accessors, never through direct reads.

pub mod types;

pub use types::{CatalogError, PriceUpdate, PricingCatalog, Tier, TierLevel};
