use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::CatalogSeedConfig;
use crate::journal::{ShareClass, TierBreakdown};
use crate::money::Currency;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Insufficient supply: requested {requested}, available {available}")]
    InsufficientSupply { requested: i64, available: i64 },

    #[error("Price must be positive")]
    InvalidPrice,

    #[error("Tier breakdown required for regular shares")]
    MissingBreakdown,

    #[error("Sold counter would go negative")]
    NegativeSold,

    #[error("Catalog invariant violated: {0}")]
    Corrupt(String),
}

/// One of the three regular-share price bands, filled low to high
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[repr(i16)]
pub enum TierLevel {
    Tier1 = 1,
    Tier2 = 2,
    Tier3 = 3,
}

impl TierLevel {
    pub const ALL: [TierLevel; 3] = [TierLevel::Tier1, TierLevel::Tier2, TierLevel::Tier3];

    #[inline]
    pub fn index(&self) -> usize {
        (*self as usize) - 1
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TierLevel::Tier1),
            2 => Some(TierLevel::Tier2),
            3 => Some(TierLevel::Tier3),
            _ => None,
        }
    }
}

impl fmt::Display for TierLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier{}", *self as i16)
    }
}

impl FromStr for TierLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" | "tier1" => Ok(TierLevel::Tier1),
            "2" | "tier2" => Ok(TierLevel::Tier2),
            "3" | "tier3" => Ok(TierLevel::Tier3),
            _ => Err(()),
        }
    }
}

/// A single price band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Tier {
    pub capacity: i64,
    pub sold: i64,
    #[schema(value_type = String)]
    pub price_naira: Decimal,
    #[schema(value_type = String)]
    pub price_usdt: Decimal,
}

impl Tier {
    #[inline]
    pub fn remaining(&self) -> i64 {
        self.capacity - self.sold
    }

    pub fn price(&self, currency: Currency) -> Decimal {
        match currency {
            Currency::Naira => self.price_naira,
            Currency::Usdt => self.price_usdt,
        }
    }
}

/// Fields an admin may update on a price row; `None` leaves the
/// current value untouched.
#[derive(Debug, Clone, Default, Deserialize, utoipa::ToSchema)]
pub struct PriceUpdate {
    #[schema(value_type = Option<String>)]
    pub price_naira: Option<Decimal>,
    #[schema(value_type = Option<String>)]
    pub price_usdt: Option<Decimal>,
}

impl PriceUpdate {
    pub fn validate(&self) -> Result<(), CatalogError> {
        for price in [self.price_naira, self.price_usdt].into_iter().flatten() {
            if price <= Decimal::ZERO {
                return Err(CatalogError::InvalidPrice);
            }
        }
        Ok(())
    }
}

/// The singleton pricing catalog.
///
/// All mutation methods are pure; the store applies them under its own
/// serialisation (optimistic version CAS in PostgreSQL, a mutex in the
/// in-memory store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PricingCatalog {
    #[schema(value_type = Vec<Tier>)]
    pub tiers: [Tier; 3],
    pub co_founder_total: i64,
    pub co_founder_sold: i64,
    #[schema(value_type = String)]
    pub co_founder_price_naira: Decimal,
    #[schema(value_type = String)]
    pub co_founder_price_usdt: Decimal,
    /// One co-founder share counts as this many regular shares
    pub co_founder_to_regular_ratio: i64,
    /// Set once the first co-founder purchase completes; the ratio is
    /// immutable from then on
    pub ratio_frozen: bool,
    /// Optimistic-concurrency version of the singleton row
    pub version: i64,
}

impl PricingCatalog {
    pub fn from_seed(seed: &CatalogSeedConfig) -> Self {
        let parse = |s: &str| Decimal::from_str(s).expect("invalid seed price");
        Self {
            tiers: [
                Tier {
                    capacity: seed.tier1_capacity,
                    sold: 0,
                    price_naira: parse(&seed.tier1_price_naira),
                    price_usdt: parse(&seed.tier1_price_usdt),
                },
                Tier {
                    capacity: seed.tier2_capacity,
                    sold: 0,
                    price_naira: parse(&seed.tier2_price_naira),
                    price_usdt: parse(&seed.tier2_price_usdt),
                },
                Tier {
                    capacity: seed.tier3_capacity,
                    sold: 0,
                    price_naira: parse(&seed.tier3_price_naira),
                    price_usdt: parse(&seed.tier3_price_usdt),
                },
            ],
            co_founder_total: seed.co_founder_total,
            co_founder_sold: 0,
            co_founder_price_naira: parse(&seed.co_founder_price_naira),
            co_founder_price_usdt: parse(&seed.co_founder_price_usdt),
            co_founder_to_regular_ratio: seed.co_founder_to_regular_ratio,
            ratio_frozen: false,
            version: 1,
        }
    }

    pub fn tier(&self, level: TierLevel) -> &Tier {
        &self.tiers[level.index()]
    }

    /// Total regular shares offered across all tiers
    pub fn total_shares(&self) -> i64 {
        self.tiers.iter().map(|t| t.capacity).sum()
    }

    /// Derived, never stored: `regular_sold = Σ tier.sold`
    pub fn regular_sold(&self) -> i64 {
        self.tiers.iter().map(|t| t.sold).sum()
    }

    pub fn regular_remaining(&self) -> i64 {
        self.tiers.iter().map(|t| t.remaining()).sum()
    }

    pub fn co_founder_remaining(&self) -> i64 {
        self.co_founder_total - self.co_founder_sold
    }

    pub fn co_founder_price(&self, currency: Currency) -> Decimal {
        match currency {
            Currency::Naira => self.co_founder_price_naira,
            Currency::Usdt => self.co_founder_price_usdt,
        }
    }

    pub fn apply_tier_price(&mut self, level: TierLevel, update: &PriceUpdate) -> Result<(), CatalogError> {
        update.validate()?;
        let tier = &mut self.tiers[level.index()];
        if let Some(p) = update.price_naira {
            tier.price_naira = p;
        }
        if let Some(p) = update.price_usdt {
            tier.price_usdt = p;
        }
        Ok(())
    }

    pub fn apply_co_founder_price(&mut self, update: &PriceUpdate) -> Result<(), CatalogError> {
        update.validate()?;
        if let Some(p) = update.price_naira {
            self.co_founder_price_naira = p;
        }
        if let Some(p) = update.price_usdt {
            self.co_founder_price_usdt = p;
        }
        Ok(())
    }

    /// Credit sold counters for a settled purchase.
    ///
    /// Fails with `InsufficientSupply` if any tier would overflow its
    /// capacity; the caller rolls the whole settlement unit back. The
    /// first completed co-founder purchase freezes the conversion ratio.
    pub fn apply_increment(
        &mut self,
        class: ShareClass,
        shares: i64,
        breakdown: Option<&TierBreakdown>,
    ) -> Result<(), CatalogError> {
        match class {
            ShareClass::Regular => {
                let breakdown = breakdown.ok_or(CatalogError::MissingBreakdown)?;
                let filled = [breakdown.tier1, breakdown.tier2, breakdown.tier3];
                for (tier, fill) in self.tiers.iter().zip(filled) {
                    if fill > tier.remaining() {
                        return Err(CatalogError::InsufficientSupply {
                            requested: fill,
                            available: tier.remaining(),
                        });
                    }
                }
                for (tier, fill) in self.tiers.iter_mut().zip(filled) {
                    tier.sold += fill;
                }
                debug_assert_eq!(breakdown.total(), shares);
            }
            ShareClass::CoFounder => {
                if shares > self.co_founder_remaining() {
                    return Err(CatalogError::InsufficientSupply {
                        requested: shares,
                        available: self.co_founder_remaining(),
                    });
                }
                self.co_founder_sold += shares;
                self.ratio_frozen = true;
            }
        }
        Ok(())
    }

    /// Reverse a previous increment (admin reversal compensation)
    pub fn apply_decrement(
        &mut self,
        class: ShareClass,
        shares: i64,
        breakdown: Option<&TierBreakdown>,
    ) -> Result<(), CatalogError> {
        match class {
            ShareClass::Regular => {
                let breakdown = breakdown.ok_or(CatalogError::MissingBreakdown)?;
                let filled = [breakdown.tier1, breakdown.tier2, breakdown.tier3];
                for (tier, fill) in self.tiers.iter().zip(filled) {
                    if tier.sold < fill {
                        return Err(CatalogError::NegativeSold);
                    }
                }
                for (tier, fill) in self.tiers.iter_mut().zip(filled) {
                    tier.sold -= fill;
                }
            }
            ShareClass::CoFounder => {
                if self.co_founder_sold < shares {
                    return Err(CatalogError::NegativeSold);
                }
                self.co_founder_sold -= shares;
            }
        }
        debug_assert!(shares >= 0);
        Ok(())
    }

    /// Invariant check run after loading the row and in the drift sweeper
    pub fn check_invariants(&self) -> Result<(), CatalogError> {
        for (i, tier) in self.tiers.iter().enumerate() {
            if tier.sold < 0 || tier.sold > tier.capacity {
                return Err(CatalogError::Corrupt(format!(
                    "tier{} sold {} out of range 0..={}",
                    i + 1,
                    tier.sold,
                    tier.capacity
                )));
            }
            if tier.price_naira <= Decimal::ZERO || tier.price_usdt <= Decimal::ZERO {
                return Err(CatalogError::Corrupt(format!("tier{} price not positive", i + 1)));
            }
        }
        if self.co_founder_sold < 0 || self.co_founder_sold > self.co_founder_total {
            return Err(CatalogError::Corrupt(format!(
                "co-founder sold {} out of range 0..={}",
                self.co_founder_sold, self.co_founder_total
            )));
        }
        if self.co_founder_to_regular_ratio < 1 {
            return Err(CatalogError::Corrupt("ratio below 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PricingCatalog {
        PricingCatalog::from_seed(&CatalogSeedConfig::default())
    }

    #[test]
    fn test_seed_invariants() {
        let c = catalog();
        assert!(c.check_invariants().is_ok());
        assert_eq!(c.regular_sold(), 0);
        assert_eq!(c.total_shares(), 10_000_000);
        assert!(!c.ratio_frozen);
    }

    #[test]
    fn test_increment_regular() {
        let mut c = catalog();
        let b = TierBreakdown::new(1000, 200, 0);
        c.apply_increment(ShareClass::Regular, 1200, Some(&b)).unwrap();
        assert_eq!(c.tier(TierLevel::Tier1).sold, 1000);
        assert_eq!(c.tier(TierLevel::Tier2).sold, 200);
        assert_eq!(c.regular_sold(), 1200);
        assert!(c.check_invariants().is_ok());
    }

    #[test]
    fn test_increment_overflow_rejected() {
        let mut c = catalog();
        c.tiers[0].sold = c.tiers[0].capacity - 10;
        let b = TierBreakdown::new(11, 0, 0);
        let err = c.apply_increment(ShareClass::Regular, 11, Some(&b));
        assert!(matches!(err, Err(CatalogError::InsufficientSupply { .. })));
        // Nothing partially applied
        assert_eq!(c.tiers[0].sold, c.tiers[0].capacity - 10);
    }

    #[test]
    fn test_co_founder_freezes_ratio() {
        let mut c = catalog();
        c.apply_increment(ShareClass::CoFounder, 5, None).unwrap();
        assert_eq!(c.co_founder_sold, 5);
        assert!(c.ratio_frozen);
    }

    #[test]
    fn test_decrement_symmetry() {
        let mut c = catalog();
        let b = TierBreakdown::new(1000, 200, 0);
        let before = c.clone();
        c.apply_increment(ShareClass::Regular, 1200, Some(&b)).unwrap();
        c.apply_decrement(ShareClass::Regular, 1200, Some(&b)).unwrap();
        assert_eq!(c.tiers, before.tiers);
    }

    #[test]
    fn test_decrement_cannot_go_negative() {
        let mut c = catalog();
        let err = c.apply_decrement(ShareClass::CoFounder, 1, None);
        assert!(matches!(err, Err(CatalogError::NegativeSold)));
    }

    #[test]
    fn test_price_update_validation() {
        let mut c = catalog();
        let bad = PriceUpdate {
            price_naira: Some(Decimal::ZERO),
            price_usdt: None,
        };
        assert!(c.apply_tier_price(TierLevel::Tier1, &bad).is_err());

        let good = PriceUpdate {
            price_naira: Some(Decimal::from(60_000)),
            price_usdt: None,
        };
        c.apply_tier_price(TierLevel::Tier1, &good).unwrap();
        assert_eq!(c.tier(TierLevel::Tier1).price_naira, Decimal::from(60_000));
        // usdt untouched
        assert_eq!(c.tier(TierLevel::Tier1).price_usdt, Decimal::from(50));
    }
}
