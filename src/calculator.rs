//! Purchase Calculator
//!
//! Pure pricing of a purchase request against a catalog snapshot. No I/O,
//! no suspension: given the same snapshot and inputs the output is
//! byte-identical, which the reconciliation tests rely on.
//!
//! Regular shares fill tier 1 to capacity, then tier 2, then tier 3,
//! always in that order regardless of relative pricing. Co-founder
//! pricing is flat.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::catalog::PricingCatalog;
use crate::journal::{ShareClass, TierBreakdown};
use crate::money::Currency;

/// A successful quote
#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct Quote {
    pub class: ShareClass,
    pub shares: i64,
    pub currency: Currency,
    /// Regular class only; sums to `shares`
    pub tier_breakdown: Option<TierBreakdown>,
    #[schema(value_type = String)]
    pub total_price: Decimal,
    /// Weighted across tiers for regular shares
    #[schema(value_type = String)]
    pub price_per_share: Decimal,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QuoteError {
    #[error("Insufficient supply: requested {requested}, available {available}")]
    InsufficientSupply { requested: i64, available: i64 },

    #[error("Quantity must be at least 1")]
    InvalidQuantity,
}

/// Price a purchase against a catalog snapshot
pub fn quote(
    catalog: &PricingCatalog,
    class: ShareClass,
    quantity: i64,
    currency: Currency,
) -> Result<Quote, QuoteError> {
    if quantity < 1 {
        return Err(QuoteError::InvalidQuantity);
    }

    match class {
        ShareClass::Regular => quote_regular(catalog, quantity, currency),
        ShareClass::CoFounder => quote_co_founder(catalog, quantity, currency),
    }
}

fn quote_regular(
    catalog: &PricingCatalog,
    quantity: i64,
    currency: Currency,
) -> Result<Quote, QuoteError> {
    let available = catalog.regular_remaining();
    if quantity > available {
        return Err(QuoteError::InsufficientSupply {
            requested: quantity,
            available,
        });
    }

    // Greedy fill, low tier to high
    let mut left = quantity;
    let mut filled = [0i64; 3];
    let mut total = Decimal::ZERO;
    for (i, tier) in catalog.tiers.iter().enumerate() {
        if left == 0 {
            break;
        }
        let take = left.min(tier.remaining());
        if take > 0 {
            filled[i] = take;
            total += Decimal::from(take) * tier.price(currency);
            left -= take;
        }
    }
    debug_assert_eq!(left, 0);

    let breakdown = TierBreakdown::new(filled[0], filled[1], filled[2]);
    Ok(Quote {
        class: ShareClass::Regular,
        shares: quantity,
        currency,
        tier_breakdown: Some(breakdown),
        total_price: total,
        price_per_share: total / Decimal::from(quantity),
    })
}

fn quote_co_founder(
    catalog: &PricingCatalog,
    quantity: i64,
    currency: Currency,
) -> Result<Quote, QuoteError> {
    let available = catalog.co_founder_remaining();
    if quantity > available {
        return Err(QuoteError::InsufficientSupply {
            requested: quantity,
            available,
        });
    }

    let price = catalog.co_founder_price(currency);
    Ok(Quote {
        class: ShareClass::CoFounder,
        shares: quantity,
        currency,
        tier_breakdown: None,
        total_price: Decimal::from(quantity) * price,
        price_per_share: price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Tier;
    use rust_decimal::prelude::FromStr;

    /// Small launch catalog: tier1 1000@1000, tier2 500@1500, tier3 500@2000
    fn launch_catalog() -> PricingCatalog {
        let mut c = PricingCatalog::from_seed(&crate::config::CatalogSeedConfig::default());
        c.tiers = [
            Tier {
                capacity: 1000,
                sold: 0,
                price_naira: Decimal::from(1000),
                price_usdt: Decimal::from(5),
            },
            Tier {
                capacity: 500,
                sold: 0,
                price_naira: Decimal::from(1500),
                price_usdt: Decimal::from(7),
            },
            Tier {
                capacity: 500,
                sold: 0,
                price_naira: Decimal::from(2000),
                price_usdt: Decimal::from(9),
            },
        ];
        c
    }

    #[test]
    fn test_greedy_fill_spills_to_tier2() {
        let c = launch_catalog();
        let q = quote(&c, ShareClass::Regular, 1200, Currency::Naira).unwrap();
        assert_eq!(q.tier_breakdown, Some(TierBreakdown::new(1000, 200, 0)));
        assert_eq!(q.total_price, Decimal::from(1_300_000));
        assert_eq!(
            q.price_per_share,
            Decimal::from(1_300_000) / Decimal::from(1200)
        );
    }

    #[test]
    fn test_fill_respects_partially_sold_tiers() {
        let mut c = launch_catalog();
        c.tiers[0].sold = 900;
        let q = quote(&c, ShareClass::Regular, 300, Currency::Naira).unwrap();
        assert_eq!(q.tier_breakdown, Some(TierBreakdown::new(100, 200, 0)));
        assert_eq!(q.total_price, Decimal::from(100 * 1000 + 200 * 1500));
    }

    #[test]
    fn test_spills_into_tier3() {
        let c = launch_catalog();
        let q = quote(&c, ShareClass::Regular, 1700, Currency::Naira).unwrap();
        assert_eq!(q.tier_breakdown, Some(TierBreakdown::new(1000, 500, 200)));
    }

    #[test]
    fn test_insufficient_supply() {
        let mut c = launch_catalog();
        c.tiers[2].sold = c.tiers[2].capacity;
        let remaining = c.tiers[0].remaining() + c.tiers[1].remaining();
        let err = quote(&c, ShareClass::Regular, remaining + 1, Currency::Naira).unwrap_err();
        assert!(matches!(err, QuoteError::InsufficientSupply { .. }));
        // Exactly the remaining amount still succeeds
        assert!(quote(&c, ShareClass::Regular, remaining, Currency::Naira).is_ok());
    }

    #[test]
    fn test_usdt_pricing() {
        let c = launch_catalog();
        let q = quote(&c, ShareClass::Regular, 10, Currency::Usdt).unwrap();
        assert_eq!(q.total_price, Decimal::from(50));
        assert_eq!(q.price_per_share, Decimal::from(5));
    }

    #[test]
    fn test_co_founder_flat_price() {
        let c = launch_catalog();
        let q = quote(&c, ShareClass::CoFounder, 5, Currency::Naira).unwrap();
        assert_eq!(q.tier_breakdown, None);
        assert_eq!(
            q.total_price,
            Decimal::from(5) * c.co_founder_price_naira
        );
    }

    #[test]
    fn test_co_founder_supply_guard() {
        let mut c = launch_catalog();
        c.co_founder_sold = c.co_founder_total;
        let err = quote(&c, ShareClass::CoFounder, 1, Currency::Usdt).unwrap_err();
        assert!(matches!(err, QuoteError::InsufficientSupply { .. }));
    }

    #[test]
    fn test_invalid_quantity() {
        let c = launch_catalog();
        assert_eq!(
            quote(&c, ShareClass::Regular, 0, Currency::Naira),
            Err(QuoteError::InvalidQuantity)
        );
        assert_eq!(
            quote(&c, ShareClass::Regular, -5, Currency::Naira),
            Err(QuoteError::InvalidQuantity)
        );
    }

    #[test]
    fn test_determinism() {
        let c = launch_catalog();
        let a = quote(&c, ShareClass::Regular, 1234, Currency::Naira).unwrap();
        let b = quote(&c, ShareClass::Regular, 1234, Currency::Naira).unwrap();
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[test]
    fn test_weighted_price_precision() {
        let c = launch_catalog();
        let q = quote(&c, ShareClass::Regular, 1200, Currency::Naira).unwrap();
        // 1300000 / 1200 = 1083.33...
        let expected = Decimal::from_str("1083.3333333333333333333333333").unwrap();
        assert!((q.price_per_share - expected).abs() < Decimal::from_str("0.001").unwrap());
    }
}
