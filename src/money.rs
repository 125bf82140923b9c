//! Money Conversion Module
//!
//! Unified currency handling for the two pegged purchase currencies.
//! All amounts are `rust_decimal::Decimal`; conversions to rail-specific
//! representations (kobo minor units for the card processor, 18-decimal
//! wei-style units on chain) MUST go through this module.

use num_bigint::BigUint;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Money conversion errors
#[derive(Debug, Error)]
pub enum MoneyError {
    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),
}

/// Purchase currency. The platform is pegged to exactly these two;
/// there is no FX between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum Currency {
    Naira = 1,
    Usdt = 2,
}

impl Currency {
    /// Numeric ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Currency::Naira),
            2 => Some(Currency::Usdt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Naira => "naira",
            Currency::Usdt => "usdt",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "naira" | "ngn" => Ok(Currency::Naira),
            "usdt" => Ok(Currency::Usdt),
            other => Err(MoneyError::InvalidCurrency(other.to_string())),
        }
    }
}

/// Convert a naira amount to kobo minor units for the card processor.
///
/// The processor accepts integer minor units only; fractional kobo is a
/// caller bug, so it is rejected rather than rounded.
pub fn to_minor_units(amount: Decimal) -> Result<u64, MoneyError> {
    if amount <= Decimal::ZERO {
        return Err(MoneyError::InvalidAmount);
    }
    let scaled = amount * Decimal::from(100u32);
    if scaled.fract() != Decimal::ZERO {
        return Err(MoneyError::Overflow);
    }
    scaled.to_u64().ok_or(MoneyError::Overflow)
}

/// Decode an 18-decimal on-chain token amount into a Decimal.
///
/// BSC USDT carries 18 decimals. `Decimal` holds 28-29 significant digits,
/// so the quotient is truncated past that; payment totals are far below
/// that range.
pub fn usdt_from_wei(raw: &BigUint) -> Option<Decimal> {
    let divisor = BigUint::from(10u32).pow(18);
    let whole = raw / &divisor;
    let frac = raw % &divisor;

    let whole = Decimal::from_u128(u128::try_from(whole).ok()?)?;
    let frac = Decimal::from_u128(u128::try_from(frac).ok()?)?;
    Some(whole + frac / Decimal::from_u128(10u128.pow(18))?)
}

/// Check that `actual` is within ±`tolerance_percent` of `expected`.
///
/// Used only by the on-chain rail, which settles whatever the sender's
/// wallet actually transferred.
pub fn within_tolerance(expected: Decimal, actual: Decimal, tolerance_percent: u32) -> bool {
    if expected <= Decimal::ZERO {
        return false;
    }
    let tolerance = expected * Decimal::from(tolerance_percent) / Decimal::from(100u32);
    (expected - actual).abs() <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_roundtrip() {
        assert_eq!(Currency::from_id(1), Some(Currency::Naira));
        assert_eq!(Currency::from_id(2), Some(Currency::Usdt));
        assert_eq!(Currency::from_id(0), None);
        assert_eq!("naira".parse::<Currency>().unwrap(), Currency::Naira);
        assert_eq!("USDT".parse::<Currency>().unwrap(), Currency::Usdt);
        assert!("eur".parse::<Currency>().is_err());
    }

    #[test]
    fn test_to_minor_units() {
        assert_eq!(to_minor_units(Decimal::from(1300000)).unwrap(), 130000000);
        assert_eq!(
            to_minor_units(Decimal::from_str("25.50").unwrap()).unwrap(),
            2550
        );
        assert!(to_minor_units(Decimal::ZERO).is_err());
        // Sub-kobo amounts are rejected, not rounded
        assert!(to_minor_units(Decimal::from_str("0.005").unwrap()).is_err());
    }

    #[test]
    fn test_usdt_from_wei() {
        // 50 USDT = 50 * 10^18
        let raw = BigUint::from(50u32) * BigUint::from(10u32).pow(18);
        assert_eq!(usdt_from_wei(&raw).unwrap(), Decimal::from(50));

        // 49.5 USDT
        let raw = BigUint::from(495u32) * BigUint::from(10u32).pow(17);
        assert_eq!(
            usdt_from_wei(&raw).unwrap(),
            Decimal::from_str("49.5").unwrap()
        );

        assert_eq!(usdt_from_wei(&BigUint::from(0u32)).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_within_tolerance() {
        let expected = Decimal::from(50);
        // 49 is within 2% of 50, 48 is not
        assert!(within_tolerance(expected, Decimal::from(49), 2));
        assert!(!within_tolerance(expected, Decimal::from(48), 2));
        // Overpay is tolerated symmetrically
        assert!(within_tolerance(expected, Decimal::from(51), 2));
        assert!(!within_tolerance(expected, Decimal::from(52), 2));
        assert!(!within_tolerance(Decimal::ZERO, Decimal::ZERO, 2));
    }
}
