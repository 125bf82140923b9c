//! Payment Reference Generation
//!
//! Every purchase attempt gets one opaque reference that ties the journal
//! entry, the ledger entry and the external rail receipt together. The
//! reference is never reused.

use std::fmt;
use std::str::FromStr;

use crate::journal::ShareClass;

/// Opaque payment reference, namespaced per share class.
///
/// ULID-based:
/// - Monotonic, sortable within a millisecond
/// - No coordination needed across gateway instances
/// - 128-bit with good entropy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaymentReference {
    class: ShareClass,
    id: ulid::Ulid,
}

impl PaymentReference {
    /// Allocate a fresh reference for the given share class
    pub fn new(class: ShareClass) -> Self {
        Self {
            class,
            id: ulid::Ulid::new(),
        }
    }

    pub fn class(&self) -> ShareClass {
        self.class
    }

    fn prefix(class: ShareClass) -> &'static str {
        match class {
            ShareClass::Regular => "SHR",
            ShareClass::CoFounder => "CFD",
        }
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", Self::prefix(self.class), self.id)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid payment reference: {0}")]
pub struct InvalidReference(pub String);

impl FromStr for PaymentReference {
    type Err = InvalidReference;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, id) = s.split_once('-').ok_or_else(|| InvalidReference(s.into()))?;
        let class = match prefix {
            "SHR" => ShareClass::Regular,
            "CFD" => ShareClass::CoFounder,
            _ => return Err(InvalidReference(s.into())),
        };
        let id = ulid::Ulid::from_string(id).map_err(|_| InvalidReference(s.into()))?;
        Ok(Self { class, id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_are_unique() {
        let a = PaymentReference::new(ShareClass::Regular);
        let b = PaymentReference::new(ShareClass::Regular);
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_roundtrip() {
        let r = PaymentReference::new(ShareClass::CoFounder);
        let s = r.to_string();
        assert!(s.starts_with("CFD-"));
        let parsed: PaymentReference = s.parse().unwrap();
        assert_eq!(parsed, r);
        assert_eq!(parsed.class(), ShareClass::CoFounder);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("nonsense".parse::<PaymentReference>().is_err());
        assert!("XYZ-01ARZ3NDEKTSV4RRFFQ69G5FAV".parse::<PaymentReference>().is_err());
        assert!("SHR-not_a_ulid".parse::<PaymentReference>().is_err());
    }
}
