//! Core identifier and quantity types for cartcore.
//!
//! All types use smart constructors so a value that exists is a valid value,
//! following the "parse, don't validate" principle. Storage-generated
//! identifiers are positive integers; quantities inside a cart are never zero.

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};

/// Identifier of a catalog product.
///
/// Product ids are generated by storage and are always positive, which keeps
/// the line-item wire format free of signs.
#[nutype(
    validate(greater = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct ProductId(i64);

/// Identifier of a registered user.
#[nutype(
    validate(greater = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct UserId(i64);

/// Identifier of an order (paid or unpaid).
#[nutype(
    validate(greater = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct OrderId(i64);

/// Number of units of one product inside an order.
///
/// A line item with zero units must not exist: reducing a quantity to zero
/// removes the line item instead.
#[nutype(
    validate(greater_or_equal = 1),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct Quantity(u32);

impl Quantity {
    /// Adds `other` to this quantity, returning `None` on overflow.
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.into_inner()
            .checked_add(other.into_inner())
            .and_then(|sum| Self::try_new(sum).ok())
    }

    /// Subtracts `other`, returning `None` when nothing would remain.
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.into_inner()
            .checked_sub(other.into_inner())
            .and_then(|rest| Self::try_new(rest).ok())
    }
}

/// Units of a product held in stock. Zero means sold out.
#[nutype(
    validate(greater_or_equal = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct StockQuantity(i64);

/// Version of a stored order, used for optimistic concurrency control.
///
/// Versions start at 1 when an order is created and increment with each
/// successful write.
#[nutype(
    validate(greater_or_equal = 1),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct OrderVersion(u64);

impl OrderVersion {
    /// The version assigned to a freshly created order.
    pub fn initial() -> Self {
        Self::try_new(1).expect("1 is always a valid version")
    }

    /// Returns the next version after this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self::try_new(self.into_inner() + 1).expect("next version should always be valid")
    }
}

/// A point in time recorded on orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a new timestamp from a UTC `DateTime`.
    pub const fn new(datetime: DateTime<Utc>) -> Self {
        Self(datetime)
    }

    /// Creates a timestamp representing the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the underlying `DateTime`.
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self(datetime)
    }
}

/// Identifies the single order a cart operation may touch: a user's order
/// with the given paid flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CartKey {
    /// Owner of the order.
    pub user_id: UserId,
    /// Whether the addressed order is paid.
    pub paid: bool,
}

impl CartKey {
    /// The key of a user's current (unpaid) cart.
    pub const fn unpaid(user_id: UserId) -> Self {
        Self {
            user_id,
            paid: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qty(value: u32) -> Quantity {
        Quantity::try_new(value).expect("valid quantity")
    }

    #[test]
    fn identifiers_reject_non_positive_values() {
        assert!(ProductId::try_new(0).is_err());
        assert!(ProductId::try_new(-3).is_err());
        assert!(UserId::try_new(0).is_err());
        assert!(OrderId::try_new(-1).is_err());
        assert!(ProductId::try_new(1).is_ok());
    }

    #[test]
    fn quantity_must_be_at_least_one() {
        assert!(Quantity::try_new(0).is_err());
        assert_eq!(qty(1).into_inner(), 1);
    }

    #[test]
    fn stock_may_be_zero_but_not_negative() {
        assert!(StockQuantity::try_new(0).is_ok());
        assert!(StockQuantity::try_new(-1).is_err());
    }

    #[test]
    fn quantity_addition_detects_overflow() {
        assert_eq!(qty(2).checked_add(qty(3)), Some(qty(5)));
        assert_eq!(qty(u32::MAX).checked_add(qty(1)), None);
    }

    #[test]
    fn quantity_subtraction_to_zero_yields_none() {
        assert_eq!(qty(5).checked_sub(qty(2)), Some(qty(3)));
        assert_eq!(qty(2).checked_sub(qty(2)), None);
        assert_eq!(qty(2).checked_sub(qty(7)), None);
    }

    #[test]
    fn order_versions_increase_monotonically() {
        let first = OrderVersion::initial();
        let second = first.next();
        assert!(second > first);
        assert_eq!(second.into_inner(), 2);
    }
}
