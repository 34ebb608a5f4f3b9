//! Type-safe price representation using decimal arithmetic.
//!
//! Prices are stored as `NUMERIC(10, 2)` and never pass through floating
//! point. A `Price` is always non-negative.

use core::fmt;
use core::iter::Sum;
use core::ops::Add;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A monetary amount in the store currency's standard unit (yuan, not fen).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(feature = "postgres", sqlx(transparent))]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    /// A zero amount.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a price from a decimal amount.
    ///
    /// Returns `None` for negative amounts.
    #[must_use]
    pub fn new(amount: Decimal) -> Option<Self> {
        (amount >= Decimal::ZERO).then_some(Self(amount))
    }

    /// Create a price from whole currency units.
    #[must_use]
    pub fn from_units(units: u32) -> Self {
        Self(Decimal::from(units))
    }

    /// Create a price from an amount in cents (fen).
    #[must_use]
    pub fn from_cents(cents: u32) -> Self {
        Self(Decimal::new(i64::from(cents), 2))
    }

    /// Get the underlying decimal amount.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Multiply by a quantity.
    #[must_use]
    pub fn times(self, quantity: u32) -> Self {
        Self(self.0 * Decimal::from(quantity))
    }
}

/// Total for `quantity` units at `unit_price`.
#[must_use]
pub fn line_total(unit_price: Price, quantity: u32) -> Price {
    unit_price.times(quantity)
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sum for Price {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_price_rejected() {
        assert!(Price::new(Decimal::new(-1, 2)).is_none());
        assert!(Price::new(Decimal::ZERO).is_some());
    }

    #[test]
    fn test_line_total_is_exact() {
        let unit = Price::from_cents(1999);
        assert_eq!(line_total(unit, 3).amount(), Decimal::new(5997, 2));
    }

    #[test]
    fn test_sum_and_display() {
        let total: Price = [Price::from_units(20), Price::from_units(20), Price::from_units(10)]
            .into_iter()
            .sum();
        assert_eq!(total, Price::from_units(50));
        assert_eq!(Price::from_cents(505).to_string(), "5.05");
    }
}
