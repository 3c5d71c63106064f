//! # Money Module
//!
//! Provides the `Money` type for monetary values in the smallest currency
//! unit (cents). Every amount the ledger stores, sums or compares is an
//! integer number of cents.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  A closing must add up to the cent:                                     │
//! │                                                                         │
//! │    cash 1250.10 + card 300.20 == collected 1550.30                      │
//! │                                                                         │
//! │  With floats the breakdown sum and the collected total can disagree    │
//! │  in the last digit. With i64 cents they cannot.                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use till_core::money::Money;
//!
//! let total = Money::from_cents(1000);
//! let paid = Money::from_cents(1200);
//! assert_eq!(total.outstanding_after(paid), Money::zero());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in cents.
///
/// Signed so that intermediate differences (e.g. cash minus expenses) can go
/// below zero; balances that must not are floored explicitly with
/// [`Money::outstanding_after`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is greater than zero.
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is less than zero.
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// What is still owed when `self` is the total and `paid` has been
    /// received: `max(0, self - paid)`.
    ///
    /// ## Example
    /// ```rust
    /// use till_core::money::Money;
    ///
    /// let total = Money::from_cents(1000);
    /// assert_eq!(total.outstanding_after(Money::from_cents(400)).cents(), 600);
    /// assert_eq!(total.outstanding_after(Money::from_cents(1500)).cents(), 0);
    /// ```
    #[inline]
    pub const fn outstanding_after(&self, paid: Money) -> Money {
        let diff = self.0 - paid.0;
        if diff > 0 {
            Money(diff)
        } else {
            Money(0)
        }
    }

    /// Multiplies a unit price by a quantity (line subtotal).
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Debug-oriented formatting; tills format amounts for display themselves.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}${}.{:02}", sign, self.major().abs(), self.minor())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + *m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        let money = Money::from_cents(1099);
        assert_eq!(money.cents(), 1099);
        assert_eq!(money.major(), 10);
        assert_eq!(money.minor(), 99);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Money::from_cents(1099)), "$10.99");
        assert_eq!(format!("{}", Money::from_cents(-550)), "-$5.50");
        assert_eq!(format!("{}", Money::zero()), "$0.00");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(400);

        assert_eq!((a + b).cents(), 1400);
        assert_eq!((a - b).cents(), 600);
        assert_eq!((b * 3).cents(), 1200);

        let mut c = a;
        c -= b;
        c += Money::from_cents(1);
        assert_eq!(c.cents(), 601);
    }

    #[test]
    fn test_outstanding_is_floored_at_zero() {
        let total = Money::from_cents(1000);
        assert_eq!(total.outstanding_after(Money::zero()).cents(), 1000);
        assert_eq!(total.outstanding_after(Money::from_cents(1000)).cents(), 0);
        assert_eq!(total.outstanding_after(Money::from_cents(1001)).cents(), 0);
    }

    #[test]
    fn test_sum() {
        let amounts = vec![Money::from_cents(400), Money::from_cents(600)];
        let by_ref: Money = amounts.iter().sum();
        let by_val: Money = amounts.into_iter().sum();
        assert_eq!(by_ref, by_val);
        assert_eq!(by_val.cents(), 1000);
    }

    #[test]
    fn test_zero_and_checks() {
        assert!(Money::zero().is_zero());
        assert!(Money::from_cents(1).is_positive());
        assert!(Money::from_cents(-1).is_negative());
    }
}
