//! Fixed-point currency.
//!
//! Amounts are held as integer cents and every operation that can produce a
//! fraction of a cent rounds half away from zero immediately, so totals never
//! drift with the order of operations.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Basis points in one whole (100%).
const BASIS_POINTS: i64 = 10_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);
    /// Largest amount accepted from input: one billion dollars.
    pub const MAX_AMOUNT: Money = Money(100_000_000_000);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Convert a decimal dollar figure, rounding to the nearest cent.
    pub fn from_f64(dollars: f64) -> Self {
        Self((dollars * 100.0).round() as i64)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Unit price times a quantity.
    pub fn times(self, quantity: i64) -> Self {
        Self(self.0.saturating_mul(quantity))
    }

    /// `self * rate`, where `rate` is expressed in basis points (875 = 8.75%).
    pub fn apply_rate(self, basis_points: i64) -> Self {
        Self(div_round(self.0.saturating_mul(basis_points), BASIS_POINTS))
    }

    /// `self / count`, rounded to the cent. Zero when `count` is zero.
    pub fn divide(self, count: i64) -> Self {
        if count == 0 {
            Self::ZERO
        } else {
            Self(div_round(self.0, count))
        }
    }
}

/// Integer division rounding half away from zero.
fn div_round(numerator: i64, denominator: i64) -> i64 {
    let q = numerator / denominator;
    let r = numerator % denominator;
    if 2 * r.abs() >= denominator.abs() {
        q + numerator.signum() * denominator.signum()
    } else {
        q
    }
}

/// Round a ratio to `places` decimal places.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0.saturating_sub(rhs.0))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        f64::deserialize(deserializer).map(Money::from_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cart_totals_round_at_each_step() {
        let subtotal = Money::from_f64(29.99).times(2) + Money::from_f64(49.99).times(1);
        assert_eq!(subtotal, Money::from_cents(10997));

        let tax = subtotal.apply_rate(875);
        assert_eq!(tax, Money::from_cents(962));

        assert_eq!((subtotal + tax).to_f64(), 119.59);
    }

    #[test]
    fn rate_rounds_half_away_from_zero() {
        // 0.3% of $5.00 is exactly 1.5 cents.
        assert_eq!(Money::from_f64(5.0).apply_rate(30), Money::from_cents(2));
        assert_eq!(Money::from_cents(-500).apply_rate(30), Money::from_cents(-2));
    }

    #[test]
    fn display_and_serde() {
        assert_eq!(Money::from_cents(11959).to_string(), "$119.59");
        assert_eq!(Money::from_cents(-5).to_string(), "-$0.05");

        let json = serde_json::to_value(Money::from_cents(962)).unwrap();
        assert_eq!(json, serde_json::json!(9.62));
        let back: Money = serde_json::from_value(json).unwrap();
        assert_eq!(back.cents(), 962);
    }

    #[test]
    fn divide_by_zero_is_zero() {
        assert_eq!(Money::from_cents(100).divide(0), Money::ZERO);
        assert_eq!(Money::from_cents(100).divide(3), Money::from_cents(33));
    }

    #[test]
    fn arithmetic_saturates_instead_of_overflowing() {
        let huge = Money::from_f64(1e17);
        assert_eq!(huge + huge, Money::from_cents(i64::MAX));
        assert_eq!(Money::from_cents(i64::MIN) - Money::from_cents(1), Money::from_cents(i64::MIN));
    }
}
