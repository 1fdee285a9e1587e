use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Number of decimal places currency amounts are kept at.
pub const CURRENCY_SCALE: u32 = 2;

/// Represents a non-negative currency amount with 2 decimal places precision.
///
/// Arrears are derived by subtracting payments from scheduled amounts, and
/// rounding noise in stored payments can push such a difference slightly
/// below zero. `Money` floors subtraction at zero so a balance never reads
/// as negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Creates a new amount, rounding to currency precision and flooring at zero.
    pub fn new(value: Decimal) -> Self {
        let mut rounded = value
            .round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero)
            .max(Decimal::ZERO);
        rounded.rescale(CURRENCY_SCALE);
        Self(rounded)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// `a - b`, floored at zero.
    pub fn floor_sub(self, rhs: Self) -> Self {
        Self::new(self.0 - rhs.0)
    }

    /// Adds a raw decimal delta (which may be negative), floored at zero.
    pub fn floor_add(self, delta: Decimal) -> Self {
        Self::new(self.0 + delta)
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, Add::add)
    }
}
