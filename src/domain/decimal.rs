//! Lossless decimal numeric type backed by rust_decimal.
//!
//! Money amounts are rounded to two decimal places at creation and move
//! through storage as integer cents; lot volume moves as integer micro-lots.
//! The conversions here are exact or refuse (`None`); they never round.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal as RustDecimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MICRO_LOTS_PER_LOT: i64 = 1_000_000;

/// Lossless decimal numeric type for commission arithmetic.
///
/// Backed by rust_decimal to avoid floating-point drift.
/// Serializes to JSON number (not string) by default.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::float")] RustDecimal);

impl Decimal {
    /// Create a Decimal from a RustDecimal.
    pub fn new(value: RustDecimal) -> Self {
        Decimal(value)
    }

    /// Parse a Decimal from a string losslessly.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s).map(Decimal)
    }

    /// Format the Decimal as a canonical string (no exponent notation).
    pub fn to_canonical_string(&self) -> String {
        format!("{}", self.0.normalize())
    }

    /// The additive identity (0).
    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    /// Returns true if the value is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the value is > 0.
    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    /// Returns true if the value is < 0.
    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    /// Round to two decimal places, midpoint away from zero.
    ///
    /// Commission amounts are rounded with this before they become ledger
    /// entries, so every stored amount has an exact cents representation.
    pub fn round_money(&self) -> Self {
        Decimal(
            self.0
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Exact conversion to integer cents. None if the value has sub-cent
    /// precision.
    pub fn to_cents(&self) -> Option<i64> {
        let scaled = self.0 * RustDecimal::ONE_HUNDRED;
        if scaled.fract().is_zero() {
            scaled.to_i64()
        } else {
            None
        }
    }

    /// Build a Decimal from integer cents.
    pub fn from_cents(cents: i64) -> Self {
        Decimal(RustDecimal::new(cents, 2))
    }

    /// Exact conversion to integer micro-lots (1e-6 lot). None if the value
    /// carries more than six decimal places.
    pub fn to_micro_lots(&self) -> Option<i64> {
        let scaled = self.0 * RustDecimal::from(MICRO_LOTS_PER_LOT);
        if scaled.fract().is_zero() {
            scaled.to_i64()
        } else {
            None
        }
    }

    /// Build a Decimal from integer micro-lots.
    pub fn from_micro_lots(micro: i64) -> Self {
        Decimal(RustDecimal::new(micro, 6))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<Decimal> for RustDecimal {
    fn from(value: Decimal) -> Self {
        value.0
    }
}

impl std::ops::Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Decimal {
    type Output = Decimal;

    fn mul(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 * rhs.0)
    }
}

impl std::ops::Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal(-self.0)
    }
}
