use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, Mul},
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const DEFAULT_CURRENCY: &str = "USD";

//--------------------------------------       Money         ---------------------------------------------------------
/// A monetary amount in minor units (cents). Currency codes are carried separately on the records that hold amounts,
/// so that arithmetic on `Money` is exact integer arithmetic.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Money(i64);

op!(binary Money, Add, add);
op!(binary Money, Sub, sub);
op!(inplace Money, SubAssign, sub_assign);
op!(unary Money, Neg, neg);

impl Mul<i64> for Money {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self::from(self.value() * rhs)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented as a minor-unit amount: {0}")]
pub struct MoneyConversionError(String);

impl From<i64> for Money {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl PartialEq for Money {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Money {}

impl TryFrom<u64> for Money {
    type Error = MoneyConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(MoneyConversionError(format!("Value {} is too large to convert to Money", value)))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let cents = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", cents / 100, cents % 100)
    }
}

impl Money {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub fn from_major(units: i64) -> Self {
        Self(units * 100)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arithmetic() {
        let a = Money::from_cents(9_000);
        let b = Money::from_cents(1_050);
        assert_eq!(a + b, Money::from_cents(10_050));
        assert_eq!(a - b, Money::from_cents(7_950));
        assert_eq!(-b, Money::from_cents(-1_050));
        assert_eq!(b * 3, Money::from_cents(3_150));
        let total: Money = [a, b, b].into_iter().sum();
        assert_eq!(total, Money::from_cents(11_100));
    }

    #[test]
    fn display_is_decimal() {
        assert_eq!(Money::from_cents(9_000).to_string(), "90.00");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-1_050).to_string(), "-10.50");
        assert_eq!(Money::default().to_string(), "0.00");
    }

    #[test]
    fn major_units() {
        assert_eq!(Money::from_major(90), Money::from_cents(9_000));
        assert!(Money::from_major(0).is_zero());
    }

    #[test]
    fn u64_conversion_guards_overflow() {
        assert!(Money::try_from(u64::MAX).is_err());
        assert_eq!(Money::try_from(100u64).unwrap(), Money::from_cents(100));
    }
}
