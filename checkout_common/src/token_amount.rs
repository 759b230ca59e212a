use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, Mul, Neg, Sub, SubAssign},
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

/// Number of base units in one whole token. Ledger balances are reported in base units.
pub const BASE_UNITS_PER_TOKEN: i64 = 1_000_000_000;

//--------------------------------------     TokenAmount       --------------------------------------------------------
/// A signed amount of the blockchain rail's native token, held in base units.
///
/// Signed, because ledger balance deltas are negative for the sending account.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct TokenAmount(i64);

op!(binary TokenAmount, Add, add);
op!(binary TokenAmount, Sub, sub);
op!(inplace TokenAmount, SubAssign, sub_assign);
op!(unary TokenAmount, Neg, neg);

impl Mul<i64> for TokenAmount {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self::from(self.value() * rhs)
    }
}

impl Sum for TokenAmount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented as a token amount: {0}")]
pub struct TokenAmountConversionError(String);

impl From<i64> for TokenAmount {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl PartialEq for TokenAmount {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for TokenAmount {}

impl TryFrom<u64> for TokenAmount {
    type Error = TokenAmountConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(TokenAmountConversionError(format!("Value {value} is too large to convert to a token amount")))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let per = BASE_UNITS_PER_TOKEN.unsigned_abs();
        write!(f, "{sign}{}.{:09}", abs / per, abs % per)
    }
}

impl TokenAmount {
    pub const fn from_base_units(units: i64) -> Self {
        Self(units)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn from_whole(tokens: i64) -> Self {
        Self(tokens * BASE_UNITS_PER_TOKEN)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// The absolute difference between two amounts.
    pub fn abs_diff(&self, other: &Self) -> Self {
        (*self - *other).abs()
    }
}
