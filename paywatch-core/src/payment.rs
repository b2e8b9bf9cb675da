//! Fixed-point payment arithmetic.
//!
//! All thresholds are computed with [`Decimal`] and truncated to the token's
//! decimals, so the `>=` boundary is exact.

use alloy::primitives::U256;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Largest scale `Decimal` can represent.
pub const MAX_TOKEN_DECIMALS: u8 = 28;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("token decimals {0} exceed the supported maximum of {MAX_TOKEN_DECIMALS}")]
    UnsupportedDecimals(u8),
    #[error("raw amount {0} does not fit a decimal")]
    Overflow(U256),
}

/// Scale a raw on-chain integer amount by the token decimals.
pub fn token_amount(raw: U256, decimals: u8) -> Result<Decimal, AmountError> {
    if decimals > MAX_TOKEN_DECIMALS {
        return Err(AmountError::UnsupportedDecimals(decimals));
    }
    let value = i128::try_from(raw).map_err(|_| AmountError::Overflow(raw))?;
    Decimal::try_from_i128_with_scale(value, u32::from(decimals))
        .map(|d| d.normalize())
        .map_err(|_| AmountError::Overflow(raw))
}

/// The smallest cumulative payment that settles `requested`.
///
/// `covering_factor` is a percentage of tolerated underpayment. Values
/// outside `0..=100` are ignored and the full amount is required.
pub fn minimum_accepted(requested: Decimal, covering_factor: Decimal, decimals: u8) -> Decimal {
    if covering_factor < Decimal::ZERO || covering_factor > Decimal::ONE_HUNDRED {
        return requested;
    }
    let ratio = (Decimal::ONE_HUNDRED - covering_factor) / Decimal::ONE_HUNDRED;
    (requested * ratio).round_dp_with_strategy(u32::from(decimals), RoundingStrategy::ToZero)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentClassification {
    /// Cumulative payment reached the accepted minimum.
    Success { total: Decimal },
    /// Something was paid, but not enough yet.
    Partial { total: Decimal },
    /// Nothing was paid; leave the order alone.
    Ignored,
}

/// Classify an order after adding `value` to what it has received so far.
pub fn classify(
    requested: Decimal,
    transferred: Decimal,
    value: Decimal,
    covering_factor: Decimal,
    decimals: u8,
) -> PaymentClassification {
    let total = transferred + value;
    if total >= minimum_accepted(requested, covering_factor, decimals) {
        PaymentClassification::Success { total }
    } else if total > Decimal::ZERO {
        PaymentClassification::Partial { total }
    } else {
        PaymentClassification::Ignored
    }
}
