//! Token amounts and the decimal arithmetic used to split them.
//!
//! Amounts are unsigned integers. Any proportional split lifts amounts into
//! [`Decimal`], does the arithmetic there, and floors the result back into an
//! amount so every replica truncates identically. Amounts or results beyond
//! the decimal range are faults rather than clamped values.

use crate::error::EngineFault;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Token amount in the smallest unit of an asset.
pub type Amount = u128;

/// Largest amount that can take part in decimal arithmetic (`2^96 - 1`).
pub const MAX_DECIMAL_AMOUNT: Amount = (1 << 96) - 1;

/// Lifts an amount into decimal space.
///
/// Amounts above [`MAX_DECIMAL_AMOUNT`] are a fault.
pub fn to_decimal(amount: Amount) -> Result<Decimal, EngineFault> {
    Decimal::from_u128(amount).ok_or(EngineFault::AmountOutOfRange(amount))
}

/// Sums decimals, faulting on overflow. `what` names the sum in the fault.
pub fn checked_sum<I>(values: I, what: &str) -> Result<Decimal, EngineFault>
where
    I: IntoIterator<Item = Decimal>,
{
    values.into_iter().try_fold(Decimal::ZERO, |acc, value| {
        acc.checked_add(value)
            .ok_or_else(|| EngineFault::DecimalOverflow(format!("summing {what}")))
    })
}

/// Floors a decimal back into an amount; negative values become zero.
pub fn floor_amount(value: Decimal) -> Amount {
    if value <= Decimal::ZERO {
        return 0;
    }
    // every non-negative decimal floors into the u128 range
    value.floor().to_u128().unwrap_or(MAX_DECIMAL_AMOUNT)
}

/// Clamps `value` into `[0, 1]`.
pub fn clamp01(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO).min(Decimal::ONE)
}

/// Computes `value * numerator / denominator`, multiplying first when the
/// product fits. Returns zero when `denominator` is zero and a
/// [`EngineFault::DecimalOverflow`] when the result leaves the decimal range.
pub fn mul_div(
    value: Decimal,
    numerator: Decimal,
    denominator: Decimal,
) -> Result<Decimal, EngineFault> {
    if denominator.is_zero() {
        return Ok(Decimal::ZERO);
    }
    let result = match value.checked_mul(numerator) {
        Some(product) => product.checked_div(denominator),
        None => numerator
            .checked_div(denominator)
            .and_then(|ratio| ratio.checked_mul(value)),
    };
    result.ok_or_else(|| {
        EngineFault::DecimalOverflow(format!("scaling {value} by {numerator}/{denominator}"))
    })
}

/// Computes `floor(amount * numerator / denominator)`, multiplying first.
///
/// Returns zero when `denominator` is zero.
pub fn mul_div_floor(
    amount: Amount,
    numerator: Decimal,
    denominator: Decimal,
) -> Result<Amount, EngineFault> {
    Ok(floor_amount(mul_div(to_decimal(amount)?, numerator, denominator)?))
}

/// Computes `floor(amount * part / whole)` in integers, zero when `whole` is zero.
pub fn prorate(amount: Amount, part: Amount, whole: Amount) -> Result<Amount, EngineFault> {
    if whole == 0 {
        return Ok(0);
    }
    match amount.checked_mul(part) {
        Some(product) => Ok(product / whole),
        None => mul_div_floor(amount, to_decimal(part)?, to_decimal(whole)?),
    }
}

/// Parses a decimal string, tolerating surrounding whitespace.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw.trim()).ok()
}

/// Parses an unsigned integer amount.
pub fn parse_amount(raw: &str) -> Option<Amount> {
    raw.trim().parse::<Amount>().ok()
}
