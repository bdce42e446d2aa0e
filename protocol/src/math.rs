//! # Checked Fixed-Point Helpers
//!
//! All value arithmetic in the vault is integer-only and floors toward the
//! pool. Intermediate products are computed in `u128`; every multiplication
//! and division is checked and surfaces [`VaultError::ArithmeticOverflow`]
//! instead of wrapping or panicking.
//!
//! Prices are carried at a fixed [`PRICE_DECIMALS`] precision, expressed in
//! smallest units of the underlying asset per whole token. Converting a token
//! amount to underlying value is therefore decimal-aware on three axes: the
//! token's decimals, the underlying's decimals, and the price precision.

use crate::config::{BPS_DENOMINATOR, PRICE_DECIMALS};
use crate::error::VaultError;

/// `10^exp` as `u128`, checked.
pub fn pow10(exp: u32) -> Result<u128, VaultError> {
    10u128
        .checked_pow(exp)
        .ok_or(VaultError::ArithmeticOverflow("pow10"))
}

/// `floor(a * b / d)`, checked.
pub fn mul_div_floor(a: u128, b: u128, d: u128) -> Result<u128, VaultError> {
    if d == 0 {
        return Err(VaultError::ArithmeticOverflow("mul_div_floor: zero divisor"));
    }
    a.checked_mul(b)
        .ok_or(VaultError::ArithmeticOverflow("mul_div_floor"))
        .map(|product| product / d)
}

/// `floor(value * bps / 10_000)`.
pub fn bps_mul(value: u64, bps: u32) -> Result<u64, VaultError> {
    let scaled = mul_div_floor(value as u128, bps as u128, BPS_DENOMINATOR)?;
    u64::try_from(scaled).map_err(|_| VaultError::ArithmeticOverflow("bps_mul"))
}

/// Rescales a raw oracle price with `from_decimals` places to
/// [`PRICE_DECIMALS`]. Precision beyond the target is floored away.
pub fn normalize_price(raw: u128, from_decimals: u8) -> Result<u128, VaultError> {
    let target = PRICE_DECIMALS as i32;
    let shift = target - from_decimals as i32;
    if shift >= 0 {
        raw.checked_mul(pow10(shift as u32)?)
            .ok_or(VaultError::ArithmeticOverflow("normalize_price"))
    } else {
        Ok(raw / pow10((-shift) as u32)?)
    }
}

/// Value of `amount` smallest token units in smallest underlying units.
///
/// `value = amount * price * 10^underlying_decimals / 10^(token_decimals + PRICE_DECIMALS)`
pub fn amount_to_value(
    amount: u64,
    price: u128,
    token_decimals: u8,
    underlying_decimals: u8,
) -> Result<u128, VaultError> {
    let numerator = (amount as u128)
        .checked_mul(price)
        .ok_or(VaultError::ArithmeticOverflow("amount_to_value"))?;
    let denominator = pow10(token_decimals as u32 + PRICE_DECIMALS as u32)?;
    mul_div_floor(numerator, pow10(underlying_decimals as u32)?, denominator)
}

/// Inverse of [`amount_to_value`]: how many smallest token units `value`
/// buys at `price`, floored.
pub fn value_to_amount(
    value: u128,
    price: u128,
    token_decimals: u8,
    underlying_decimals: u8,
) -> Result<u64, VaultError> {
    let numerator = pow10(token_decimals as u32 + PRICE_DECIMALS as u32)?;
    let denominator = price
        .checked_mul(pow10(underlying_decimals as u32)?)
        .ok_or(VaultError::ArithmeticOverflow("value_to_amount"))?;
    let amount = mul_div_floor(value, numerator, denominator)?;
    u64::try_from(amount).map_err(|_| VaultError::ArithmeticOverflow("value_to_amount"))
}
