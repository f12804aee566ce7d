//! Wire amounts to human decimals, and USD amount/price for trades.

use alloy_primitives::{I256, U256};
use rust_decimal::Decimal;

use super::types::{BaseTokens, Pair};

/// `Decimal` keeps a 96-bit mantissa with at most 28 fractional digits.
const MAX_MANTISSA_BITS: usize = 96;
const MAX_SCALE: u32 = 28;

/// `raw / 10^decimals`. Digits beyond the mantissa are truncated; values
/// whose integer part overflows saturate to `Decimal::MAX`.
pub fn wei_to_decimal(raw: U256, decimals: u8) -> Decimal {
    let ten = U256::from(10u8);
    let mut value = raw;
    let mut scale = decimals as u32;
    while value.bit_len() > MAX_MANTISSA_BITS || scale > MAX_SCALE {
        if scale == 0 {
            return Decimal::MAX;
        }
        value /= ten;
        scale -= 1;
    }
    let mantissa = value.saturating_to::<u128>() as i128;
    Decimal::try_from_i128_with_scale(mantissa, scale)
        .map(|d| d.normalize())
        .unwrap_or(Decimal::MAX)
}

pub fn signed_wei_to_decimal(raw: I256, decimals: u8) -> Decimal {
    let magnitude = wei_to_decimal(raw.unsigned_abs(), decimals);
    if raw.is_negative() { -magnitude } else { magnitude }
}

/// Converts a pair of wire-order amounts into logical-order decimals.
///
/// Not reversed: `(raw0 / 10^dec0, raw1 / 10^dec1)`. Reversed: the raw values
/// swap sides and emerge as `(raw1 / 10^dec0, raw0 / 10^dec1)`, using the
/// logical tokens' decimals.
pub fn parse_amounts_by_pair(raw0: U256, raw1: U256, pair: &Pair) -> (Decimal, Decimal) {
    let (a, b) = if pair.tokens_reversed { (raw1, raw0) } else { (raw0, raw1) };
    (wei_to_decimal(a, pair.token0.decimals), wei_to_decimal(b, pair.token1.decimals))
}

pub fn parse_signed_amounts_by_pair(raw0: I256, raw1: I256, pair: &Pair) -> (Decimal, Decimal) {
    let (a, b) = if pair.tokens_reversed { (raw1, raw0) } else { (raw0, raw1) };
    (signed_wei_to_decimal(a, pair.token0.decimals), signed_wei_to_decimal(b, pair.token1.decimals))
}

/// USD value of the trade and USD price of token0.
///
/// Token1 native (or wrapped): `amountUSD = t1 * nativePrice`. Token1 a
/// stablecoin: `amountUSD = t1`. Anything else prices at zero.
pub fn calc_amount_and_price(native_price: Decimal, t0: Decimal, t1: Decimal, pair: &Pair, bases: &BaseTokens) -> (Decimal, Decimal) {
    let quote = &pair.token1.address;
    let amount_usd = if bases.is_native(quote) {
        t1.checked_mul(native_price).unwrap_or_default()
    } else if bases.is_stablecoin(quote) {
        t1
    } else {
        Decimal::ZERO
    };
    let price_usd = if t0.is_zero() { Decimal::ZERO } else { amount_usd.checked_div(t0).unwrap_or_default() };
    (amount_usd, price_usd)
}
