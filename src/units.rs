//! Wei and share-count conversions into `Decimal`.

use alloy::primitives::U256;
use rust_decimal::Decimal;
use serde::Serializer;

const WEI_DECIMALS: u32 = 18;

/// Exact ETH value of a wei amount. `None` if it exceeds `Decimal` range.
pub fn wei_to_eth(wei: U256) -> Option<Decimal> {
    scaled(wei, WEI_DECIMALS)
}

/// Integer share count as a `Decimal`.
pub fn to_decimal(value: U256) -> Option<Decimal> {
    scaled(value, 0)
}

fn scaled(value: U256, scale: u32) -> Option<Decimal> {
    let raw = i128::try_from(u128::try_from(value).ok()?).ok()?;
    Decimal::try_from_i128_with_scale(raw, scale)
        .ok()
        .map(|d| d.normalize())
}

/// Serialize a `U256` as a base-10 string instead of ruint's hex.
pub fn serialize_u256<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

pub fn serialize_opt_u256<S: Serializer>(
    value: &Option<U256>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.collect_str(v),
        None => serializer.serialize_none(),
    }
}
