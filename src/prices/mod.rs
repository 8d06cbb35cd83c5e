//! Trade price history for a property, bucketed into a VWAP series.

use crate::config::Config;
use crate::onchain::abi;
use crate::onchain::decode::MarketEvent;
use crate::onchain::source::u256_topic;
use crate::onchain::{ChainReader, ListingState, LogQuery};
use crate::units::{to_decimal, wei_to_eth};
use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

const HOUR: u64 = 3_600;
const DAY: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriceRange {
    #[default]
    OneDay,
    SevenDays,
    ThirtyDays,
    NinetyDays,
    OneYear,
    All,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown price range '{0}' (expected 1D, 7D, 30D, 90D, 1Y or All)")]
pub struct UnknownRange(pub String);

impl PriceRange {
    /// Approximate block span of the range; `None` means from the scan floor.
    pub fn block_window(self) -> Option<u64> {
        match self {
            PriceRange::OneDay => Some(6_000),
            PriceRange::SevenDays => Some(42_000),
            PriceRange::ThirtyDays => Some(180_000),
            PriceRange::NinetyDays => Some(540_000),
            PriceRange::OneYear => Some(2_000_000),
            PriceRange::All => None,
        }
    }

    /// Bucket width in seconds.
    pub fn bucket_secs(self) -> u64 {
        match self {
            PriceRange::OneDay => HOUR,
            _ => DAY,
        }
    }

    fn from_block(self, floor: u64, latest: u64) -> u64 {
        match self.block_window() {
            Some(w) => latest.saturating_sub(w).max(floor),
            None => floor,
        }
    }
}

impl FromStr for PriceRange {
    type Err = UnknownRange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "1D" => Ok(PriceRange::OneDay),
            "7D" => Ok(PriceRange::SevenDays),
            "30D" => Ok(PriceRange::ThirtyDays),
            "90D" => Ok(PriceRange::NinetyDays),
            "1Y" => Ok(PriceRange::OneYear),
            "ALL" => Ok(PriceRange::All),
            _ => Err(UnknownRange(s.to_string())),
        }
    }
}

impl fmt::Display for PriceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PriceRange::OneDay => "1D",
            PriceRange::SevenDays => "7D",
            PriceRange::ThirtyDays => "30D",
            PriceRange::NinetyDays => "90D",
            PriceRange::OneYear => "1Y",
            PriceRange::All => "All",
        };
        f.write_str(s)
    }
}

/// A single trade at a known time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricePoint {
    pub timestamp: u64,
    pub price_eth: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceBucket {
    pub start: DateTime<Utc>,
    /// Volume-weighted average price in ETH.
    pub price_eth: Decimal,
    pub volume: Decimal,
}

/// Collapse points into fixed-width buckets, ascending by bucket start.
/// A zero-amount trade weighs as one share.
pub fn bucket_vwap(points: &[PricePoint], bucket_secs: u64) -> Vec<PriceBucket> {
    let width = bucket_secs.max(1);
    let mut buckets: BTreeMap<u64, (Decimal, Decimal)> = BTreeMap::new();

    for p in points {
        let key = p.timestamp / width * width;
        let vol = if p.amount.is_zero() { Decimal::ONE } else { p.amount };
        let Some(notional) = p.price_eth.checked_mul(vol) else {
            warn!(timestamp = p.timestamp, "trade notional overflows, skipping point");
            continue;
        };
        let entry = buckets.entry(key).or_insert((Decimal::ZERO, Decimal::ZERO));
        let (Some(total), Some(volume)) =
            (entry.0.checked_add(notional), entry.1.checked_add(vol))
        else {
            warn!(timestamp = p.timestamp, "bucket totals overflow, skipping point");
            continue;
        };
        *entry = (total, volume);
    }

    buckets
        .into_iter()
        .filter_map(|(key, (notional, volume))| {
            let start = DateTime::<Utc>::from_timestamp(i64::try_from(key).ok()?, 0)?;
            Some(PriceBucket {
                start,
                price_eth: notional.checked_div(volume)?.normalize(),
                volume,
            })
        })
        .collect()
}

pub struct PriceHistoryReader {
    reader: ChainReader,
    marketplace: Address,
    start_block: u64,
}

impl PriceHistoryReader {
    pub fn new(reader: ChainReader, config: &Config) -> Self {
        Self {
            reader,
            marketplace: config.chain.marketplace,
            start_block: config.scan.start_block,
        }
    }

    /// Primary purchases and secondary fills of `property_id` within `range`.
    pub async fn points(
        &self,
        property_id: U256,
        range: PriceRange,
    ) -> anyhow::Result<Vec<PricePoint>> {
        let latest = self.reader.block_number().await?;
        let from = range.from_block(self.start_block, latest);

        let purchases = LogQuery::new(self.marketplace, abi::SHARES_PURCHASED_TOPIC)
            .topic1(u256_topic(property_id))
            .range(from, latest);
        let fills = LogQuery::new(self.marketplace, abi::LISTING_FILLED_TOPIC)
            .range(from, latest);

        // (block, price wei, amount)
        let mut trades: Vec<(u64, U256, U256)> = Vec::new();
        for log in self.reader.events(&purchases).await {
            if let MarketEvent::SharesPurchased {
                amount,
                price_per_share_wei,
                ..
            } = log.event
            {
                trades.push((log.log.block_number, price_per_share_wei, amount));
            }
        }

        let mut listings: HashMap<U256, Option<ListingState>> = HashMap::new();
        for log in self.reader.events(&fills).await {
            let MarketEvent::ListingFilled {
                listing_id, amount, ..
            } = log.event
            else {
                continue;
            };
            if !listings.contains_key(&listing_id) {
                let state = match self.reader.source().listing(listing_id).await {
                    Ok(state) => state,
                    Err(e) => {
                        warn!(
                            error = %e,
                            listing_id = %listing_id,
                            "listing read failed, dropping fill"
                        );
                        None
                    }
                };
                listings.insert(listing_id, state);
            }
            match listings.get(&listing_id) {
                Some(Some(state)) if state.property_id == property_id => {
                    trades.push((log.log.block_number, state.price_per_share_wei, amount));
                }
                _ => {}
            }
        }

        let mut clock = self.reader.clock();
        let mut points = Vec::with_capacity(trades.len());
        for (block, price_wei, amount) in trades {
            let Some(timestamp) = clock.timestamp(block).await else {
                warn!(block, "no timestamp for trade block, skipping point");
                continue;
            };
            let (Some(price_eth), Some(amount)) = (wei_to_eth(price_wei), to_decimal(amount))
            else {
                warn!(block, "trade value out of decimal range, skipping point");
                continue;
            };
            points.push(PricePoint {
                timestamp,
                price_eth,
                amount,
            });
        }
        points.sort_by_key(|p| p.timestamp);

        debug!(
            property_id = %property_id,
            %range,
            from,
            points = points.len(),
            "price points collected"
        );
        Ok(points)
    }

    pub async fn history(
        &self,
        property_id: U256,
        range: PriceRange,
    ) -> anyhow::Result<Vec<PriceBucket>> {
        let points = self.points(property_id, range).await?;
        Ok(bucket_vwap(&points, range.bucket_secs()))
    }
}
