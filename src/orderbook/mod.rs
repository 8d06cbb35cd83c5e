//! Ask-side order book rebuilt from marketplace listing events.
//!
//! There is no checkpoint: every query replays `ListingCreated` for the
//! property from the scan floor, then the cancel and fill events of each
//! listing it found.

use crate::config::Config;
use crate::onchain::abi;
use crate::onchain::decode::MarketEvent;
use crate::onchain::source::u256_topic;
use crate::onchain::{ChainReader, LogQuery};
use crate::units::{serialize_u256, wei_to_eth};
use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A secondary-market listing as replayed from its events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub listing_id: U256,
    pub property_id: U256,
    pub seller: Address,
    pub price_per_share_wei: U256,
    pub initial_amount: U256,
    pub filled: U256,
    pub cancelled: bool,
    pub created_block: u64,
}

impl Listing {
    pub fn remaining(&self) -> U256 {
        self.initial_amount.saturating_sub(self.filled)
    }

    /// Cancellation wins over any remaining amount.
    pub fn is_active(&self) -> bool {
        !self.cancelled && self.remaining() > U256::ZERO
    }

    pub fn apply_fill(&mut self, amount: U256) {
        self.filled = self.filled.saturating_add(amount);
    }
}

/// Read-only view of an active listing, best price first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBookEntry {
    #[serde(serialize_with = "serialize_u256")]
    pub listing_id: U256,
    #[serde(serialize_with = "serialize_u256")]
    pub property_id: U256,
    pub seller: Address,
    #[serde(serialize_with = "serialize_u256")]
    pub price_per_share_wei: U256,
    /// `None` when the wei price is beyond `Decimal` range.
    pub price_eth: Option<Decimal>,
    #[serde(serialize_with = "serialize_u256")]
    pub amount: U256,
    pub created_block: u64,
}

/// One point of the cumulative ask depth curve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepthPoint {
    #[serde(serialize_with = "serialize_u256")]
    pub price_per_share_wei: U256,
    pub price_eth: Option<Decimal>,
    #[serde(serialize_with = "serialize_u256")]
    pub cumulative: U256,
}

/// Active asks sorted by price, then creation block, truncated to `limit`.
pub fn active_asks<I>(listings: I, limit: usize) -> Vec<OrderBookEntry>
where
    I: IntoIterator<Item = Listing>,
{
    let mut active: Vec<Listing> = listings.into_iter().filter(Listing::is_active).collect();
    active.sort_by(|a, b| {
        a.price_per_share_wei
            .cmp(&b.price_per_share_wei)
            .then(a.created_block.cmp(&b.created_block))
            .then(a.listing_id.cmp(&b.listing_id))
    });

    active
        .into_iter()
        .take(limit)
        .map(|l| {
            let price_eth = wei_to_eth(l.price_per_share_wei);
            if price_eth.is_none() {
                warn!(
                    listing_id = %l.listing_id,
                    price_wei = %l.price_per_share_wei,
                    "listing price beyond decimal range, ETH value left empty"
                );
            }
            OrderBookEntry {
                listing_id: l.listing_id,
                property_id: l.property_id,
                seller: l.seller,
                price_per_share_wei: l.price_per_share_wei,
                price_eth,
                amount: l.remaining(),
                created_block: l.created_block,
            }
        })
        .collect()
}

/// Cumulative amount available at or below each ask price.
pub fn depth_curve(asks: &[OrderBookEntry]) -> Vec<DepthPoint> {
    let mut cumulative = U256::ZERO;
    asks.iter()
        .map(|a| {
            cumulative = cumulative.saturating_add(a.amount);
            DepthPoint {
                price_per_share_wei: a.price_per_share_wei,
                price_eth: a.price_eth,
                cumulative,
            }
        })
        .collect()
}

pub struct OrderBookReader {
    reader: ChainReader,
    marketplace: Address,
    start_block: u64,
}

impl OrderBookReader {
    pub fn new(reader: ChainReader, config: &Config) -> Self {
        Self {
            reader,
            marketplace: config.chain.marketplace,
            start_block: config.scan.start_block,
        }
    }

    /// Best `limit` asks for a property.
    pub async fn asks(
        &self,
        property_id: U256,
        limit: usize,
    ) -> anyhow::Result<Vec<OrderBookEntry>> {
        let listings = self.listings(property_id).await?;
        let asks = active_asks(listings.into_values(), limit);
        debug!(property_id = %property_id, asks = asks.len(), "order book rebuilt");
        Ok(asks)
    }

    /// Every listing ever created for the property, with fills and cancels applied.
    pub async fn listings(&self, property_id: U256) -> anyhow::Result<BTreeMap<U256, Listing>> {
        let latest = self.reader.block_number().await?;

        let created_query = LogQuery::new(self.marketplace, abi::LISTING_CREATED_TOPIC)
            .topic2(u256_topic(property_id))
            .range(self.start_block, latest);

        let mut listings: BTreeMap<U256, Listing> = BTreeMap::new();
        for created in self.reader.events(&created_query).await {
            if let MarketEvent::ListingCreated {
                listing_id,
                property_id: pid,
                seller,
                amount,
                price_per_share_wei,
            } = created.event
            {
                if pid != property_id {
                    continue;
                }
                listings.entry(listing_id).or_insert(Listing {
                    listing_id,
                    property_id: pid,
                    seller,
                    price_per_share_wei,
                    initial_amount: amount,
                    filled: U256::ZERO,
                    cancelled: false,
                    created_block: created.log.block_number,
                });
            }
        }

        for (listing_id, listing) in listings.iter_mut() {
            let id_topic = u256_topic(*listing_id);
            let cancel_query = LogQuery::new(self.marketplace, abi::LISTING_CANCELLED_TOPIC)
                .topic1(id_topic)
                .range(self.start_block, latest);
            let fill_query = LogQuery::new(self.marketplace, abi::LISTING_FILLED_TOPIC)
                .topic1(id_topic)
                .range(self.start_block, latest);

            let (cancels, fills) = futures::future::join(
                self.reader.events(&cancel_query),
                self.reader.events(&fill_query),
            )
            .await;

            listing.cancelled = cancels.iter().any(|c| {
                matches!(
                    c.event,
                    MarketEvent::ListingCancelled { listing_id: id } if id == *listing_id
                )
            });
            for fill in fills {
                if let MarketEvent::ListingFilled {
                    listing_id: id,
                    amount,
                    ..
                } = fill.event
                {
                    if id == *listing_id {
                        listing.apply_fill(amount);
                    }
                }
            }
        }

        Ok(listings)
    }
}
