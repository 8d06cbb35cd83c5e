//! The chain access seam.
//!
//! Reconstructors only see `ChainSource`. The JSON-RPC implementation
//! lives in `rpc`; an indexed or checkpointed backend can replace it
//! without touching the replay logic.

use crate::units::serialize_u256;
use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::Serialize;

/// A log as returned by `eth_getLogs`, reduced to what replay needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub log_index: u64,
}

/// One `eth_getLogs` filter: a single contract, a single event, optional
/// indexed-argument matches, and an inclusive block range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    pub topic0: B256,
    /// Matches for topics[1..=3]; `None` is a wildcard.
    pub topics: [Option<B256>; 3],
    pub from_block: u64,
    pub to_block: u64,
}

impl LogQuery {
    pub fn new(address: Address, topic0: B256) -> Self {
        Self {
            address,
            topic0,
            topics: [None, None, None],
            from_block: 0,
            to_block: 0,
        }
    }

    pub fn topic1(mut self, value: B256) -> Self {
        self.topics[0] = Some(value);
        self
    }

    pub fn topic2(mut self, value: B256) -> Self {
        self.topics[1] = Some(value);
        self
    }

    pub fn range(mut self, from_block: u64, to_block: u64) -> Self {
        self.from_block = from_block;
        self.to_block = to_block;
        self
    }

    /// Whether `log` would be returned by this filter.
    pub fn matches(&self, log: &RawLog) -> bool {
        if log.address != self.address || log.topics.first() != Some(&self.topic0) {
            return false;
        }
        if log.block_number < self.from_block || log.block_number > self.to_block {
            return false;
        }
        self.topics.iter().enumerate().all(|(i, want)| match want {
            Some(w) => log.topics.get(i + 1) == Some(w),
            None => true,
        })
    }
}

/// `listings(listingId)` read on the marketplace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingState {
    pub property_id: U256,
    pub seller: Address,
    pub amount: U256,
    pub price_per_share_wei: U256,
    pub active: bool,
}

/// One registry entry from `getAllProperties(start, count)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyInfo {
    pub id: u64,
    pub metadata_uri: String,
    pub token: Address,
    #[serde(serialize_with = "serialize_u256")]
    pub total_shares: U256,
    #[serde(serialize_with = "serialize_u256")]
    pub share_price_wei: U256,
    pub active: bool,
}

/// Reads the reconstructors need from an EVM chain.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn block_number(&self) -> anyhow::Result<u64>;

    /// Block timestamp in seconds, `None` if the node does not know the block.
    async fn block_timestamp(&self, block_number: u64) -> anyhow::Result<Option<u64>>;

    async fn logs(&self, query: &LogQuery) -> anyhow::Result<Vec<RawLog>>;

    /// Marketplace `listings(listingId)`; `None` if the slot is empty.
    async fn listing(&self, listing_id: U256) -> anyhow::Result<Option<ListingState>>;

    /// Marketplace `activeListedSupply(propertyId)`: shares held in escrow by
    /// open listings.
    async fn listed_supply(&self, property_id: U256) -> anyhow::Result<U256>;

    /// Registry `getAllProperties(start, count)`.
    async fn properties(&self, start: u64, count: u64) -> anyhow::Result<Vec<PropertyInfo>>;

    async fn token_balance(&self, token: Address, account: Address) -> anyhow::Result<U256>;

    async fn token_supply(&self, token: Address) -> anyhow::Result<U256>;
}

/// Left-pad an address into an indexed topic.
pub fn address_topic(address: Address) -> B256 {
    B256::left_padding_from(address.as_slice())
}

/// Encode a uint256 as an indexed topic.
pub fn u256_topic(value: U256) -> B256 {
    B256::from(value.to_be_bytes::<32>())
}
