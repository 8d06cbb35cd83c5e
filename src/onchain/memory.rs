//! In-memory `ChainSource` for tests.
//!
//! Serves logs with the same filter semantics as `eth_getLogs`, returns them
//! in insertion order, and can be told to fail specific reads.

use crate::onchain::source::{ChainSource, ListingState, LogQuery, PropertyInfo, RawLog};
use alloy::primitives::{Address, B256, U256};
use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
pub struct MemoryChain {
    tip: u64,
    logs: Vec<RawLog>,
    next_log_index: HashMap<u64, u64>,
    listings: HashMap<U256, ListingState>,
    properties: Vec<PropertyInfo>,
    balances: HashMap<(Address, Address), U256>,
    supplies: HashMap<Address, U256>,
    listed_supply: HashMap<U256, U256>,
    failing_topics: HashSet<B256>,
    failing_listings: HashSet<U256>,
    failing_tokens: HashSet<Address>,
    fail_block_number: bool,
    fail_properties: bool,
    fail_listed_supply: bool,
    log_queries: AtomicUsize,
    timestamp_lookups: AtomicUsize,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic block time used by the fake chain.
    pub fn time_of(block_number: u64) -> u64 {
        1_700_000_000 + block_number * 12
    }

    pub fn tx_hash(block_number: u64, transaction_index: u64) -> B256 {
        let mut bytes = [0u8; 32];
        bytes[16..24].copy_from_slice(&block_number.to_be_bytes());
        bytes[24..32].copy_from_slice(&transaction_index.to_be_bytes());
        B256::from(bytes)
    }

    pub fn set_tip(&mut self, tip: u64) {
        self.tip = tip;
    }

    /// Append a log as the sole log of its own transaction in `block_number`.
    pub fn push(&mut self, block_number: u64, log: RawLog) {
        let tx_index = self
            .logs
            .iter()
            .filter(|l| l.block_number == block_number)
            .map(|l| l.transaction_index + 1)
            .max()
            .unwrap_or(0);
        self.push_tx(block_number, tx_index, vec![log]);
    }

    /// Append several logs emitted by one transaction, in emission order.
    pub fn push_tx(&mut self, block_number: u64, transaction_index: u64, logs: Vec<RawLog>) {
        for mut log in logs {
            let next = self.next_log_index.entry(block_number).or_insert(0);
            log.block_number = block_number;
            log.transaction_index = transaction_index;
            log.transaction_hash = Self::tx_hash(block_number, transaction_index);
            log.log_index = *next;
            *next += 1;
            self.tip = self.tip.max(block_number);
            self.logs.push(log);
        }
    }

    /// Insert a fully specified log (positions untouched).
    pub fn push_raw(&mut self, log: RawLog) {
        self.tip = self.tip.max(log.block_number);
        self.logs.push(log);
    }

    pub fn set_listing(&mut self, listing_id: u64, state: ListingState) {
        self.listings.insert(U256::from(listing_id), state);
    }

    pub fn add_property(&mut self, token: Address) -> u64 {
        let id = self.properties.len() as u64;
        self.properties.push(PropertyInfo {
            id,
            metadata_uri: format!("ipfs://property-{id}"),
            token,
            total_shares: U256::from(1_000),
            share_price_wei: U256::from(10_000_000_000_000_000u128),
            active: true,
        });
        id
    }

    pub fn set_balance(&mut self, token: Address, account: Address, balance: u64) {
        self.balances.insert((token, account), U256::from(balance));
    }

    pub fn set_supply(&mut self, token: Address, supply: u64) {
        self.supplies.insert(token, U256::from(supply));
    }

    pub fn set_listed_supply(&mut self, property_id: u64, amount: u64) {
        self.listed_supply
            .insert(U256::from(property_id), U256::from(amount));
    }

    pub fn fail_listed_supply(&mut self) {
        self.fail_listed_supply = true;
    }

    pub fn fail_topic(&mut self, topic0: B256) {
        self.failing_topics.insert(topic0);
    }

    pub fn fail_listing(&mut self, listing_id: u64) {
        self.failing_listings.insert(U256::from(listing_id));
    }

    pub fn fail_token(&mut self, token: Address) {
        self.failing_tokens.insert(token);
    }

    pub fn fail_block_number(&mut self) {
        self.fail_block_number = true;
    }

    pub fn fail_properties(&mut self) {
        self.fail_properties = true;
    }

    pub fn log_queries(&self) -> usize {
        self.log_queries.load(Ordering::SeqCst)
    }

    pub fn timestamp_lookups(&self) -> usize {
        self.timestamp_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainSource for MemoryChain {
    async fn block_number(&self) -> anyhow::Result<u64> {
        if self.fail_block_number {
            return Err(anyhow!("no provider"));
        }
        Ok(self.tip)
    }

    async fn block_timestamp(&self, block_number: u64) -> anyhow::Result<Option<u64>> {
        self.timestamp_lookups.fetch_add(1, Ordering::SeqCst);
        if block_number > self.tip {
            return Ok(None);
        }
        Ok(Some(Self::time_of(block_number)))
    }

    async fn logs(&self, query: &LogQuery) -> anyhow::Result<Vec<RawLog>> {
        self.log_queries.fetch_add(1, Ordering::SeqCst);
        if self.failing_topics.contains(&query.topic0) {
            return Err(anyhow!("eth_getLogs failed"));
        }
        Ok(self
            .logs
            .iter()
            .filter(|l| query.matches(l))
            .cloned()
            .collect())
    }

    async fn listing(&self, listing_id: U256) -> anyhow::Result<Option<ListingState>> {
        if self.failing_listings.contains(&listing_id) {
            return Err(anyhow!("eth_call reverted"));
        }
        Ok(self.listings.get(&listing_id).cloned())
    }

    async fn listed_supply(&self, property_id: U256) -> anyhow::Result<U256> {
        if self.fail_listed_supply {
            return Err(anyhow!("activeListedSupply reverted"));
        }
        Ok(self
            .listed_supply
            .get(&property_id)
            .copied()
            .unwrap_or_default())
    }

    async fn properties(&self, start: u64, count: u64) -> anyhow::Result<Vec<PropertyInfo>> {
        if self.fail_properties {
            return Err(anyhow!("registry unavailable"));
        }
        Ok(self
            .properties
            .iter()
            .skip(start as usize)
            .take(count as usize)
            .cloned()
            .collect())
    }

    async fn token_balance(&self, token: Address, account: Address) -> anyhow::Result<U256> {
        if self.failing_tokens.contains(&token) {
            return Err(anyhow!("balanceOf reverted"));
        }
        Ok(self
            .balances
            .get(&(token, account))
            .copied()
            .unwrap_or_default())
    }

    async fn token_supply(&self, token: Address) -> anyhow::Result<U256> {
        if self.failing_tokens.contains(&token) {
            return Err(anyhow!("totalSupply reverted"));
        }
        Ok(self.supplies.get(&token).copied().unwrap_or_default())
    }
}
