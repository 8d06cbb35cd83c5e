//! Per-user transaction history rebuilt from marketplace and share-token logs.
//!
//! A windowed scan from the chain tip runs first. If it finds nothing the
//! whole range from the scan floor is replayed, so a user whose only activity
//! predates the window still sees it.

pub mod group;

pub use group::{group_transactions, GroupingPolicy, TxGroup};

use crate::config::{Config, ScanConfig};
use crate::onchain::abi;
use crate::onchain::decode::MarketEvent;
use crate::onchain::source::{address_topic, ListingState};
use crate::onchain::{ChainReader, DecodedLog, LogPosition, LogQuery, PropertyInfo};
use crate::units::{serialize_opt_u256, serialize_u256};
use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Buy,
    Sell,
    List,
    Claim,
    Mint,
    Receive,
    Send,
}

impl TxKind {
    pub fn is_trade(self) -> bool {
        matches!(self, TxKind::Buy | TxKind::Sell | TxKind::List)
    }

    pub fn is_transfer(self) -> bool {
        matches!(self, TxKind::Mint | TxKind::Receive | TxKind::Send)
    }
}

impl std::fmt::Display for TxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxKind::Buy => "buy",
            TxKind::Sell => "sell",
            TxKind::List => "list",
            TxKind::Claim => "claim",
            TxKind::Mint => "mint",
            TxKind::Receive => "receive",
            TxKind::Send => "send",
        };
        f.write_str(s)
    }
}

/// One normalized history row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionEvent {
    #[serde(rename = "type")]
    pub kind: TxKind,
    /// `None` when a fill's listing could not be read back.
    #[serde(serialize_with = "serialize_opt_u256")]
    pub property_id: Option<U256>,
    pub user: Address,
    #[serde(serialize_with = "serialize_u256")]
    pub amount: U256,
    #[serde(serialize_with = "serialize_opt_u256")]
    pub price: Option<U256>,
    pub tx_hash: B256,
    pub block_number: u64,
    pub transaction_index: u64,
    pub log_index: u64,
    /// Block time in seconds.
    pub timestamp: Option<u64>,
}

impl TransactionEvent {
    fn from_log(kind: TxKind, log: &DecodedLog, user: Address) -> Self {
        Self {
            kind,
            property_id: None,
            user,
            amount: U256::ZERO,
            price: None,
            tx_hash: log.log.transaction_hash,
            block_number: log.log.block_number,
            transaction_index: log.log.transaction_index,
            log_index: log.log.log_index,
            timestamp: None,
        }
    }

    pub fn position(&self) -> LogPosition {
        LogPosition {
            block_number: self.block_number,
            transaction_index: self.transaction_index,
            log_index: self.log_index,
        }
    }
}

/// Most recent first: descending (block, transaction index, log index).
pub fn sort_most_recent_first(events: &mut [TransactionEvent]) {
    events.sort_by(|a, b| b.position().cmp(&a.position()));
}

/// Classify a share-token transfer from the user's point of view.
pub fn classify_transfer(from: Address, to: Address, user: Address) -> TxKind {
    if from == Address::ZERO {
        TxKind::Mint
    } else if to == user {
        TxKind::Receive
    } else {
        TxKind::Send
    }
}

pub struct HistoryReader {
    reader: ChainReader,
    marketplace: Address,
    scan: ScanConfig,
}

impl HistoryReader {
    pub fn new(reader: ChainReader, config: &Config) -> Self {
        Self {
            reader,
            marketplace: config.chain.marketplace,
            scan: config.scan.clone(),
        }
    }

    /// Full history for `user`, most recent first, with block timestamps.
    pub async fn transactions(&self, user: Address) -> anyhow::Result<Vec<TransactionEvent>> {
        let latest = self.reader.block_number().await?;
        let floor = self.scan.start_block;
        let from = latest.saturating_sub(self.scan.lookback_blocks).max(floor);

        let mut events = self.scan_range(user, from, latest).await;
        if events.is_empty() && from > floor {
            info!(
                user = %user,
                window_from = from,
                floor = floor,
                "no activity in lookback window, rescanning full range"
            );
            events = self.scan_range(user, floor, latest).await;
        }

        let mut clock = self.reader.clock();
        for e in events.iter_mut() {
            e.timestamp = clock.timestamp(e.block_number).await;
        }

        sort_most_recent_first(&mut events);
        debug!(
            user = %user,
            events = events.len(),
            blocks_timed = clock.cached_blocks(),
            "transaction history rebuilt"
        );
        Ok(events)
    }

    async fn scan_range(&self, user: Address, from: u64, to: u64) -> Vec<TransactionEvent> {
        let user_topic = address_topic(user);
        let market = |topic0| LogQuery::new(self.marketplace, topic0).range(from, to);

        let purchases = self
            .reader
            .events(&market(abi::SHARES_PURCHASED_TOPIC).topic2(user_topic))
            .await;
        let sales = self
            .reader
            .events(&market(abi::SHARES_SOLD_TOPIC).topic2(user_topic))
            .await;
        // Seller is not indexed on ListingCreated, so filter after decoding.
        let created = self
            .reader
            .events(&market(abi::LISTING_CREATED_TOPIC))
            .await;
        let fills = self
            .reader
            .events(&market(abi::LISTING_FILLED_TOPIC).topic2(user_topic))
            .await;
        let claims = self
            .reader
            .events(&market(abi::DIVIDEND_CLAIMED_TOPIC).topic2(user_topic))
            .await;

        let mut events = Vec::new();
        for log in purchases.iter().chain(&sales).chain(&created).chain(&claims) {
            if let Some(e) = normalize_market_event(log, user) {
                events.push(e);
            }
        }

        let mut listing_memo: HashMap<U256, Option<ListingState>> = HashMap::new();
        for log in &fills {
            let MarketEvent::ListingFilled {
                listing_id,
                buyer,
                amount,
            } = log.event
            else {
                continue;
            };
            if buyer != user {
                continue;
            }
            let mut event = TransactionEvent::from_log(TxKind::Buy, log, user);
            event.amount = amount;
            match self.listing(&mut listing_memo, listing_id).await {
                Some(state) => {
                    event.property_id = Some(state.property_id);
                    event.price = Some(state.price_per_share_wei);
                }
                None => debug!(
                    listing_id = %listing_id,
                    tx = %event.tx_hash,
                    "listing lookup unavailable, keeping fill without property or price"
                ),
            }
            events.push(event);
        }

        events.extend(self.token_transfers(user, from, to).await);
        events
    }

    async fn listing(
        &self,
        memo: &mut HashMap<U256, Option<ListingState>>,
        listing_id: U256,
    ) -> Option<ListingState> {
        if let Some(state) = memo.get(&listing_id) {
            return state.clone();
        }
        let state = match self.reader.source().listing(listing_id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, listing_id = %listing_id, "listing read failed");
                None
            }
        };
        memo.insert(listing_id, state.clone());
        state
    }

    /// Registry properties up to the configured scan bound; empty on failure.
    async fn properties(&self) -> Vec<PropertyInfo> {
        match self
            .reader
            .source()
            .properties(0, self.scan.property_scan_limit)
            .await
        {
            Ok(props) => props,
            Err(e) => {
                warn!(error = %e, "property enumeration failed, skipping token transfers");
                Vec::new()
            }
        }
    }

    async fn token_transfers(&self, user: Address, from: u64, to: u64) -> Vec<TransactionEvent> {
        let user_topic = address_topic(user);
        let mut seen: HashSet<(B256, u64)> = HashSet::new();
        let mut events = Vec::new();

        for prop in self.properties().await {
            if prop.token == Address::ZERO {
                continue;
            }
            let base = LogQuery::new(prop.token, abi::TRANSFER_TOPIC)
                .range(from, to);
            let sent = self.reader.events(&base.clone().topic1(user_topic)).await;
            let received = self.reader.events(&base.topic2(user_topic)).await;

            for log in sent.iter().chain(&received) {
                let MarketEvent::Transfer {
                    from: src,
                    to: dst,
                    value,
                } = log.event
                else {
                    continue;
                };
                // A self-transfer matches both filters.
                if !seen.insert((log.log.transaction_hash, log.log.log_index)) {
                    continue;
                }
                let kind = classify_transfer(src, dst, user);
                let mut event = TransactionEvent::from_log(kind, log, user);
                event.property_id = Some(U256::from(prop.id));
                event.amount = value;
                events.push(event);
            }
        }
        events
    }
}

/// Map a user-scoped marketplace event to a history row.
fn normalize_market_event(log: &DecodedLog, user: Address) -> Option<TransactionEvent> {
    let (kind, property_id, amount, price) = match log.event {
        MarketEvent::SharesPurchased {
            property_id,
            buyer,
            amount,
            price_per_share_wei,
        } => {
            if buyer != user {
                return None;
            }
            (TxKind::Buy, property_id, amount, Some(price_per_share_wei))
        }
        MarketEvent::SharesSold {
            property_id,
            seller,
            amount,
            price,
        } => {
            if seller != user {
                return None;
            }
            (TxKind::Sell, property_id, amount, Some(price))
        }
        MarketEvent::ListingCreated {
            property_id,
            seller,
            amount,
            price_per_share_wei,
            ..
        } => {
            if seller != user {
                return None;
            }
            (TxKind::List, property_id, amount, Some(price_per_share_wei))
        }
        MarketEvent::DividendClaimed {
            property_id,
            account,
            amount_wei,
        } => {
            if account != user {
                return None;
            }
            (TxKind::Claim, property_id, amount_wei, None)
        }
        _ => return None,
    };
    let mut event = TransactionEvent::from_log(kind, log, user);
    event.property_id = Some(property_id);
    event.amount = amount;
    event.price = price;
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onchain::decode::encode;
    use crate::onchain::memory::MemoryChain;
    use alloy::primitives::address;
    use std::sync::Arc;

    const MARKET: Address = address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512");
    const TOKEN: Address = address!("9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0");
    const SELLER_A: Address = address!("000000000000000000000000000000000000000a");
    const USER_B: Address = address!("000000000000000000000000000000000000000b");
    const ONE_CENT: u128 = 10_000_000_000_000_000;

    fn reader_for(chain: MemoryChain, lookback: u64) -> HistoryReader {
        let mut config = Config::default();
        config.chain.marketplace = MARKET;
        config.scan.lookback_blocks = lookback;
        HistoryReader::new(ChainReader::new(Arc::new(chain)), &config)
    }

    fn event(block: u64, tx: u64, log: u64) -> TransactionEvent {
        TransactionEvent {
            kind: TxKind::Buy,
            property_id: None,
            user: USER_B,
            amount: U256::from(1),
            price: None,
            tx_hash: MemoryChain::tx_hash(block, tx),
            block_number: block,
            transaction_index: tx,
            log_index: log,
            timestamp: None,
        }
    }

    #[test]
    fn test_same_tx_higher_log_index_sorts_first() {
        let mut events = vec![event(10, 2, 4), event(10, 2, 7), event(9, 5, 9), event(10, 3, 0)];
        sort_most_recent_first(&mut events);
        let keys: Vec<(u64, u64, u64)> = events
            .iter()
            .map(|e| (e.block_number, e.transaction_index, e.log_index))
            .collect();
        assert_eq!(keys, vec![(10, 3, 0), (10, 2, 7), (10, 2, 4), (9, 5, 9)]);
    }

    #[test]
    fn test_classify_transfer() {
        assert_eq!(classify_transfer(Address::ZERO, USER_B, USER_B), TxKind::Mint);
        assert_eq!(classify_transfer(SELLER_A, USER_B, USER_B), TxKind::Receive);
        assert_eq!(classify_transfer(USER_B, SELLER_A, USER_B), TxKind::Send);
    }

    #[tokio::test]
    async fn test_purchase_and_mint_share_a_transaction() {
        let mut chain = MemoryChain::new();
        chain.add_property(TOKEN);
        chain.push_tx(
            12,
            0,
            vec![
                encode::transfer(TOKEN, Address::ZERO, USER_B, 10),
                encode::shares_purchased(MARKET, 7, USER_B, 10, ONE_CENT),
            ],
        );
        chain.set_tip(20);

        let history = reader_for(chain, 1_000).transactions(USER_B).await.unwrap();
        let kinds: Vec<TxKind> = history.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![TxKind::Buy, TxKind::Mint]);
        assert!(history.iter().all(|e| e.tx_hash == MemoryChain::tx_hash(12, 0)));
        assert!(history.iter().all(|e| e.timestamp == Some(MemoryChain::time_of(12))));
        assert_eq!(history[0].price, Some(U256::from(ONE_CENT)));
        assert_eq!(history[0].property_id, Some(U256::from(7)));

        let groups = group_transactions(&history, &GroupingPolicy::default());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].primary.kind, TxKind::Buy);
        assert_eq!(groups[0].events.len(), 2);
        assert!(groups[0].events.iter().any(|e| e.kind == TxKind::Mint));
    }

    #[tokio::test]
    async fn test_all_event_kinds_collected() {
        let mut chain = MemoryChain::new();
        chain.add_property(TOKEN);
        chain.push(2, encode::listing_created(MARKET, 1, 0, SELLER_A, 50, ONE_CENT));
        chain.push(3, encode::listing_created(MARKET, 2, 0, USER_B, 5, 2 * ONE_CENT));
        chain.push(4, encode::listing_filled(MARKET, 1, USER_B, 20));
        chain.push(5, encode::shares_sold(MARKET, 0, USER_B, 3, ONE_CENT));
        chain.push(6, encode::dividend_claimed(MARKET, 0, USER_B, 777));
        chain.push(7, encode::transfer(TOKEN, USER_B, SELLER_A, 1));
        chain.push(8, encode::transfer(TOKEN, SELLER_A, USER_B, 2));
        chain.set_listing(
            1,
            ListingState {
                property_id: U256::ZERO,
                seller: SELLER_A,
                amount: U256::from(30),
                price_per_share_wei: U256::from(ONE_CENT),
                active: true,
            },
        );

        let history = reader_for(chain, 1_000).transactions(USER_B).await.unwrap();
        let kinds: Vec<TxKind> = history.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TxKind::Receive,
                TxKind::Send,
                TxKind::Claim,
                TxKind::Sell,
                TxKind::Buy,
                TxKind::List
            ]
        );
        let fill = &history[4];
        assert_eq!(fill.amount, U256::from(20));
        assert_eq!(fill.property_id, Some(U256::ZERO));
        assert_eq!(fill.price, Some(U256::from(ONE_CENT)));
        assert_eq!(history[2].amount, U256::from(777));
        assert_eq!(history[2].price, None);
    }

    #[tokio::test]
    async fn test_self_transfer_reported_once() {
        let mut chain = MemoryChain::new();
        chain.add_property(TOKEN);
        chain.push(3, encode::transfer(TOKEN, USER_B, USER_B, 4));

        let history = reader_for(chain, 1_000).transactions(USER_B).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, TxKind::Receive);
        assert_eq!(history[0].property_id, Some(U256::ZERO));
    }

    #[tokio::test]
    async fn test_fill_kept_when_listing_lookup_fails() {
        let mut chain = MemoryChain::new();
        chain.push(4, encode::listing_filled(MARKET, 9, USER_B, 20));
        chain.fail_listing(9);

        let history = reader_for(chain, 1_000).transactions(USER_B).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, TxKind::Buy);
        assert_eq!(history[0].property_id, None);
        assert_eq!(history[0].price, None);
    }

    #[tokio::test]
    async fn test_empty_window_falls_back_to_full_scan() {
        let mut chain = MemoryChain::new();
        chain.push(5, encode::shares_purchased(MARKET, 1, USER_B, 10, ONE_CENT));
        chain.set_tip(10_000);

        let history = reader_for(chain, 100).transactions(USER_B).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].block_number, 5);
    }

    #[tokio::test]
    async fn test_window_hit_skips_full_scan() {
        let mut chain = MemoryChain::new();
        chain.push(5, encode::shares_purchased(MARKET, 1, USER_B, 10, ONE_CENT));
        chain.push(9_950, encode::shares_purchased(MARKET, 1, USER_B, 1, ONE_CENT));
        chain.set_tip(10_000);

        let history = reader_for(chain, 100).transactions(USER_B).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].block_number, 9_950);
    }

    #[tokio::test]
    async fn test_no_events_is_empty_not_error() {
        let history = reader_for(MemoryChain::new(), 100)
            .transactions(USER_B)
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_registry_failure_still_returns_market_events() {
        let mut chain = MemoryChain::new();
        chain.push(5, encode::shares_purchased(MARKET, 1, USER_B, 10, ONE_CENT));
        chain.fail_properties();

        let history = reader_for(chain, 1_000).transactions(USER_B).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_no_provider_propagates() {
        let mut chain = MemoryChain::new();
        chain.fail_block_number();
        assert!(reader_for(chain, 100).transactions(USER_B).await.is_err());
    }
}
