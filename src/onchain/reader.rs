//! Chain reader used by every reconstructor.
//!
//! Log queries never fail: a degenerate range returns nothing without a
//! round-trip, and an RPC error is logged and treated as an empty result.
//! Reading the chain tip does fail, since nothing can be replayed without it.

use crate::onchain::decode::{self, MarketEvent};
use crate::onchain::source::{ChainSource, LogQuery, RawLog};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Position of a log in the chain. Orders logs by emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogPosition {
    pub block_number: u64,
    pub transaction_index: u64,
    pub log_index: u64,
}

impl LogPosition {
    pub fn of(log: &RawLog) -> Self {
        Self {
            block_number: log.block_number,
            transaction_index: log.transaction_index,
            log_index: log.log_index,
        }
    }
}

/// A decoded event together with the raw log it came from.
#[derive(Debug, Clone)]
pub struct DecodedLog {
    pub event: MarketEvent,
    pub log: RawLog,
}

impl DecodedLog {
    pub fn position(&self) -> LogPosition {
        LogPosition::of(&self.log)
    }
}

#[derive(Clone)]
pub struct ChainReader {
    source: Arc<dyn ChainSource>,
}

impl ChainReader {
    pub fn new(source: Arc<dyn ChainSource>) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &dyn ChainSource {
        self.source.as_ref()
    }

    /// Current chain tip. Propagates: no reconstruction without a provider.
    pub async fn block_number(&self) -> anyhow::Result<u64> {
        self.source.block_number().await
    }

    /// Raw logs for one filter; errors and `from > to` yield an empty set.
    pub async fn logs(&self, query: &LogQuery) -> Vec<RawLog> {
        if query.from_block > query.to_block {
            debug!(
                from = query.from_block,
                to = query.to_block,
                "degenerate block range, skipping log query"
            );
            return Vec::new();
        }
        match self.source.logs(query).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!(
                    error = %e,
                    address = %query.address,
                    topic = %query.topic0,
                    from = query.from_block,
                    to = query.to_block,
                    "log query failed, treating as empty"
                );
                Vec::new()
            }
        }
    }

    /// Logs for one filter, decoded. Undecodable logs are dropped by the decoder.
    pub async fn events(&self, query: &LogQuery) -> Vec<DecodedLog> {
        self.logs(query)
            .await
            .into_iter()
            .filter_map(|log| decode::decode(&log).map(|event| DecodedLog { event, log }))
            .collect()
    }

    /// A fresh timestamp memo for one reconstruction call.
    pub fn clock(&self) -> BlockClock<'_> {
        BlockClock {
            reader: self,
            cache: HashMap::new(),
        }
    }
}

/// Block timestamp lookups memoized for the lifetime of one call.
///
/// Dropped with the call, so a reorg between calls never serves a stale time.
pub struct BlockClock<'a> {
    reader: &'a ChainReader,
    cache: HashMap<u64, Option<u64>>,
}

impl BlockClock<'_> {
    /// Timestamp in seconds; `None` when the block or the lookup is unavailable.
    pub async fn timestamp(&mut self, block_number: u64) -> Option<u64> {
        if let Some(ts) = self.cache.get(&block_number) {
            return *ts;
        }
        let ts = match self.reader.source.block_timestamp(block_number).await {
            Ok(ts) => ts,
            Err(e) => {
                warn!(error = %e, block = block_number, "block timestamp lookup failed");
                None
            }
        };
        self.cache.insert(block_number, ts);
        ts
    }

    pub fn cached_blocks(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onchain::abi;
    use crate::onchain::decode::encode;
    use crate::onchain::memory::MemoryChain;
    use alloy::primitives::{address, Address};

    const MARKET: Address = address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512");
    const SELLER: Address = address!("00000000000000000000000000000000000000aa");

    fn chain_with_listing() -> MemoryChain {
        let mut chain = MemoryChain::new();
        chain.push(10, encode::listing_created(MARKET, 1, 7, SELLER, 5, 100));
        chain.set_tip(20);
        chain
    }

    #[tokio::test]
    async fn test_degenerate_range_returns_empty_without_query() {
        let chain = Arc::new(chain_with_listing());
        let reader = ChainReader::new(chain.clone());
        let query = LogQuery::new(MARKET, abi::LISTING_CREATED_TOPIC).range(15, 3);
        assert!(reader.logs(&query).await.is_empty());
        assert_eq!(chain.log_queries(), 0);
    }

    #[tokio::test]
    async fn test_failed_query_is_absorbed() {
        let mut chain = chain_with_listing();
        chain.fail_topic(abi::LISTING_CREATED_TOPIC);
        let reader = ChainReader::new(Arc::new(chain));
        let query = LogQuery::new(MARKET, abi::LISTING_CREATED_TOPIC).range(0, 20);
        assert!(reader.events(&query).await.is_empty());
    }

    #[tokio::test]
    async fn test_block_number_failure_propagates() {
        let mut chain = chain_with_listing();
        chain.fail_block_number();
        let reader = ChainReader::new(Arc::new(chain));
        assert!(reader.block_number().await.is_err());
    }

    #[tokio::test]
    async fn test_clock_memoizes_per_block() {
        let chain = Arc::new(chain_with_listing());
        let reader = ChainReader::new(chain.clone());
        let mut clock = reader.clock();
        assert_eq!(clock.timestamp(10).await, Some(MemoryChain::time_of(10)));
        assert_eq!(clock.timestamp(10).await, Some(MemoryChain::time_of(10)));
        assert_eq!(clock.timestamp(11).await, Some(MemoryChain::time_of(11)));
        assert_eq!(chain.timestamp_lookups(), 2);
        assert_eq!(clock.cached_blocks(), 2);

        // A new clock starts cold.
        let mut fresh = reader.clock();
        fresh.timestamp(10).await;
        assert_eq!(chain.timestamp_lookups(), 3);
    }

    #[test]
    fn test_log_position_orders_by_block_then_tx_then_log() {
        let at = |block_number, transaction_index, log_index| LogPosition {
            block_number,
            transaction_index,
            log_index,
        };
        let (a, b, c) = (at(5, 2, 9), at(5, 3, 0), at(6, 0, 0));
        assert!(a < b && b < c);
    }
}
