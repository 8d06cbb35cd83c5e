//! JSON-RPC implementation of `ChainSource` over an alloy HTTP provider.

use crate::config::{ChainConfig, ScanConfig};
use crate::onchain::source::{ChainSource, ListingState, LogQuery, PropertyInfo, RawLog};
use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::sol;
use async_trait::async_trait;
use tracing::{debug, info};

sol! {
    #[sol(rpc)]
    interface IMarketplace {
        function listings(uint256 listingId) external view returns (
            uint256 propertyId,
            address seller,
            uint256 amount,
            uint256 pricePerShareWei,
            bool active
        );

        function activeListedSupply(uint256 propertyId) external view returns (uint256);
    }

    #[sol(rpc)]
    interface IPropertyRegistry {
        struct Property {
            string metadataURI;
            address fractionalToken;
            uint256 totalShares;
            uint256 sharePriceWei;
            bool active;
        }

        function getAllProperties(uint256 start, uint256 count)
            external
            view
            returns (Property[] memory);
    }

    #[sol(rpc)]
    interface IShareToken {
        function balanceOf(address account) external view returns (uint256);
        function totalSupply() external view returns (uint256);
    }
}

pub struct RpcChain {
    provider: RootProvider,
    registry: Address,
    marketplace: Address,
    /// Max blocks per eth_getLogs request; 0 disables chunking.
    chunk_blocks: u64,
}

impl RpcChain {
    /// Connect over HTTP and make sure the node answers.
    pub async fn connect(chain: &ChainConfig, scan: &ScanConfig) -> anyhow::Result<Self> {
        let provider = RootProvider::new_http(chain.rpc_url.parse()?);
        let block = provider.get_block_number().await?;
        info!(url = %chain.rpc_url, block = block, "connected to JSON-RPC node");
        Ok(Self {
            provider,
            registry: chain.registry,
            marketplace: chain.marketplace,
            chunk_blocks: scan.log_chunk_blocks,
        })
    }

    fn filter(query: &LogQuery) -> Filter {
        let mut filter = Filter::new()
            .address(query.address)
            .event_signature(query.topic0);
        if let Some(t) = query.topics[0] {
            filter = filter.topic1(t);
        }
        if let Some(t) = query.topics[1] {
            filter = filter.topic2(t);
        }
        if let Some(t) = query.topics[2] {
            filter = filter.topic3(t);
        }
        filter
    }
}

#[async_trait]
impl ChainSource for RpcChain {
    async fn block_number(&self) -> anyhow::Result<u64> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn block_timestamp(&self, block_number: u64) -> anyhow::Result<Option<u64>> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(block_number))
            .await?;
        Ok(block.map(|b| b.header.timestamp))
    }

    /// Query logs, split into chunks when the provider limits block ranges.
    async fn logs(&self, query: &LogQuery) -> anyhow::Result<Vec<RawLog>> {
        let base = Self::filter(query);
        let (from, to) = (query.from_block, query.to_block);
        let chunk = if self.chunk_blocks == 0 { u64::MAX } else { self.chunk_blocks };

        let mut all_logs = Vec::new();
        let mut start = from;
        while start <= to {
            let end = start.saturating_add(chunk - 1).min(to);
            let filter = base.clone().from_block(start).to_block(end);
            let logs = self.provider.get_logs(&filter).await?;
            debug!(from = start, to = end, logs = logs.len(), "eth_getLogs");
            all_logs.extend(logs.iter().map(raw_log));
            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }
        Ok(all_logs)
    }

    async fn listing(&self, listing_id: U256) -> anyhow::Result<Option<ListingState>> {
        let market = IMarketplace::new(self.marketplace, self.provider.clone());
        let l = market.listings(listing_id).call().await?;
        // Unset mapping slots come back zeroed.
        if l.seller == Address::ZERO {
            return Ok(None);
        }
        Ok(Some(ListingState {
            property_id: l.propertyId,
            seller: l.seller,
            amount: l.amount,
            price_per_share_wei: l.pricePerShareWei,
            active: l.active,
        }))
    }

    async fn listed_supply(&self, property_id: U256) -> anyhow::Result<U256> {
        let market = IMarketplace::new(self.marketplace, self.provider.clone());
        Ok(market.activeListedSupply(property_id).call().await?)
    }

    async fn properties(&self, start: u64, count: u64) -> anyhow::Result<Vec<PropertyInfo>> {
        let registry = IPropertyRegistry::new(self.registry, self.provider.clone());
        let props = registry
            .getAllProperties(U256::from(start), U256::from(count))
            .call()
            .await?;
        Ok(props
            .into_iter()
            .enumerate()
            .map(|(idx, p)| PropertyInfo {
                id: start + idx as u64,
                metadata_uri: p.metadataURI,
                token: p.fractionalToken,
                total_shares: p.totalShares,
                share_price_wei: p.sharePriceWei,
                active: p.active,
            })
            .collect())
    }

    async fn token_balance(&self, token: Address, account: Address) -> anyhow::Result<U256> {
        let erc20 = IShareToken::new(token, self.provider.clone());
        Ok(erc20.balanceOf(account).call().await?)
    }

    async fn token_supply(&self, token: Address) -> anyhow::Result<U256> {
        let erc20 = IShareToken::new(token, self.provider.clone());
        Ok(erc20.totalSupply().call().await?)
    }
}

fn raw_log(log: &Log) -> RawLog {
    RawLog {
        address: log.address(),
        topics: log.topics().to_vec(),
        data: log.data().data.clone(),
        block_number: log.block_number.unwrap_or(0),
        transaction_hash: log.transaction_hash.unwrap_or_default(),
        transaction_index: log.transaction_index.unwrap_or(0),
        log_index: log.log_index.unwrap_or(0),
    }
}
