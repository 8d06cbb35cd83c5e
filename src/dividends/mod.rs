//! Dividend deposit/claim ledger per property.
//!
//! A raw log view, not a balance: pending claimable amounts come from a
//! contract read, never from summing these rows.

use crate::config::Config;
use crate::onchain::abi;
use crate::onchain::decode::MarketEvent;
use crate::onchain::source::{address_topic, u256_topic};
use crate::onchain::{ChainReader, LogPosition, LogQuery};
use crate::units::serialize_u256;
use alloy::primitives::{Address, B256, U256};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DividendKind {
    Deposit,
    Claim,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DividendEvent {
    #[serde(rename = "type")]
    pub kind: DividendKind,
    #[serde(serialize_with = "serialize_u256")]
    pub property_id: U256,
    /// Claimer; deposits are property-wide and carry none.
    pub account: Option<Address>,
    #[serde(serialize_with = "serialize_u256")]
    pub amount_wei: U256,
    pub tx_hash: B256,
    pub block_number: u64,
    pub transaction_index: u64,
    pub log_index: u64,
    pub timestamp: Option<u64>,
}

impl DividendEvent {
    fn position(&self) -> LogPosition {
        LogPosition {
            block_number: self.block_number,
            transaction_index: self.transaction_index,
            log_index: self.log_index,
        }
    }
}

pub struct DividendReader {
    reader: ChainReader,
    marketplace: Address,
    start_block: u64,
}

impl DividendReader {
    pub fn new(reader: ChainReader, config: &Config) -> Self {
        Self {
            reader,
            marketplace: config.chain.marketplace,
            start_block: config.scan.start_block,
        }
    }

    /// Deposits into, and `account`'s claims from, each property. Newest first.
    pub async fn history(
        &self,
        account: Address,
        property_ids: &[U256],
    ) -> anyhow::Result<Vec<DividendEvent>> {
        let latest = self.reader.block_number().await?;
        let mut events = Vec::new();

        for property_id in property_ids {
            let pid_topic = u256_topic(*property_id);
            let deposits = LogQuery::new(self.marketplace, abi::DIVIDENDS_DEPOSITED_TOPIC)
                .topic1(pid_topic)
                .range(self.start_block, latest);
            let claims = LogQuery::new(self.marketplace, abi::DIVIDEND_CLAIMED_TOPIC)
                .topic1(pid_topic)
                .topic2(address_topic(account))
                .range(self.start_block, latest);

            let logs = self
                .reader
                .events(&deposits)
                .await
                .into_iter()
                .chain(self.reader.events(&claims).await);

            for log in logs {
                let (kind, pid, who, amount_wei) = match log.event {
                    MarketEvent::DividendsDeposited {
                        property_id,
                        amount_wei,
                    } => (DividendKind::Deposit, property_id, None, amount_wei),
                    MarketEvent::DividendClaimed {
                        property_id,
                        account: who,
                        amount_wei,
                    } if who == account => {
                        (DividendKind::Claim, property_id, Some(who), amount_wei)
                    }
                    _ => continue,
                };
                if pid != *property_id {
                    continue;
                }
                events.push(DividendEvent {
                    kind,
                    property_id: pid,
                    account: who,
                    amount_wei,
                    tx_hash: log.log.transaction_hash,
                    block_number: log.log.block_number,
                    transaction_index: log.log.transaction_index,
                    log_index: log.log.log_index,
                    timestamp: None,
                });
            }
        }

        let mut clock = self.reader.clock();
        for e in events.iter_mut() {
            e.timestamp = clock.timestamp(e.block_number).await;
        }
        events.sort_by(|a, b| b.position().cmp(&a.position()));

        debug!(account = %account, events = events.len(), "dividend history rebuilt");
        Ok(events)
    }
}
