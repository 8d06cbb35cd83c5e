//! Share-token positions: per-account balances, per-property top holders and
//! the ownership split of a property.

use crate::config::Config;
use crate::onchain::abi;
use crate::onchain::decode::MarketEvent;
use crate::onchain::{ChainReader, LogQuery, PropertyInfo};
use crate::units::serialize_u256;
use alloy::primitives::{Address, U256};
use anyhow::{anyhow, Context};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Holding {
    pub property_id: u64,
    pub token: Address,
    #[serde(serialize_with = "serialize_u256")]
    pub balance: U256,
    #[serde(serialize_with = "serialize_u256")]
    pub total_supply: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Holder {
    pub address: Address,
    #[serde(serialize_with = "serialize_u256")]
    pub balance: U256,
    /// Share of the positive-balance total, two decimals, truncated.
    pub percent: Decimal,
}

/// Supply split of one property from the point of view of `account`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ownership {
    pub property_id: u64,
    #[serde(serialize_with = "serialize_u256")]
    pub total_supply: U256,
    #[serde(serialize_with = "serialize_u256")]
    pub you: U256,
    /// Owner's balance less the account's when the account is the owner.
    #[serde(serialize_with = "serialize_u256")]
    pub owner: U256,
    /// Escrowed in open listings.
    #[serde(serialize_with = "serialize_u256")]
    pub listed: U256,
    #[serde(serialize_with = "serialize_u256")]
    pub others: U256,
}

impl Ownership {
    pub fn split(
        property_id: u64,
        total_supply: U256,
        you: U256,
        owner: U256,
        listed: U256,
        account_is_owner: bool,
    ) -> Self {
        let owner = if account_is_owner {
            owner.saturating_sub(you)
        } else {
            owner
        };
        let others = total_supply
            .saturating_sub(you)
            .saturating_sub(owner)
            .saturating_sub(listed);
        Self {
            property_id,
            total_supply,
            you,
            owner,
            listed,
            others,
        }
    }
}

pub struct HoldingsReader {
    reader: ChainReader,
    start_block: u64,
    property_scan_limit: u64,
}

impl HoldingsReader {
    pub fn new(reader: ChainReader, config: &Config) -> Self {
        Self {
            reader,
            start_block: config.scan.start_block,
            property_scan_limit: config.scan.property_scan_limit,
        }
    }

    pub async fn properties(&self) -> anyhow::Result<Vec<PropertyInfo>> {
        self.reader
            .source()
            .properties(0, self.property_scan_limit)
            .await
            .context("property enumeration failed")
    }

    /// Balance and supply of every registered share token. Tokens whose reads
    /// fail are left out.
    pub async fn holdings(&self, account: Address) -> anyhow::Result<Vec<Holding>> {
        let source = self.reader.source();
        let mut out = Vec::new();

        for prop in self.properties().await? {
            if prop.token == Address::ZERO {
                continue;
            }
            let (balance, supply) = futures::join!(
                source.token_balance(prop.token, account),
                source.token_supply(prop.token)
            );
            match (balance, supply) {
                (Ok(balance), Ok(total_supply)) => out.push(Holding {
                    property_id: prop.id,
                    token: prop.token,
                    balance,
                    total_supply,
                }),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, token = %prop.token, "balance fetch failed");
                }
            }
        }
        Ok(out)
    }

    /// Registry entry of a property that has a share token.
    async fn tokenized_property(&self, property_id: u64) -> anyhow::Result<PropertyInfo> {
        let prop = self
            .reader
            .source()
            .properties(property_id, 1)
            .await
            .context("property lookup failed")?
            .into_iter()
            .find(|p| p.id == property_id)
            .ok_or_else(|| anyhow!("property {property_id} not registered"))?;
        if prop.token == Address::ZERO {
            return Err(anyhow!("property {property_id} has no share token"));
        }
        Ok(prop)
    }

    /// How a property's supply divides between `account`, the property owner,
    /// open listings and everyone else. Absent parties count as zero.
    pub async fn ownership(
        &self,
        property_id: u64,
        account: Option<Address>,
        owner: Option<Address>,
    ) -> anyhow::Result<Ownership> {
        let prop = self.tokenized_property(property_id).await?;
        let (source, token) = (self.reader.source(), prop.token);
        let balance_of = |who: Option<Address>| async move {
            match who {
                Some(who) => source.token_balance(token, who).await,
                None => Ok(U256::ZERO),
            }
        };

        let (total_supply, you, owner_balance) = futures::try_join!(
            source.token_supply(token),
            balance_of(account),
            balance_of(owner)
        )?;
        let listed = match source.listed_supply(U256::from(property_id)).await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(error = %e, property_id, "listed supply read failed, counting none");
                U256::ZERO
            }
        };

        let account_is_owner = matches!((account, owner), (Some(a), Some(o)) if a == o);
        Ok(Ownership::split(
            property_id,
            total_supply,
            you,
            owner_balance,
            listed,
            account_is_owner,
        ))
    }

    /// Largest holders of a property's share token, rebuilt from `Transfer` logs.
    pub async fn top_holders(
        &self,
        property_id: u64,
        limit: usize,
    ) -> anyhow::Result<Vec<Holder>> {
        let prop = self.tokenized_property(property_id).await?;
        let latest = self.reader.block_number().await?;
        let query = LogQuery::new(prop.token, abi::TRANSFER_TOPIC)
            .range(self.start_block, latest);
        let transfers = self.reader.events(&query).await;
        debug!(property_id, transfers = transfers.len(), "replaying share transfers");

        let flows = transfers.iter().filter_map(|l| match l.event {
            MarketEvent::Transfer { from, to, value } => Some((from, to, value)),
            _ => None,
        });
        Ok(rank_holders(flows, limit))
    }
}

/// Net each address's received minus sent value and rank the positive balances.
pub fn rank_holders(
    transfers: impl IntoIterator<Item = (Address, Address, U256)>,
    limit: usize,
) -> Vec<Holder> {
    // (received, sent); the zero address is the mint source and burn sink.
    let mut flows: HashMap<Address, (U256, U256)> = HashMap::new();
    for (from, to, value) in transfers {
        if from != Address::ZERO {
            let f = flows.entry(from).or_default();
            f.1 = f.1.saturating_add(value);
        }
        if to != Address::ZERO {
            let f = flows.entry(to).or_default();
            f.0 = f.0.saturating_add(value);
        }
    }

    let mut positive: Vec<(Address, U256)> = flows
        .into_iter()
        .filter(|(_, (received, sent))| received > sent)
        .map(|(addr, (received, sent))| (addr, received - sent))
        .collect();
    positive.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let total = positive
        .iter()
        .fold(U256::ZERO, |acc, (_, b)| acc.saturating_add(*b));

    positive
        .into_iter()
        .take(limit)
        .map(|(address, balance)| Holder {
            address,
            balance,
            percent: percent_of(balance, total),
        })
        .collect()
}

fn percent_of(part: U256, total: U256) -> Decimal {
    if total.is_zero() {
        return Decimal::ZERO;
    }
    let bps = part.saturating_mul(U256::from(10_000)) / total;
    Decimal::new(bps.saturating_to::<i64>(), 2)
}
