//! Display grouping: one row per on-chain transaction.
//!
//! A purchase emits both a marketplace event and a share-token transfer.
//! Grouping by transaction hash folds them into one logical entry whose
//! primary event is picked by a configurable rank.

use super::{TransactionEvent, TxKind};
use crate::config::HistoryConfig;
use crate::units::serialize_opt_u256;
use alloy::primitives::{B256, U256};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Rank per event kind; the highest-ranked event of a group is its primary.
#[derive(Debug, Clone)]
pub struct GroupingPolicy {
    ranks: BTreeMap<TxKind, u8>,
}

impl GroupingPolicy {
    pub fn new(ranks: BTreeMap<TxKind, u8>) -> Self {
        Self { ranks }
    }

    /// Unranked kinds rank lowest.
    pub fn rank(&self, kind: TxKind) -> u8 {
        self.ranks.get(&kind).copied().unwrap_or(0)
    }
}

impl From<&HistoryConfig> for GroupingPolicy {
    fn from(config: &HistoryConfig) -> Self {
        Self::new(config.priority.clone())
    }
}

impl Default for GroupingPolicy {
    fn default() -> Self {
        Self::from(&HistoryConfig::default())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TxGroup {
    pub tx_hash: B256,
    pub primary: TransactionEvent,
    /// Every event of the transaction in emission order.
    pub events: Vec<TransactionEvent>,
    pub timestamp: Option<u64>,
    #[serde(serialize_with = "serialize_opt_u256")]
    pub property_id: Option<U256>,
    /// Shares moved by trade events, else by transfers.
    #[serde(serialize_with = "serialize_opt_u256")]
    pub shares: Option<U256>,
    /// Σ price × amount over trade events that carry a price.
    #[serde(serialize_with = "serialize_opt_u256")]
    pub amount_wei: Option<U256>,
}

/// Logs without a transaction hash (pending) are grouped alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Tx(B256),
    Orphan(u64, u64, TxKind),
}

impl GroupKey {
    fn of(event: &TransactionEvent) -> Self {
        if event.tx_hash == B256::ZERO {
            GroupKey::Orphan(event.block_number, event.log_index, event.kind)
        } else {
            GroupKey::Tx(event.tx_hash)
        }
    }
}

/// Group events by transaction, most recent group first.
pub fn group_transactions(events: &[TransactionEvent], policy: &GroupingPolicy) -> Vec<TxGroup> {
    let mut by_key: HashMap<GroupKey, Vec<TransactionEvent>> = HashMap::new();
    for e in events {
        by_key.entry(GroupKey::of(e)).or_default().push(e.clone());
    }

    let mut groups: Vec<TxGroup> = by_key
        .into_values()
        .map(|mut evs| {
            evs.sort_by_key(TransactionEvent::position);
            build_group(evs, policy)
        })
        .collect();

    groups.sort_by(|a, b| b.primary.position().cmp(&a.primary.position()));
    groups
}

fn build_group(events: Vec<TransactionEvent>, policy: &GroupingPolicy) -> TxGroup {
    // Ties keep the earliest-emitted event.
    let mut primary = &events[0];
    for e in &events[1..] {
        if policy.rank(e.kind) > policy.rank(primary.kind) {
            primary = e;
        }
    }
    let primary = primary.clone();

    let timestamp = primary
        .timestamp
        .or_else(|| events.iter().find_map(|e| e.timestamp));
    let property_id = primary
        .property_id
        .or_else(|| events.iter().find_map(|e| e.property_id));

    let sum = |pick: fn(TxKind) -> bool| -> U256 {
        events
            .iter()
            .filter(|e| pick(e.kind))
            .fold(U256::ZERO, |acc, e| acc.saturating_add(e.amount))
    };
    let shares = [sum(TxKind::is_trade), sum(TxKind::is_transfer)]
        .into_iter()
        .find(|s| *s > U256::ZERO);

    let total_wei = events
        .iter()
        .filter(|e| e.kind.is_trade())
        .filter_map(|e| e.price.map(|p| p.saturating_mul(e.amount)))
        .fold(U256::ZERO, |acc, v| acc.saturating_add(v));
    let amount_wei = (total_wei > U256::ZERO).then_some(total_wei);

    TxGroup {
        tx_hash: primary.tx_hash,
        primary,
        events,
        timestamp,
        property_id,
        shares,
        amount_wei,
    }
}
