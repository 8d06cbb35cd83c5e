//! Typed decoders, one per event signature.
//!
//! Each decoder reads indexed arguments from topics[1..] and the rest from
//! 32-byte data words. A log with the wrong topic0, too few topics or a
//! short data section decodes to `None` and is skipped by the caller.

use crate::onchain::abi;
use crate::onchain::source::RawLog;
use alloy::primitives::{Address, B256, U256};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketEvent {
    ListingCreated {
        listing_id: U256,
        property_id: U256,
        seller: Address,
        amount: U256,
        price_per_share_wei: U256,
    },
    ListingCancelled {
        listing_id: U256,
    },
    ListingFilled {
        listing_id: U256,
        buyer: Address,
        amount: U256,
    },
    SharesPurchased {
        property_id: U256,
        buyer: Address,
        amount: U256,
        price_per_share_wei: U256,
    },
    SharesSold {
        property_id: U256,
        seller: Address,
        amount: U256,
        price: U256,
    },
    DividendsDeposited {
        property_id: U256,
        amount_wei: U256,
    },
    DividendClaimed {
        property_id: U256,
        account: Address,
        amount_wei: U256,
    },
    Transfer {
        from: Address,
        to: Address,
        value: U256,
    },
}

/// Decode any known event. Unknown topics and malformed payloads yield `None`.
pub fn decode(log: &RawLog) -> Option<MarketEvent> {
    let topic0 = *log.topics.first()?;
    let decoded = match topic0 {
        t if t == abi::LISTING_CREATED_TOPIC => decode_listing_created(log),
        t if t == abi::LISTING_CANCELLED_TOPIC => decode_listing_cancelled(log),
        t if t == abi::LISTING_FILLED_TOPIC => decode_listing_filled(log),
        t if t == abi::SHARES_PURCHASED_TOPIC => decode_shares_purchased(log),
        t if t == abi::SHARES_SOLD_TOPIC => decode_shares_sold(log),
        t if t == abi::DIVIDENDS_DEPOSITED_TOPIC => decode_dividends_deposited(log),
        t if t == abi::DIVIDEND_CLAIMED_TOPIC => decode_dividend_claimed(log),
        t if t == abi::TRANSFER_TOPIC => decode_transfer(log),
        _ => {
            debug!(topic = %topic0, "unrecognised event topic");
            return None;
        }
    };
    if decoded.is_none() {
        debug!(
            topic = %topic0,
            tx = %log.transaction_hash,
            log_index = log.log_index,
            "skipping undecodable log"
        );
    }
    decoded
}

/// ListingCreated(uint256 indexed listingId, uint256 indexed propertyId,
///                address seller, uint256 amount, uint256 pricePerShareWei)
pub fn decode_listing_created(log: &RawLog) -> Option<MarketEvent> {
    Some(MarketEvent::ListingCreated {
        listing_id: topic_u256(log, 1)?,
        property_id: topic_u256(log, 2)?,
        seller: word_address(&log.data, 0)?,
        amount: word(&log.data, 1)?,
        price_per_share_wei: word(&log.data, 2)?,
    })
}

/// ListingCancelled(uint256 indexed listingId)
pub fn decode_listing_cancelled(log: &RawLog) -> Option<MarketEvent> {
    Some(MarketEvent::ListingCancelled {
        listing_id: topic_u256(log, 1)?,
    })
}

/// ListingFilled(uint256 indexed listingId, address indexed buyer, uint256 amount)
pub fn decode_listing_filled(log: &RawLog) -> Option<MarketEvent> {
    Some(MarketEvent::ListingFilled {
        listing_id: topic_u256(log, 1)?,
        buyer: topic_address(log, 2)?,
        amount: word(&log.data, 0)?,
    })
}

/// SharesPurchased(uint256 indexed propertyId, address indexed buyer,
///                 uint256 amount, uint256 pricePerShareWei)
pub fn decode_shares_purchased(log: &RawLog) -> Option<MarketEvent> {
    Some(MarketEvent::SharesPurchased {
        property_id: topic_u256(log, 1)?,
        buyer: topic_address(log, 2)?,
        amount: word(&log.data, 0)?,
        price_per_share_wei: word(&log.data, 1)?,
    })
}

/// SharesSold(uint256 indexed propertyId, address indexed seller,
///            uint256 amount, uint256 price)
pub fn decode_shares_sold(log: &RawLog) -> Option<MarketEvent> {
    Some(MarketEvent::SharesSold {
        property_id: topic_u256(log, 1)?,
        seller: topic_address(log, 2)?,
        amount: word(&log.data, 0)?,
        price: word(&log.data, 1)?,
    })
}

/// DividendsDeposited(uint256 indexed propertyId, uint256 amountWei)
pub fn decode_dividends_deposited(log: &RawLog) -> Option<MarketEvent> {
    Some(MarketEvent::DividendsDeposited {
        property_id: topic_u256(log, 1)?,
        amount_wei: word(&log.data, 0)?,
    })
}

/// DividendClaimed(uint256 indexed propertyId, address indexed account, uint256 amountWei)
pub fn decode_dividend_claimed(log: &RawLog) -> Option<MarketEvent> {
    Some(MarketEvent::DividendClaimed {
        property_id: topic_u256(log, 1)?,
        account: topic_address(log, 2)?,
        amount_wei: word(&log.data, 0)?,
    })
}

/// Transfer(address indexed from, address indexed to, uint256 value)
pub fn decode_transfer(log: &RawLog) -> Option<MarketEvent> {
    Some(MarketEvent::Transfer {
        from: topic_address(log, 1)?,
        to: topic_address(log, 2)?,
        value: word(&log.data, 0)?,
    })
}

fn topic(log: &RawLog, index: usize) -> Option<B256> {
    log.topics.get(index).copied()
}

fn topic_u256(log: &RawLog, index: usize) -> Option<U256> {
    topic(log, index).map(|t| U256::from_be_bytes(t.0))
}

fn topic_address(log: &RawLog, index: usize) -> Option<Address> {
    topic(log, index).map(|t| Address::from_slice(&t.0[12..]))
}

/// The `index`-th 32-byte word of the data section.
fn word(data: &[u8], index: usize) -> Option<U256> {
    let start = index * 32;
    let bytes: [u8; 32] = data.get(start..start + 32)?.try_into().ok()?;
    Some(U256::from_be_bytes(bytes))
}

fn word_address(data: &[u8], index: usize) -> Option<Address> {
    let start = index * 32;
    data.get(start + 12..start + 32).map(Address::from_slice)
}


#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const MARKET: Address = address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512");
    const SELLER: Address = address!("00000000000000000000000000000000000000aa");

    #[test]
    fn test_decode_listing_created() {
        let log = encode::listing_created(MARKET, 3, 7, SELLER, 100, 10_000_000_000_000_000);
        assert_eq!(
            decode(&log),
            Some(MarketEvent::ListingCreated {
                listing_id: U256::from(3),
                property_id: U256::from(7),
                seller: SELLER,
                amount: U256::from(100),
                price_per_share_wei: U256::from(10_000_000_000_000_000u128),
            })
        );
    }

    #[test]
    fn test_short_data_is_skipped() {
        let mut log = encode::listing_filled(MARKET, 3, SELLER, 40);
        log.data = alloy::primitives::Bytes::from(log.data[..16].to_vec());
        assert_eq!(decode(&log), None);
    }

    #[test]
    fn test_missing_indexed_topic_is_skipped() {
        let mut log = encode::dividend_claimed(MARKET, 1, SELLER, 5);
        log.topics.truncate(2);
        assert_eq!(decode(&log), None);
    }

    #[test]
    fn test_unknown_topic_is_skipped() {
        let log = encode::log(MARKET, vec![B256::repeat_byte(0x11)], &[]);
        assert_eq!(decode(&log), None);
        let empty = encode::log(MARKET, vec![], &[]);
        assert_eq!(decode(&empty), None);
    }

    #[test]
    fn test_transfer_addresses_come_from_topics() {
        let to = address!("00000000000000000000000000000000000000bb");
        let log = encode::transfer(MARKET, Address::ZERO, to, 10);
        assert_eq!(
            decode(&log),
            Some(MarketEvent::Transfer {
                from: Address::ZERO,
                to,
                value: U256::from(10),
            })
        );
    }
}
