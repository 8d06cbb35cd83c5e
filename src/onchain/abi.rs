//! Event topic hashes for the marketplace and share-token contracts.
//!
//! Only the events the reconstructors replay are listed here. Indexed
//! arguments live in topics[1..], everything else in the data words.

use alloy::primitives::{b256, B256};

// ─── Event topic0 hashes (keccak256 of event signature) ──────────────────────

/// keccak256("ListingCreated(uint256,uint256,address,uint256,uint256)")
/// Topics: [sig, listingId, propertyId]  Data: [seller, amount, pricePerShareWei]
pub const LISTING_CREATED_TOPIC: B256 =
    b256!("492d2294f1b8a982001da6ecb3de3a374ad9c29c9c8d5ad43da90cc50b585136");

/// keccak256("ListingCancelled(uint256)")
/// Topics: [sig, listingId]
pub const LISTING_CANCELLED_TOPIC: B256 =
    b256!("411aee90354c51b1b04cd563fcab2617142a9d50da19232d888547c8a1b7fd8a");

/// keccak256("ListingFilled(uint256,address,uint256)")
/// Topics: [sig, listingId, buyer]  Data: [amount]
pub const LISTING_FILLED_TOPIC: B256 =
    b256!("f4db9839cb6de8cbeca7b39bc74f8fd501b7790ee5ac387e2b46f9f93fbe1198");

/// keccak256("SharesPurchased(uint256,address,uint256,uint256)")
/// Topics: [sig, propertyId, buyer]  Data: [amount, pricePerShareWei]
pub const SHARES_PURCHASED_TOPIC: B256 =
    b256!("ce81571c08c76465bdf390ad1abe80af8c51c6c4566e3485f9395f13d5ad6328");

/// keccak256("SharesSold(uint256,address,uint256,uint256)")
/// Topics: [sig, propertyId, seller]  Data: [amount, price]
pub const SHARES_SOLD_TOPIC: B256 =
    b256!("c84ba642853b7fceb52ece6998aa2618edc77f7a182996141f2a470af347cea3");

/// keccak256("DividendsDeposited(uint256,uint256)")
/// Topics: [sig, propertyId]  Data: [amountWei]
pub const DIVIDENDS_DEPOSITED_TOPIC: B256 =
    b256!("b9ebcb18b045f112fc4335f8a337b6daef95ab3d79fcaf32aab73f57e6b12f81");

/// keccak256("DividendClaimed(uint256,address,uint256)")
/// Topics: [sig, propertyId, account]  Data: [amountWei]
pub const DIVIDEND_CLAIMED_TOPIC: B256 =
    b256!("a1594d215a577c1905bcb0b5b186a40a0104714277441d4b2ac428c89bf7f4b1");

/// keccak256("Transfer(address,address,uint256)")
/// ERC-20 share token. Topics: [sig, from, to]  Data: [value]
pub const TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

const SIGNATURES: [(&str, B256); 8] = [
    (
        "ListingCreated(uint256,uint256,address,uint256,uint256)",
        LISTING_CREATED_TOPIC,
    ),
    ("ListingCancelled(uint256)", LISTING_CANCELLED_TOPIC),
    ("ListingFilled(uint256,address,uint256)", LISTING_FILLED_TOPIC),
    (
        "SharesPurchased(uint256,address,uint256,uint256)",
        SHARES_PURCHASED_TOPIC,
    ),
    ("SharesSold(uint256,address,uint256,uint256)", SHARES_SOLD_TOPIC),
    ("DividendsDeposited(uint256,uint256)", DIVIDENDS_DEPOSITED_TOPIC),
    (
        "DividendClaimed(uint256,address,uint256)",
        DIVIDEND_CLAIMED_TOPIC,
    ),
    ("Transfer(address,address,uint256)", TRANSFER_TOPIC),
];

/// Compute keccak256 hash of a byte slice.
pub fn keccak256(data: &[u8]) -> B256 {
    use tiny_keccak::{Hasher, Keccak};
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    B256::from(output)
}

/// Recompute every topic hash from its signature.
/// Returns (signature, matches) pairs for display.
pub fn verify_topic_hashes() -> Vec<(String, bool)> {
    SIGNATURES
        .iter()
        .map(|(sig, expected)| (sig.to_string(), keccak256(sig.as_bytes()) == *expected))
        .collect()
}
