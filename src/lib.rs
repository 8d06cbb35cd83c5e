//! Event-log reconstruction for a fractional real-estate marketplace.
//!
//! Every read model here is rebuilt by replaying contract logs: the
//! secondary-market order book, a user's transaction history, dividend
//! deposits and claims, token holders and a trade price series.

pub mod config;
pub mod dividends;
pub mod history;
pub mod holdings;
pub mod onchain;
pub mod orderbook;
pub mod prices;
pub mod units;
