//! Chain access for the log-replay reconstructors.
//!
//! - `abi`: topic0 constants for the replayed events
//! - `source`: the `ChainSource` trait and the raw log/filter types
//! - `rpc`: `ChainSource` over an alloy HTTP provider
//! - `decode`: one typed decoder per event signature
//! - `reader`: error-absorbing log queries and the per-call block clock

pub mod abi;
pub mod decode;
#[cfg(test)]
pub(crate) mod memory;
pub mod reader;
pub mod rpc;
pub mod source;

pub use reader::{BlockClock, ChainReader, DecodedLog, LogPosition};
pub use rpc::RpcChain;
pub use source::{ChainSource, ListingState, LogQuery, PropertyInfo, RawLog};
