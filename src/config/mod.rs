use crate::history::TxKind;
use alloy::primitives::Address;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid address in {field}: {value}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("{0} contract address is not configured")]
    MissingContract(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC HTTP endpoint - env ESTATE_RPC_URL
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// PropertyRegistry address - env ESTATE_REGISTRY
    #[serde(default)]
    pub registry: Address,
    /// Marketplace address - env ESTATE_MARKETPLACE
    #[serde(default)]
    pub marketplace: Address,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Lowest block any scan starts from. Full re-scans begin here.
    #[serde(default)]
    pub start_block: u64,
    /// Window from the chain tip used by the history scan before it
    /// falls back to a full re-scan.
    #[serde(default = "default_lookback_blocks")]
    pub lookback_blocks: u64,
    /// Upper bound on registry entries enumerated for token transfer scans.
    #[serde(default = "default_property_scan_limit")]
    pub property_scan_limit: u64,
    /// Default number of asks returned by the order book.
    #[serde(default = "default_order_book_limit")]
    pub order_book_limit: usize,
    /// Max blocks per eth_getLogs request. 0 = single request.
    #[serde(default)]
    pub log_chunk_blocks: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Display rank used to pick the primary event of a transaction group.
    #[serde(default = "default_priority")]
    pub priority: BTreeMap<TxKind, u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}
fn default_lookback_blocks() -> u64 {
    500_000
}
fn default_property_scan_limit() -> u64 {
    50
}
fn default_order_book_limit() -> usize {
    50
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_priority() -> BTreeMap<TxKind, u8> {
    BTreeMap::from([
        (TxKind::Buy, 4),
        (TxKind::Sell, 4),
        (TxKind::List, 3),
        (TxKind::Claim, 3),
        (TxKind::Mint, 2),
        (TxKind::Receive, 2),
        (TxKind::Send, 2),
    ])
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            registry: Address::ZERO,
            marketplace: Address::ZERO,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            lookback_blocks: default_lookback_blocks(),
            property_scan_limit: default_property_scan_limit(),
            order_book_limit: default_order_book_limit(),
            log_chunk_blocks: 0,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            priority: default_priority(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain: ChainConfig::default(),
            scan: ScanConfig::default(),
            history: HistoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.apply_env()?;
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Defaults plus environment overrides (no file needed).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = std::env::var("ESTATE_RPC_URL") {
            if !url.is_empty() {
                self.chain.rpc_url = url;
            }
        }
        if let Ok(addr) = std::env::var("ESTATE_REGISTRY") {
            self.chain.registry = parse_address("ESTATE_REGISTRY", &addr)?;
        }
        if let Ok(addr) = std::env::var("ESTATE_MARKETPLACE") {
            self.chain.marketplace = parse_address("ESTATE_MARKETPLACE", &addr)?;
        }
        Ok(())
    }

    /// Both contracts must be known before any reconstruction can run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain.registry == Address::ZERO {
            return Err(ConfigError::MissingContract("registry"));
        }
        if self.chain.marketplace == Address::ZERO {
            return Err(ConfigError::MissingContract("marketplace"));
        }
        Ok(())
    }
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, ConfigError> {
    Address::from_str(value.trim()).map_err(|_| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}
