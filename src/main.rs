use alloy::primitives::{Address, U256};
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use estate_ledger::config::Config;
use estate_ledger::dividends::DividendReader;
use estate_ledger::history::group::{group_transactions, GroupingPolicy};
use estate_ledger::history::HistoryReader;
use estate_ledger::holdings::HoldingsReader;
use estate_ledger::onchain::{abi, ChainReader, RpcChain};
use estate_ledger::orderbook::{depth_curve, OrderBookReader};
use estate_ledger::prices::{PriceHistoryReader, PriceRange};
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const CONFIG_FILE: &str = "estate.toml";

const USAGE: &str = "usage: estate-ledger <command>

commands:
  status                          chain tip and event topic self-check
  book <propertyId> [limit]       active asks and depth curve
  history <address>               transaction history grouped by tx
  dividends <address>             dividend deposits and claims
  holdings <address>              share-token balances
  holders <propertyId> [limit]    top holders from transfer replay
  ownership <propertyId> <address> [owner]
                                  supply split: you, owner, listed, others
  prices <propertyId> [range]     VWAP series (1D, 7D, 30D, 90D, 1Y, All)";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = if Path::new(CONFIG_FILE).exists() {
        Config::load(Path::new(CONFIG_FILE))?
    } else {
        Config::from_env()?
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    // Logs go to stderr so stdout stays pure JSON.
    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    info!("estate-ledger v{} {}", env!("CARGO_PKG_VERSION"), command);
    config.validate()?;

    let chain = RpcChain::connect(&config.chain, &config.scan).await?;
    let reader = ChainReader::new(Arc::new(chain));

    match command {
        "status" => {
            let tip = reader.block_number().await?;
            let topics: Vec<_> = abi::verify_topic_hashes()
                .into_iter()
                .map(|(signature, ok)| json!({ "signature": signature, "ok": ok }))
                .collect();
            if topics.iter().any(|t| t["ok"] == false) {
                warn!("compiled topic constants disagree with their signatures");
            }
            let tip_time = reader
                .clock()
                .timestamp(tip)
                .await
                .and_then(|t| DateTime::<Utc>::from_timestamp(i64::try_from(t).ok()?, 0));
            print_json(&json!({
                "rpc_url": config.chain.rpc_url,
                "registry": config.chain.registry,
                "marketplace": config.chain.marketplace,
                "block_number": tip,
                "block_time": tip_time,
                "topics": topics,
            }))?;
        }
        "book" => {
            let property_id = u256_arg(&args, 1, "propertyId")?;
            let limit = usize_arg(&args, 2)?.unwrap_or(config.scan.order_book_limit);
            let asks = OrderBookReader::new(reader, &config)
                .asks(property_id, limit)
                .await?;
            let depth = depth_curve(&asks);
            print_json(&json!({ "asks": asks, "depth": depth }))?;
        }
        "history" => {
            let user = address_arg(&args, 1)?;
            let events = HistoryReader::new(reader, &config)
                .transactions(user)
                .await?;
            let groups = group_transactions(&events, &GroupingPolicy::from(&config.history));
            print_json(&groups)?;
        }
        "dividends" => {
            let account = address_arg(&args, 1)?;
            let props = HoldingsReader::new(reader.clone(), &config)
                .properties()
                .await?;
            let ids: Vec<U256> = props.iter().map(|p| U256::from(p.id)).collect();
            let ledger = DividendReader::new(reader, &config)
                .history(account, &ids)
                .await?;
            print_json(&ledger)?;
        }
        "holdings" => {
            let account = address_arg(&args, 1)?;
            let holdings = HoldingsReader::new(reader, &config)
                .holdings(account)
                .await?;
            print_json(&holdings)?;
        }
        "holders" => {
            let property_id: u64 = arg(&args, 1, "propertyId")?
                .parse()
                .context("propertyId must be an integer")?;
            let limit = usize_arg(&args, 2)?.unwrap_or(10);
            let holders = HoldingsReader::new(reader, &config)
                .top_holders(property_id, limit)
                .await?;
            print_json(&holders)?;
        }
        "ownership" => {
            let property_id: u64 = arg(&args, 1, "propertyId")?
                .parse()
                .context("propertyId must be an integer")?;
            let account = address_arg(&args, 2)?;
            let owner = match args.get(3) {
                Some(_) => Some(address_arg(&args, 3)?),
                None => None,
            };
            let split = HoldingsReader::new(reader, &config)
                .ownership(property_id, Some(account), owner)
                .await?;
            print_json(&split)?;
        }
        "prices" => {
            let property_id = u256_arg(&args, 1, "propertyId")?;
            let range = match args.get(2) {
                Some(r) => r.parse::<PriceRange>()?,
                None => PriceRange::default(),
            };
            let series = PriceHistoryReader::new(reader, &config)
                .history(property_id, range)
                .await?;
            print_json(&json!({ "range": range.to_string(), "buckets": series }))?;
        }
        other => bail!("unknown command '{other}'\n\n{USAGE}"),
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> anyhow::Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .with_context(|| format!("missing <{name}>\n\n{USAGE}"))
}

fn address_arg(args: &[String], index: usize) -> anyhow::Result<Address> {
    let raw = arg(args, index, "address")?;
    raw.parse::<Address>()
        .with_context(|| format!("'{raw}' is not a valid address"))
}

fn u256_arg(args: &[String], index: usize, name: &str) -> anyhow::Result<U256> {
    let raw = arg(args, index, name)?;
    raw.parse::<U256>()
        .with_context(|| format!("{name} '{raw}' is not an unsigned integer"))
}

fn usize_arg(args: &[String], index: usize) -> anyhow::Result<Option<usize>> {
    args.get(index)
        .map(|raw| {
            raw.parse::<usize>()
                .with_context(|| format!("'{raw}' is not a valid limit"))
        })
        .transpose()
}
