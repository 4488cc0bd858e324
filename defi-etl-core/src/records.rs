//! Canonical records written to the processed directory.
//!
//! Field names are the CSV column names. List-valued fields are stored as a
//! single `;`-joined string because CSV rows are flat.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Separator for list-valued columns.
pub const LIST_SEP: &str = ";";

pub fn join_list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(LIST_SEP)
}

/// Global market and DeFi KPIs. One row per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSnapshotRecord {
    pub snapshot_date: NaiveDate,
    pub total_market_cap_usd: f64,
    pub total_volume_24h: f64,
    pub btc_dominance: f64,
    pub eth_dominance: f64,
    pub active_cryptocurrencies: u64,
    pub active_markets: u64,
    pub defi_market_cap: f64,
    pub defi_volume_24h: f64,
    pub defi_dominance: f64,
}

/// One coin from `/coins/markets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRecord {
    pub snapshot_date: NaiveDate,
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: f64,
    pub market_cap: f64,
    pub total_volume: f64,
    pub pct_1h: Option<f64>,
    pub pct_24h: Option<f64>,
    pub pct_7d: Option<f64>,
    pub market_cap_rank: Option<u32>,
    pub circulating_supply: Option<f64>,
    pub total_supply: Option<f64>,
    pub max_supply: Option<f64>,
    pub ath: Option<f64>,
    pub ath_change_percentage: Option<f64>,
    pub atl: Option<f64>,
    pub atl_change_percentage: Option<f64>,
    pub last_updated: Option<String>,
    /// 1 = highest 24h volume in the snapshot.
    pub volume_rank: u32,
    pub category_tags: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub snapshot_date: NaiveDate,
    pub id: String,
    pub name: String,
    pub market_cap: f64,
    pub market_cap_change_24h: Option<f64>,
    pub volume_24h: Option<f64>,
    pub top_3_coins: String,
    /// Percent of the summed market cap of all categories in the snapshot.
    pub market_cap_share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenHistoryRecord {
    pub token_id: String,
    pub timestamp: DateTime<Utc>,
    pub date: NaiveDate,
    pub price: f64,
    pub market_cap: Option<f64>,
    pub volume: Option<f64>,
}

/// Daily TVL of one protocol on one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolTvlRecord {
    pub date: NaiveDate,
    pub protocol_name: String,
    pub protocol_slug: String,
    pub chain: String,
    pub tvl_usd: f64,
    pub tvl_billion: f64,
}

/// Current overview row from `/protocols`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSnapshotRecord {
    pub snapshot_date: NaiveDate,
    pub name: String,
    pub slug: String,
    pub category: Option<String>,
    pub chains: String,
    pub tvl_usd: f64,
    pub change_1h: Option<f64>,
    pub change_1d: Option<f64>,
    pub change_7d: Option<f64>,
    pub gecko_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTvlRecord {
    pub snapshot_date: NaiveDate,
    pub name: String,
    pub gecko_id: Option<String>,
    pub token_symbol: Option<String>,
    pub chain_id: Option<String>,
    pub tvl_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexPairRecord {
    pub snapshot_date: NaiveDate,
    pub pair_address: String,
    pub chain: String,
    pub dex: String,
    pub base_symbol: String,
    pub quote_symbol: Option<String>,
    pub price_usd: f64,
    pub liquidity_usd: Option<f64>,
    pub volume_24h: f64,
    pub price_change_24h: Option<f64>,
    pub fdv: Option<f64>,
    pub url: Option<String>,
}

/// Market row plus derived classification columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketFeatureRow {
    pub snapshot_date: NaiveDate,
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: f64,
    pub market_cap: f64,
    pub total_volume: f64,
    pub pct_24h: Option<f64>,
    pub pct_7d: Option<f64>,
    pub market_cap_rank: Option<u32>,
    pub volume_rank: u32,
    pub price_change_24h_flag: Option<String>,
    pub price_change_24h_category: Option<String>,
    pub price_change_7d_flag: Option<String>,
    pub market_cap_billion: f64,
    pub market_cap_category: Option<String>,
    pub volume_market_cap_ratio: Option<f64>,
    pub volume_activity: Option<String>,
    pub sentiment_24h: Option<String>,
    pub sentiment_7d: Option<String>,
    pub market_dominance_pct: Option<f64>,
    pub dominance_category: Option<String>,
}

/// TVL row plus rolling statistics over its (protocol, chain) series and
/// calendar columns for its date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TvlFeatureRow {
    pub date: NaiveDate,
    pub protocol_name: String,
    pub protocol_slug: String,
    pub chain: String,
    pub tvl_usd: f64,
    pub tvl_billion: f64,
    pub tvl_category: Option<String>,
    pub tvl_rolling_mean_7d: f64,
    pub tvl_rolling_mean_30d: f64,
    /// Sample standard deviation; empty with fewer than two observations.
    pub tvl_rolling_std_7d: Option<f64>,
    pub tvl_rolling_std_30d: Option<f64>,
    /// Coefficient of variation: rolling std over rolling mean.
    pub tvl_rolling_volatility_7d: Option<f64>,
    pub tvl_rolling_volatility_30d: Option<f64>,
    pub tvl_change_7d_pct: Option<f64>,
    pub tvl_change_30d_pct: Option<f64>,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    /// Monday = 0.
    pub day_of_week: u32,
    pub quarter: u32,
    /// ISO week number.
    pub week_of_year: u32,
    pub month_name: String,
    pub day_name: String,
    pub is_weekend: bool,
    pub days_since_epoch: i64,
}

/// Protocol overview row plus TVL change flags and tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolFeatureRow {
    pub snapshot_date: NaiveDate,
    pub name: String,
    pub slug: String,
    pub category: Option<String>,
    pub tvl_usd: f64,
    pub tvl_billion: f64,
    pub tvl_category: Option<String>,
    pub change_1d: Option<f64>,
    pub change_7d: Option<f64>,
    pub tvl_change_1d_flag: Option<String>,
    pub tvl_change_7d_flag: Option<String>,
}

/// One stablecoin from the DeFiLlama stablecoins listing. Supplies are in
/// units of the peg; `mcap` is supply times price when a price is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StablecoinRecord {
    pub snapshot_date: NaiveDate,
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub peg_type: Option<String>,
    pub peg_mechanism: Option<String>,
    pub price: Option<f64>,
    pub circulating: f64,
    pub circulating_prev_day: Option<f64>,
    pub circulating_prev_week: Option<f64>,
    pub circulating_prev_month: Option<f64>,
    pub mcap: Option<f64>,
    pub chains: String,
}
