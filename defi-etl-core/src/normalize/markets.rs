//! CoinGecko `/coins/markets` → [`MarketRecord`].

use super::{array_at, label, Fields, NormalizeError, Normalized, Rejections, ValidationError};
use crate::raw::RawPayload;
use crate::records::{join_list, MarketRecord};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Normalize a (possibly multi-page) markets payload.
///
/// Duplicate coin ids keep the last occurrence. Among different coins sharing
/// a symbol, the larger market cap wins and the others are rejected, so
/// `(symbol, snapshot_date)` stays unique. `categories`, when given, supplies
/// the `category_tags` column. Output is ordered by `volume_rank`.
pub fn normalize_markets(
    markets: &RawPayload,
    categories: Option<&RawPayload>,
) -> Result<Normalized<MarketRecord>, NormalizeError> {
    let dataset = label(markets);
    let items = array_at(markets, None)?;
    let snapshot_date = markets.snapshot_date();
    let mut rejected = Rejections::default();

    let tags = categories.map(category_tags_by_coin).unwrap_or_default();

    // id -> (position of last occurrence, record)
    let mut by_id: HashMap<String, (usize, MarketRecord)> = HashMap::new();
    for (index, item) in items.iter().enumerate() {
        match parse_market(&dataset, index, item, snapshot_date, &tags) {
            Ok(record) => {
                by_id.insert(record.id.clone(), (index, record));
            }
            Err(err) => rejected.push(err),
        }
    }

    let mut by_symbol: BTreeMap<String, (usize, MarketRecord)> = BTreeMap::new();
    let mut deduped: Vec<(usize, MarketRecord)> = by_id.into_values().collect();
    deduped.sort_by_key(|(index, _)| *index);
    for (index, record) in deduped {
        match by_symbol.remove(&record.symbol) {
            None => {
                by_symbol.insert(record.symbol.clone(), (index, record));
            }
            Some((kept_index, kept)) => {
                let (winner, loser) = if record.market_cap > kept.market_cap {
                    ((index, record), (kept_index, kept))
                } else {
                    ((kept_index, kept), (index, record))
                };
                rejected.push(ValidationError {
                    dataset: dataset.clone(),
                    index: loser.0,
                    field: "symbol".to_string(),
                    reason: format!(
                        "duplicate symbol {} (kept '{}', dropped '{}')",
                        loser.1.symbol, winner.1.id, loser.1.id
                    ),
                });
                by_symbol.insert(winner.1.symbol.clone(), winner);
            }
        }
    }

    let mut records: Vec<MarketRecord> = by_symbol.into_values().map(|(_, r)| r).collect();
    assign_volume_ranks(&mut records);
    records.sort_by_key(|r| r.volume_rank);

    Ok(Normalized::new(records, rejected.into_vec()))
}

/// Rank by 24h volume, highest first; ties broken by symbol then id.
pub fn assign_volume_ranks(records: &mut [MarketRecord]) {
    records.sort_by(|a, b| {
        b.total_volume
            .total_cmp(&a.total_volume)
            .then_with(|| a.symbol.cmp(&b.symbol))
            .then_with(|| a.id.cmp(&b.id))
    });
    for (i, record) in records.iter_mut().enumerate() {
        record.volume_rank = i as u32 + 1;
    }
}

fn parse_market(
    dataset: &str,
    index: usize,
    item: &serde_json::Value,
    snapshot_date: chrono::NaiveDate,
    tags: &HashMap<String, BTreeSet<String>>,
) -> Result<MarketRecord, ValidationError> {
    let f = Fields::of(dataset, index, item)?;
    let id = f.require_str("id")?;
    let category_tags = tags.get(&id).map(join_list).unwrap_or_default();
    Ok(MarketRecord {
        snapshot_date,
        symbol: f.require_str("symbol")?.to_uppercase(),
        name: f.require_str("name")?,
        current_price: f.require_non_negative("current_price")?,
        market_cap: f.require_non_negative("market_cap")?,
        total_volume: f.require_non_negative("total_volume")?,
        pct_1h: f.optional_number("price_change_percentage_1h_in_currency")?,
        pct_24h: f.optional_number("price_change_percentage_24h_in_currency")?,
        pct_7d: f.optional_number("price_change_percentage_7d_in_currency")?,
        market_cap_rank: f.optional_u32("market_cap_rank"),
        circulating_supply: f.optional_non_negative("circulating_supply")?,
        total_supply: f.optional_non_negative("total_supply")?,
        max_supply: f.optional_non_negative("max_supply")?,
        ath: f.optional_non_negative("ath")?,
        ath_change_percentage: f.optional_number("ath_change_percentage")?,
        atl: f.optional_non_negative("atl")?,
        atl_change_percentage: f.optional_number("atl_change_percentage")?,
        last_updated: f.optional_str("last_updated"),
        volume_rank: 0,
        category_tags,
        id,
    })
}

/// coin id → names of categories listing it among their top coins.
fn category_tags_by_coin(categories: &RawPayload) -> HashMap<String, BTreeSet<String>> {
    let mut tags: HashMap<String, BTreeSet<String>> = HashMap::new();
    let Some(items) = categories.data.as_array() else {
        return tags;
    };
    for item in items {
        let Some(name) = item.get("name").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some(coins) = item.get("top_3_coins_id").and_then(|v| v.as_array()) else {
            continue;
        };
        for coin in coins.iter().filter_map(|c| c.as_str()) {
            tags.entry(coin.to_string())
                .or_default()
                .insert(name.to_string());
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Dataset, DatasetKey};
    use chrono::{NaiveDate, TimeZone, Utc};
    use serde_json::{json, Value};

    fn payload(dataset: Dataset, data: Value) -> RawPayload {
        RawPayload::new(
            &DatasetKey::new(dataset),
            "/coins/markets",
            Utc.with_ymd_and_hms(2025, 8, 31, 12, 0, 0).unwrap(),
            data,
        )
    }

    fn coin(id: &str, symbol: &str, price: f64, cap: f64, volume: f64) -> Value {
        json!({
            "id": id, "symbol": symbol, "name": id,
            "current_price": price, "market_cap": cap, "total_volume": volume,
            "price_change_percentage_24h_in_currency": 1.5,
            "market_cap_rank": 1
        })
    }

    #[test]
    fn btc_and_eth_ranked_by_volume() {
        let p = payload(
            Dataset::Markets,
            json!([
                coin("bitcoin", "btc", 50000.0, 1.0e12, 1000.0),
                coin("ethereum", "eth", 3000.0, 4.0e11, 5000.0),
            ]),
        );
        let out = normalize_markets(&p, None).unwrap();
        assert!(out.rejected.is_empty());
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].symbol, "ETH");
        assert_eq!(out.records[0].volume_rank, 1);
        assert_eq!(out.records[1].symbol, "BTC");
        assert_eq!(out.records[1].volume_rank, 2);
        assert_eq!(out.records[0].snapshot_date, NaiveDate::from_ymd_opt(2025, 8, 31).unwrap());
    }

    #[test]
    fn invalid_records_are_skipped() {
        let p = payload(
            Dataset::Markets,
            json!([
                coin("bitcoin", "btc", 50000.0, 1.0e12, 1000.0),
                {"id": "nosymbol", "name": "x", "current_price": 1.0, "market_cap": 1.0, "total_volume": 1.0},
                coin("neg", "neg", -1.0, 1.0, 1.0),
                "garbage",
            ]),
        );
        let out = normalize_markets(&p, None).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.rejected.len(), 3);
        assert_eq!(out.rejected[0].field, "symbol");
        assert_eq!(out.rejected[1].field, "current_price");
    }

    #[test]
    fn duplicate_ids_keep_last() {
        let p = payload(
            Dataset::Markets,
            json!([
                coin("bitcoin", "btc", 1.0, 10.0, 10.0),
                coin("bitcoin", "btc", 2.0, 20.0, 20.0),
            ]),
        );
        let out = normalize_markets(&p, None).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].current_price, 2.0);
        assert!(out.rejected.is_empty());
    }

    #[test]
    fn shared_symbol_keeps_larger_market_cap() {
        let p = payload(
            Dataset::Markets,
            json!([
                coin("tether", "usdt", 1.0, 1.0e11, 10.0),
                coin("bridged-usdt", "usdt", 1.0, 1.0e8, 20.0),
            ]),
        );
        let out = normalize_markets(&p, None).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].id, "tether");
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].index, 1);
    }

    #[test]
    fn category_tags_come_from_top_coins() {
        let markets = payload(Dataset::Markets, json!([coin("uniswap", "uni", 5.0, 1.0e9, 1.0e8)]));
        let categories = payload(
            Dataset::Categories,
            json!([
                {"name": "DeFi", "top_3_coins_id": ["uniswap", "aave"]},
                {"name": "Dex", "top_3_coins_id": ["uniswap"]},
                {"name": "L1", "top_3_coins_id": ["bitcoin"]},
            ]),
        );
        let out = normalize_markets(&markets, Some(&categories)).unwrap();
        assert_eq!(out.records[0].category_tags, "DeFi;Dex");
    }

    #[test]
    fn non_array_payload_is_a_shape_error() {
        let p = payload(Dataset::Markets, json!({"error": "rate limited"}));
        assert!(matches!(normalize_markets(&p, None), Err(NormalizeError::Shape { .. })));
    }
}
