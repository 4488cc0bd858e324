//! DexScreener search and token-pair responses → [`DexPairRecord`].

use super::{array_at, label, Fields, NormalizeError, Normalized, Rejections, ValidationError};
use crate::raw::RawPayload;
use crate::records::DexPairRecord;
use std::collections::BTreeMap;

/// Merge every `pairs@{chain}` and `token_pairs@{address}` payload.
///
/// Both endpoints answer `{"pairs": [...]}`; `pairs` may be null. A pair seen
/// in several payloads keeps the last occurrence in input order. A payload
/// without a pairs array is rejected as a whole. Output is
/// ordered by 24h volume descending, then pair address.
pub fn normalize_dex_pairs(payloads: &[RawPayload]) -> Result<Normalized<DexPairRecord>, NormalizeError> {
    let mut rejected = Rejections::default();
    let mut by_pair: BTreeMap<String, DexPairRecord> = BTreeMap::new();

    for payload in payloads {
        let dataset = label(payload);
        let snapshot_date = payload.snapshot_date();
        let items = match array_at(payload, Some("pairs")) {
            Ok(items) => items,
            Err(err) => {
                rejected.skip_payload(err);
                continue;
            }
        };
        for (index, item) in items.iter().enumerate() {
            let parsed = (|| -> Result<DexPairRecord, ValidationError> {
                let f = Fields::of(&dataset, index, item)?;
                Ok(DexPairRecord {
                    snapshot_date,
                    pair_address: f.require_str("pairAddress")?,
                    chain: f.require_str("chainId")?,
                    dex: f.require_str("dexId")?,
                    base_symbol: f.require_str("baseToken.symbol")?,
                    quote_symbol: f.optional_str("quoteToken.symbol"),
                    price_usd: f.require_non_negative("priceUsd")?,
                    liquidity_usd: f.optional_non_negative("liquidity.usd")?,
                    volume_24h: f.require_non_negative("volume.h24")?,
                    price_change_24h: f.optional_number("priceChange.h24")?,
                    fdv: f.optional_non_negative("fdv")?,
                    url: f.optional_str("url"),
                })
            })();
            match parsed {
                Ok(record) => {
                    by_pair.insert(record.pair_address.clone(), record);
                }
                Err(err) => rejected.push(err),
            }
        }
    }

    let mut records: Vec<_> = by_pair.into_values().collect();
    records.sort_by(|a, b| {
        b.volume_24h
            .total_cmp(&a.volume_24h)
            .then_with(|| a.pair_address.cmp(&b.pair_address))
    });
    Ok(Normalized::new(records, rejected.into_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Dataset, DatasetKey};
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    fn payload(dataset: Dataset, q: &str, data: Value) -> RawPayload {
        RawPayload::new(
            &DatasetKey::qualified(dataset, q),
            "/latest/dex/search",
            Utc.with_ymd_and_hms(2025, 8, 31, 0, 0, 0).unwrap(),
            data,
        )
    }

    fn pair(addr: &str, volume: f64, price: &str) -> Value {
        json!({
            "chainId": "ethereum", "dexId": "uniswap", "pairAddress": addr,
            "baseToken": {"symbol": "WETH"}, "quoteToken": {"symbol": "USDC"},
            "priceUsd": price, "volume": {"h24": volume}, "liquidity": {"usd": 1.0e6},
            "priceChange": {"h24": -1.2}
        })
    }

    #[test]
    fn merges_and_dedupes_pairs() {
        let a = payload(Dataset::Pairs, "ethereum", json!({"pairs": [pair("0xa", 10.0, "3000.5"), pair("0xb", 50.0, "1.0")]}));
        let b = payload(Dataset::TokenPairs, "0xc02a", json!({"pairs": [pair("0xa", 20.0, "3001"), pair("0xc", 5.0, "-2")]}));
        let empty = payload(Dataset::Pairs, "bsc", json!({"schemaVersion": "1.0.0", "pairs": null}));
        let out = normalize_dex_pairs(&[a, b, empty]).unwrap();
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].field, "priceUsd");
        assert_eq!(out.records[0].pair_address, "0xb");
        assert_eq!(out.records[1].price_usd, 3001.0);
        assert_eq!(out.records[1].volume_24h, 20.0);
    }

    #[test]
    fn malformed_payload_is_one_rejection() {
        let bad = payload(Dataset::TokenPairs, "0xdead", json!({"pairs": {"0xa": {}}}));
        let good = payload(Dataset::Pairs, "ethereum", json!({"pairs": [pair("0xa", 10.0, "3000.5")]}));
        let out = normalize_dex_pairs(&[bad, good]).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].field, "payload");
        assert!(out.rejected[0].reason.contains("found object"));

        let only_bad = payload(Dataset::Pairs, "bsc", json!({"pairs": 7}));
        let out = normalize_dex_pairs(&[only_bad]).unwrap();
        assert!(out.records.is_empty());
        assert!(out.non_empty("dex_pairs").is_err());
    }
}
