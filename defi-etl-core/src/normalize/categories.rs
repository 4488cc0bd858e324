//! CoinGecko `/coins/categories` → [`CategoryRecord`].

use super::{array_at, label, Fields, NormalizeError, Normalized, Rejections, ValidationError};
use crate::raw::RawPayload;
use crate::records::{join_list, CategoryRecord};

/// Ordered by market cap descending, then id. `market_cap_share` is each
/// category's percent of the summed market cap of the accepted rows.
pub fn normalize_categories(payload: &RawPayload) -> Result<Normalized<CategoryRecord>, NormalizeError> {
    let dataset = label(payload);
    let snapshot_date = payload.snapshot_date();
    let mut rejected = Rejections::default();
    let mut records = Vec::new();

    for (index, item) in array_at(payload, None)?.iter().enumerate() {
        let parsed = (|| -> Result<CategoryRecord, ValidationError> {
            let f = Fields::of(&dataset, index, item)?;
            let coins = f.string_list("top_3_coins_id");
            Ok(CategoryRecord {
                snapshot_date,
                id: f.require_str("id")?,
                name: f.require_str("name")?,
                market_cap: f.require_non_negative("market_cap")?,
                market_cap_change_24h: f.optional_number("market_cap_change_24h")?,
                volume_24h: f.optional_non_negative("volume_24h")?,
                top_3_coins: join_list(&coins),
                market_cap_share: 0.0,
            })
        })();
        match parsed {
            Ok(record) => records.push(record),
            Err(err) => rejected.push(err),
        }
    }

    let total: f64 = records.iter().map(|r| r.market_cap).sum();
    if total > 0.0 {
        for record in &mut records {
            record.market_cap_share = record.market_cap / total * 100.0;
        }
    }
    records.sort_by(|a, b| {
        b.market_cap
            .total_cmp(&a.market_cap)
            .then_with(|| a.id.cmp(&b.id))
    });

    Ok(Normalized::new(records, rejected.into_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Dataset, DatasetKey};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn shares_sum_to_hundred_and_order_by_cap() {
        let p = RawPayload::new(
            &DatasetKey::new(Dataset::Categories),
            "/coins/categories",
            Utc.with_ymd_and_hms(2025, 8, 31, 0, 0, 0).unwrap(),
            json!([
                {"id": "defi", "name": "DeFi", "market_cap": 100.0, "volume_24h": 5.0,
                 "top_3_coins_id": ["uniswap", "aave", "maker"]},
                {"id": "l1", "name": "Layer 1", "market_cap": 300.0, "volume_24h": null},
                {"id": "broken", "name": "Broken", "market_cap": null},
            ]),
        );
        let out = normalize_categories(&p).unwrap();
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.records[0].id, "l1");
        assert!((out.records[0].market_cap_share - 75.0).abs() < 1e-9);
        assert!((out.records[1].market_cap_share - 25.0).abs() < 1e-9);
        assert_eq!(out.records[1].top_3_coins, "uniswap;aave;maker");
        assert_eq!(out.records[0].volume_24h, None);
    }
}
