//! DeFiLlama `/stablecoins` → [`StablecoinRecord`].

use super::{array_at, as_number, label, Fields, NormalizeError, Normalized, Rejections, ValidationError};
use crate::raw::RawPayload;
use crate::records::{join_list, StablecoinRecord};
use serde_json::Value;
use std::collections::BTreeMap;

/// Normalize the `peggedAssets` listing.
///
/// Supplies are objects keyed by peg type (`{"peggedUSD": 1.6e11}`); the value
/// under the asset's own `pegType` is used, or the only entry when the peg type
/// is absent. A bare number is accepted too. Duplicate ids keep the last row.
/// Ordered by circulating supply descending, then id.
pub fn normalize_stablecoins(payload: &RawPayload) -> Result<Normalized<StablecoinRecord>, NormalizeError> {
    let dataset = label(payload);
    let snapshot_date = payload.snapshot_date();
    let mut rejected = Rejections::default();
    let mut by_id: BTreeMap<String, StablecoinRecord> = BTreeMap::new();

    for (index, item) in array_at(payload, Some("peggedAssets"))?.iter().enumerate() {
        let parsed = (|| -> Result<StablecoinRecord, ValidationError> {
            let f = Fields::of(&dataset, index, item)?;
            let peg_type = f.optional_str("pegType");
            let supply = |field: &str| peg_amount(&f, field, peg_type.as_deref());

            let circulating = supply("circulating")?.ok_or_else(|| f.error("circulating", "is missing"))?;
            let price = f.optional_non_negative("price")?;
            Ok(StablecoinRecord {
                snapshot_date,
                id: f.require_str("id")?,
                name: f.require_str("name")?,
                symbol: f.require_str("symbol")?,
                peg_mechanism: f.optional_str("pegMechanism"),
                price,
                circulating,
                circulating_prev_day: supply("circulatingPrevDay")?,
                circulating_prev_week: supply("circulatingPrevWeek")?,
                circulating_prev_month: supply("circulatingPrevMonth")?,
                mcap: price.map(|p| p * circulating),
                chains: join_list(f.string_list("chains")),
                peg_type,
            })
        })();
        match parsed {
            Ok(record) => {
                by_id.insert(record.id.clone(), record);
            }
            Err(err) => rejected.push(err),
        }
    }

    let mut records: Vec<_> = by_id.into_values().collect();
    records.sort_by(|a, b| b.circulating.total_cmp(&a.circulating).then_with(|| a.id.cmp(&b.id)));
    Ok(Normalized::new(records, rejected.into_vec()))
}

/// Supply in peg units. `None` when absent; negative or unreadable is an error.
fn peg_amount(f: &Fields<'_>, field: &str, peg_type: Option<&str>) -> Result<Option<f64>, ValidationError> {
    let amount = match f.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(by_peg)) => match peg_type {
            Some(peg) => by_peg.get(peg).and_then(as_number),
            None if by_peg.len() == 1 => by_peg.values().next().and_then(as_number),
            None => None,
        },
        Some(other) => as_number(other),
    };
    match amount {
        Some(n) if n < 0.0 => Err(f.error(field, format!("is negative ({n})"))),
        Some(n) => Ok(Some(n)),
        None => Err(f.error(field, "has no amount for the asset's peg")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Dataset, DatasetKey};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn payload(data: Value) -> RawPayload {
        RawPayload::new(
            &DatasetKey::new(Dataset::Stablecoins),
            "https://stablecoins.llama.fi/stablecoins",
            Utc.with_ymd_and_hms(2025, 8, 31, 0, 0, 0).unwrap(),
            data,
        )
    }

    #[test]
    fn supplies_follow_the_peg_type() {
        let p = payload(json!({"peggedAssets": [
            {
                "id": "2", "name": "USD Coin", "symbol": "USDC", "pegType": "peggedUSD",
                "pegMechanism": "fiat-backed", "price": 1.0,
                "circulating": {"peggedUSD": 6.5e10}, "circulatingPrevDay": {"peggedUSD": 6.4e10},
                "chains": ["Ethereum", "Solana"]
            },
            {
                "id": "1", "name": "Tether", "symbol": "USDT", "pegType": "peggedUSD", "price": "0.999",
                "circulating": {"peggedUSD": 1.6e11}, "circulatingPrevWeek": {"peggedUSD": 1.58e11}
            },
            {"id": "50", "name": "Euro Coin", "symbol": "EURC", "circulating": {"peggedEUR": 2.0e8}},
            {"id": "9", "name": "Broken", "symbol": "BRK", "pegType": "peggedUSD", "circulating": {"peggedEUR": 1.0}},
            {"id": "10", "name": "Negative", "symbol": "NEG", "circulating": -5.0}
        ]}));
        let out = normalize_stablecoins(&p).unwrap();
        assert_eq!(out.rejected.len(), 2);

        let ids: Vec<&str> = out.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "50"]);

        let usdt = &out.records[0];
        assert_eq!(usdt.circulating_prev_week, Some(1.58e11));
        assert_eq!(usdt.circulating_prev_day, None);
        assert!((usdt.mcap.unwrap() - 0.999 * 1.6e11).abs() < 1.0);

        let usdc = &out.records[1];
        assert_eq!(usdc.chains, "Ethereum;Solana");
        assert_eq!(usdc.peg_mechanism.as_deref(), Some("fiat-backed"));

        let eurc = &out.records[2];
        assert_eq!(eurc.circulating, 2.0e8);
        assert_eq!(eurc.mcap, None);
    }

    #[test]
    fn missing_listing_is_a_shape_error() {
        let err = normalize_stablecoins(&payload(json!({"peggedAssets": {"1": {}}}))).unwrap_err();
        assert!(matches!(err, NormalizeError::Shape { .. }));
    }
}
