//! DeFiLlama `/v2/chains` → [`ChainTvlRecord`].

use super::{array_at, label, Fields, NormalizeError, Normalized, Rejections, ValidationError};
use crate::raw::RawPayload;
use crate::records::ChainTvlRecord;
use std::collections::BTreeMap;

/// Ordered by TVL descending, then name. Duplicate names keep the last row.
pub fn normalize_chains(payload: &RawPayload) -> Result<Normalized<ChainTvlRecord>, NormalizeError> {
    let dataset = label(payload);
    let snapshot_date = payload.snapshot_date();
    let mut rejected = Rejections::default();
    let mut by_name: BTreeMap<String, ChainTvlRecord> = BTreeMap::new();

    for (index, item) in array_at(payload, None)?.iter().enumerate() {
        let parsed = (|| -> Result<ChainTvlRecord, ValidationError> {
            let f = Fields::of(&dataset, index, item)?;
            Ok(ChainTvlRecord {
                snapshot_date,
                name: f.require_str("name")?,
                gecko_id: f.optional_str("gecko_id"),
                token_symbol: f.optional_str("tokenSymbol"),
                chain_id: f.optional_str("chainId"),
                tvl_usd: f.require_non_negative("tvl")?,
            })
        })();
        match parsed {
            Ok(record) => {
                by_name.insert(record.name.clone(), record);
            }
            Err(err) => rejected.push(err),
        }
    }

    let mut records: Vec<_> = by_name.into_values().collect();
    records.sort_by(|a, b| b.tvl_usd.total_cmp(&a.tvl_usd).then_with(|| a.name.cmp(&b.name)));
    Ok(Normalized::new(records, rejected.into_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Dataset, DatasetKey};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn chain_rows_ordered_by_tvl() {
        let p = RawPayload::new(
            &DatasetKey::new(Dataset::Chains),
            "/v2/chains",
            Utc.with_ymd_and_hms(2025, 8, 31, 0, 0, 0).unwrap(),
            json!([
                {"name": "Solana", "tvl": 1.0e10, "tokenSymbol": "SOL", "gecko_id": "solana", "chainId": null},
                {"name": "Ethereum", "tvl": 9.0e10, "tokenSymbol": "ETH", "chainId": 1},
                {"name": "Broken", "tvl": -1.0},
            ]),
        );
        let out = normalize_chains(&p).unwrap();
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.records[0].name, "Ethereum");
        assert_eq!(out.records[0].chain_id.as_deref(), Some("1"));
        assert_eq!(out.records[1].chain_id, None);
    }
}
