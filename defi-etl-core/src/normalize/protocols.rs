//! DeFiLlama `/protocols` → [`ProtocolSnapshotRecord`].

use super::{array_at, label, Fields, NormalizeError, Normalized, Rejections, ValidationError};
use crate::raw::RawPayload;
use crate::records::{join_list, ProtocolSnapshotRecord};
use std::collections::BTreeMap;

/// Ordered by TVL descending, then slug. Duplicate slugs keep the last row.
pub fn normalize_protocols(
    payload: &RawPayload,
) -> Result<Normalized<ProtocolSnapshotRecord>, NormalizeError> {
    let dataset = label(payload);
    let snapshot_date = payload.snapshot_date();
    let mut rejected = Rejections::default();
    let mut by_slug: BTreeMap<String, ProtocolSnapshotRecord> = BTreeMap::new();

    for (index, item) in array_at(payload, None)?.iter().enumerate() {
        let parsed = (|| -> Result<ProtocolSnapshotRecord, ValidationError> {
            let f = Fields::of(&dataset, index, item)?;
            Ok(ProtocolSnapshotRecord {
                snapshot_date,
                name: f.require_str("name")?,
                slug: f.require_str("slug")?,
                category: f.optional_str("category"),
                chains: join_list(f.string_list("chains")),
                tvl_usd: f.require_non_negative("tvl")?,
                change_1h: f.optional_number("change_1h")?,
                change_1d: f.optional_number("change_1d")?,
                change_7d: f.optional_number("change_7d")?,
                gecko_id: f.optional_str("gecko_id"),
            })
        })();
        match parsed {
            Ok(record) => {
                by_slug.insert(record.slug.clone(), record);
            }
            Err(err) => rejected.push(err),
        }
    }

    let mut records: Vec<_> = by_slug.into_values().collect();
    records.sort_by(|a, b| b.tvl_usd.total_cmp(&a.tvl_usd).then_with(|| a.slug.cmp(&b.slug)));
    Ok(Normalized::new(records, rejected.into_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Dataset, DatasetKey};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn overview_rows() {
        let p = RawPayload::new(
            &DatasetKey::new(Dataset::Protocols),
            "/protocols",
            Utc.with_ymd_and_hms(2025, 8, 31, 0, 0, 0).unwrap(),
            json!([
                {"name": "Lido", "slug": "lido", "tvl": 3.0e10, "category": "Liquid Staking",
                 "chains": ["Ethereum", "Solana"], "change_1d": 0.4},
                {"name": "Aave", "slug": "aave", "tvl": 3.5e10, "chains": ["Ethereum"], "gecko_id": "aave"},
                {"name": "NoTvl", "slug": "notvl", "tvl": null},
            ]),
        );
        let out = normalize_protocols(&p).unwrap();
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.records[0].slug, "aave");
        assert_eq!(out.records[1].chains, "Ethereum;Solana");
        assert_eq!(out.records[1].category.as_deref(), Some("Liquid Staking"));
    }
}
