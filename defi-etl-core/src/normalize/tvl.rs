//! DeFiLlama `/protocol/{slug}` → per-chain daily [`ProtocolTvlRecord`]s.

use super::{as_number, kind, label, NormalizeError, Normalized, Rejections, ValidationError};
use crate::raw::RawPayload;
use crate::records::ProtocolTvlRecord;
use chrono::{DateTime, NaiveDate};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// DeFiLlama's extra-TVL buckets. They appear both bare (`staking`) and
/// chain-prefixed (`Ethereum-staking`) and are not part of chain TVL.
pub const EXTRA_TVL_BUCKETS: [&str; 6] = ["borrowed", "staking", "pool2", "vesting", "offers", "treasury"];

pub fn is_extra_bucket(chain: &str) -> bool {
    let lower = chain.to_ascii_lowercase();
    EXTRA_TVL_BUCKETS.iter().any(|bucket| {
        lower == *bucket
            || lower
                .strip_suffix(*bucket)
                .is_some_and(|prefix| prefix.ends_with('-'))
    })
}

type Key = (NaiveDate, String, String);

struct Protocol<'a> {
    dataset: &'a str,
    name: &'a str,
    slug: &'a str,
}

impl Protocol<'_> {
    fn error(&self, index: usize, field: &str, reason: String) -> ValidationError {
        ValidationError {
            dataset: self.dataset.to_string(),
            index,
            field: field.to_string(),
            reason,
        }
    }

    fn push(
        &self,
        rows: &mut BTreeMap<Key, ProtocolTvlRecord>,
        rejected: &mut Rejections,
        index: usize,
        date: NaiveDate,
        chain: &str,
        tvl: Option<f64>,
    ) {
        match tvl {
            Some(tvl) if tvl >= 0.0 => {
                let record = ProtocolTvlRecord {
                    date,
                    protocol_name: self.name.to_string(),
                    protocol_slug: self.slug.to_string(),
                    chain: chain.to_string(),
                    tvl_usd: tvl,
                    tvl_billion: tvl / 1e9,
                };
                rows.insert((date, self.name.to_string(), chain.to_string()), record);
            }
            Some(tvl) => rejected.push(self.error(
                index,
                "totalLiquidityUSD",
                format!("negative TVL ({tvl}) for {chain} on {date}"),
            )),
            None => rejected.push(self.error(
                index,
                "totalLiquidityUSD",
                format!("missing or non-numeric TVL for {chain}"),
            )),
        }
    }
}

/// Normalize every `protocol_tvl@{slug}` payload.
///
/// Uses the historical `chainTvls.{chain}.tvl` series; a protocol with no
/// series falls back to `currentChainTvls` dated at the snapshot date.
/// Several points on one day keep the last. Negative TVL is rejected.
/// Output is ordered by date, protocol name, chain.
pub fn normalize_protocol_tvl(
    payloads: &[RawPayload],
) -> Result<Normalized<ProtocolTvlRecord>, NormalizeError> {
    let mut rejected = Rejections::default();
    let mut rows: BTreeMap<Key, ProtocolTvlRecord> = BTreeMap::new();

    for payload in payloads {
        let dataset = label(payload);
        let Value::Object(data) = &payload.data else {
            rejected.skip_payload(NormalizeError::Shape {
                dataset,
                reason: format!("expected protocol object, found {}", kind(&payload.data)),
            });
            continue;
        };
        let fallback_slug = payload.qualifier.clone().unwrap_or_default();
        let slug = data
            .get("slug")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(fallback_slug);
        let name = data
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| slug.clone());
        if name.is_empty() {
            rejected.skip_payload(NormalizeError::Shape {
                dataset,
                reason: "protocol has neither name nor slug".to_string(),
            });
            continue;
        }

        let protocol = Protocol {
            dataset: &dataset,
            name: &name,
            slug: &slug,
        };
        let mut index = 0;

        let mut had_series = false;
        if let Some(Value::Object(chain_tvls)) = data.get("chainTvls") {
            for (chain, chain_data) in chain_tvls.iter().filter(|(c, _)| !is_extra_bucket(c)) {
                let Some(points) = chain_data.get("tvl").and_then(Value::as_array) else {
                    continue;
                };
                for point in points {
                    had_series = true;
                    let tvl = point.get("totalLiquidityUSD").and_then(as_number);
                    match point_date(point) {
                        Some(date) => protocol.push(&mut rows, &mut rejected, index, date, chain, tvl),
                        None => rejected.push(protocol.error(
                            index,
                            "date",
                            format!("missing or invalid date in {chain} series"),
                        )),
                    }
                    index += 1;
                }
            }
        }

        if !had_series {
            if let Some(Value::Object(current)) = data.get("currentChainTvls") {
                for (chain, tvl) in current_chains(current) {
                    protocol.push(&mut rows, &mut rejected, index, payload.snapshot_date(), chain, as_number(tvl));
                    index += 1;
                }
            }
        }
    }

    Ok(Normalized::new(rows.into_values().collect(), rejected.into_vec()))
}

fn current_chains(current: &Map<String, Value>) -> impl Iterator<Item = (&String, &Value)> {
    current.iter().filter(|(chain, _)| !is_extra_bucket(chain))
}

/// Last second of 9999-12-31.
const MAX_TIMESTAMP: f64 = 253_402_300_799.0;

/// Unix seconds to a date. Anything before the epoch or past year 9999 is invalid.
fn point_date(point: &Value) -> Option<NaiveDate> {
    let secs = point.get("date").and_then(as_number)?;
    if !(0.0..=MAX_TIMESTAMP).contains(&secs) {
        return None;
    }
    DateTime::from_timestamp(secs as i64, 0).map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Dataset, DatasetKey};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn payload(slug: &str, data: Value) -> RawPayload {
        RawPayload::new(
            &DatasetKey::qualified(Dataset::ProtocolTvl, slug),
            format!("/protocol/{slug}"),
            Utc.with_ymd_and_hms(2025, 8, 31, 0, 0, 0).unwrap(),
            data,
        )
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn extra_buckets_are_recognized() {
        for c in ["staking", "pool2", "Ethereum-borrowed", "arbitrum-vesting", "Treasury"] {
            assert!(is_extra_bucket(c), "{c}");
        }
        for c in ["Ethereum", "Arbitrum", "Polygon zkEVM", "Stakingchain"] {
            assert!(!is_extra_bucket(c), "{c}");
        }
    }

    #[test]
    fn historical_series_per_chain() {
        let p = payload(
            "aave",
            json!({
                "name": "Aave", "slug": "aave",
                "chainTvls": {
                    "Ethereum": {"tvl": [
                        {"date": 1756425600, "totalLiquidityUSD": 2.0e10},
                        {"date": 1756512000, "totalLiquidityUSD": 2.1e10}
                    ]},
                    "Ethereum-borrowed": {"tvl": [{"date": 1756512000, "totalLiquidityUSD": 9.0e9}]},
                    "borrowed": {"tvl": [{"date": 1756512000, "totalLiquidityUSD": 9.0e9}]},
                    "Polygon": {"tvl": [{"date": 1756512000, "totalLiquidityUSD": 1.0e8}]}
                },
                "currentChainTvls": {"Ethereum": 1.0}
            }),
        );
        let out = normalize_protocol_tvl(&[p]).unwrap();
        assert!(out.rejected.is_empty());
        let keys: Vec<_> = out.records.iter().map(|r| (r.date, r.chain.as_str())).collect();
        assert_eq!(
            keys,
            vec![(d(2025, 8, 29), "Ethereum"), (d(2025, 8, 30), "Ethereum"), (d(2025, 8, 30), "Polygon")]
        );
        assert_eq!(out.records[1].tvl_billion, 21.0);
        assert_eq!(out.records[1].protocol_slug, "aave");
    }

    #[test]
    fn falls_back_to_current_tvls() {
        let p = payload(
            "newproto",
            json!({"name": "NewProto", "chainTvls": {}, "currentChainTvls": {"Base": 5.0e6, "Base-staking": 1.0}}),
        );
        let out = normalize_protocol_tvl(&[p]).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].date, d(2025, 8, 31));
        assert_eq!(out.records[0].protocol_slug, "newproto");
    }

    #[test]
    fn negative_tvl_is_rejected_other_protocols_survive() {
        let bad = payload(
            "bad",
            json!({"name": "Bad", "chainTvls": {"Ethereum": {"tvl": [
                {"date": 1756512000, "totalLiquidityUSD": -5.0},
                {"date": 1756425600, "totalLiquidityUSD": 7.0}
            ]}}}),
        );
        let good = payload(
            "good",
            json!({"name": "Good", "chainTvls": {"Ethereum": {"tvl": [{"date": 1756512000, "totalLiquidityUSD": 3.0}]}}}),
        );
        let out = normalize_protocol_tvl(&[bad, good]).unwrap();
        assert_eq!(out.rejected.len(), 1);
        assert!(out.rejected[0].reason.contains("negative"));
        assert_eq!(out.records.len(), 2);
        assert!(out.records.iter().all(|r| r.tvl_usd >= 0.0));
        assert!(out.records.iter().any(|r| r.protocol_name == "Good"));
    }

    #[test]
    fn out_of_range_dates_are_rejected() {
        let p = payload(
            "x",
            json!({"name": "X", "chainTvls": {"Ethereum": {"tvl": [
                {"date": -8.0e12, "totalLiquidityUSD": 1.0},
                {"date": 1.0e15, "totalLiquidityUSD": 1.0},
                {"date": 1756512000, "totalLiquidityUSD": 2.0}
            ]}}}),
        );
        let out = normalize_protocol_tvl(&[p]).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.rejected.len(), 2);
        assert!(out.rejected.iter().all(|e| e.field == "date"));
    }

    #[test]
    fn malformed_payload_does_not_sink_its_siblings() {
        let bad = payload("bad", json!([{"name": "not a protocol object"}]));
        let nameless = payload("", json!({"chainTvls": {}}));
        let good = payload(
            "good",
            json!({"name": "Good", "chainTvls": {"Ethereum": {"tvl": [{"date": 1756512000, "totalLiquidityUSD": 3.0}]}}}),
        );
        let out = normalize_protocol_tvl(&[bad, nameless, good]).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].protocol_name, "Good");
        assert_eq!(out.rejected.len(), 2);
        assert!(out.rejected.iter().all(|e| e.field == "payload"));
        assert!(out.rejected[0].reason.contains("found array"), "{}", out.rejected[0].reason);
    }

    #[test]
    fn same_day_points_keep_last() {
        let p = payload(
            "x",
            json!({"name": "X", "chainTvls": {"Ethereum": {"tvl": [
                {"date": 1756512000, "totalLiquidityUSD": 1.0},
                {"date": 1756515600, "totalLiquidityUSD": 2.0}
            ]}}}),
        );
        let out = normalize_protocol_tvl(&[p]).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].tvl_usd, 2.0);
    }
}
