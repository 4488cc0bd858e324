//! CoinGecko `/coins/{id}/market_chart` → [`TokenHistoryRecord`].

use super::{as_number, label, NormalizeError, Normalized, Rejections, ValidationError};
use crate::raw::RawPayload;
use crate::records::TokenHistoryRecord;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Normalize every `token_history@{id}` payload. `prices`, `market_caps` and
/// `total_volumes` are `[ms, value]` pairs joined on their timestamp. A payload
/// whose series are not arrays is rejected as a whole. Output is ordered by
/// token id, then timestamp.
pub fn normalize_token_history(
    payloads: &[RawPayload],
) -> Result<Normalized<TokenHistoryRecord>, NormalizeError> {
    let mut rejected = Rejections::default();
    let mut records = Vec::new();

    for payload in payloads {
        let dataset = label(payload);
        let Chart {
            token_id,
            prices,
            caps,
            volumes,
        } = match Chart::of(payload) {
            Ok(chart) => chart,
            Err(err) => {
                rejected.skip_payload(err);
                continue;
            }
        };

        let mut by_ts: BTreeMap<i64, TokenHistoryRecord> = BTreeMap::new();
        for (index, entry) in prices.iter().enumerate() {
            let parsed = point(entry).and_then(|(ms, price)| {
                if price < 0.0 {
                    return Err(format!("is negative ({price})"));
                }
                let timestamp = DateTime::<Utc>::from_timestamp_millis(ms)
                    .ok_or_else(|| format!("timestamp {ms} out of range"))?;
                Ok(TokenHistoryRecord {
                    token_id: token_id.clone(),
                    timestamp,
                    date: timestamp.date_naive(),
                    price,
                    market_cap: caps.get(&ms).copied().filter(|v| *v >= 0.0),
                    volume: volumes.get(&ms).copied().filter(|v| *v >= 0.0),
                })
            });
            match parsed {
                Ok(record) => {
                    by_ts.insert(ms_of(&record), record);
                }
                Err(reason) => rejected.push(ValidationError {
                    dataset: dataset.clone(),
                    index,
                    field: "prices".to_string(),
                    reason,
                }),
            }
        }
        records.extend(by_ts.into_values());
    }

    records.sort_by(|a, b| a.token_id.cmp(&b.token_id).then(a.timestamp.cmp(&b.timestamp)));
    Ok(Normalized::new(records, rejected.into_vec()))
}

struct Chart<'a> {
    token_id: String,
    prices: &'a [Value],
    caps: BTreeMap<i64, f64>,
    volumes: BTreeMap<i64, f64>,
}

impl<'a> Chart<'a> {
    fn of(payload: &'a RawPayload) -> Result<Self, NormalizeError> {
        let token_id = payload.qualifier.clone().ok_or_else(|| NormalizeError::Shape {
            dataset: label(payload),
            reason: "token history payload has no token id".to_string(),
        })?;
        let points = |field: &str| -> Result<BTreeMap<i64, f64>, NormalizeError> {
            Ok(series(payload, field)?
                .iter()
                .filter_map(|v| point(v).ok())
                .collect())
        };
        Ok(Self {
            token_id,
            prices: series(payload, "prices")?,
            caps: points("market_caps")?,
            volumes: points("total_volumes")?,
        })
    }
}

fn ms_of(record: &TokenHistoryRecord) -> i64 {
    record.timestamp.timestamp_millis()
}

fn series<'a>(payload: &'a RawPayload, field: &str) -> Result<&'a [Value], NormalizeError> {
    match payload.data.get(field) {
        Some(Value::Array(items)) => Ok(items),
        None | Some(Value::Null) => Ok(&[]),
        Some(_) => Err(NormalizeError::Shape {
            dataset: label(payload),
            reason: format!("expected array at '{field}'"),
        }),
    }
}

fn point(value: &Value) -> Result<(i64, f64), String> {
    match value.as_array().map(Vec::as_slice) {
        Some([ts, v]) => {
            let ms = as_number(ts).ok_or("timestamp is not a number")?;
            let v = as_number(v).ok_or("value is not a number")?;
            Ok((ms as i64, v))
        }
        _ => Err("expected [timestamp, value] pair".to_string()),
    }
}
