//! CoinGecko `/global` + `/global/decentralized_finance_defi` → [`GlobalSnapshotRecord`].

use super::{label, Fields, NormalizeError, Normalized, Rejections, ValidationError};
use crate::raw::RawPayload;
use crate::records::GlobalSnapshotRecord;
use serde_json::Value;

/// Combine the two global payloads into one KPI row dated by the `global`
/// payload. Both answer with their body under `data`; the DeFi figures arrive
/// as numeric strings.
pub fn normalize_global(
    global: &RawPayload,
    defi: &RawPayload,
) -> Result<Normalized<GlobalSnapshotRecord>, NormalizeError> {
    let dataset = label(global);
    let global_data = data_object(global)?;
    let defi_data = data_object(defi)?;
    let mut rejected = Rejections::default();

    let parsed = (|| -> Result<GlobalSnapshotRecord, ValidationError> {
        let g = Fields::of(&dataset, 0, global_data)?;
        let defi_label = label(defi);
        let d = Fields::of(&defi_label, 0, defi_data)?;
        Ok(GlobalSnapshotRecord {
            snapshot_date: global.snapshot_date(),
            total_market_cap_usd: g.require_non_negative("total_market_cap.usd")?,
            total_volume_24h: g.require_non_negative("total_volume.usd")?,
            btc_dominance: g.require_non_negative("market_cap_percentage.btc")?,
            eth_dominance: g.require_non_negative("market_cap_percentage.eth")?,
            active_cryptocurrencies: g.require_non_negative("active_cryptocurrencies")? as u64,
            active_markets: g.require_non_negative("markets")? as u64,
            defi_market_cap: d.require_non_negative("defi_market_cap")?,
            defi_volume_24h: d.require_non_negative("trading_volume_24h")?,
            defi_dominance: d.require_non_negative("defi_dominance")?,
        })
    })();

    let mut records = Vec::new();
    match parsed {
        Ok(record) => records.push(record),
        Err(err) => rejected.push(err),
    }
    Ok(Normalized::new(records, rejected.into_vec()))
}

fn data_object(payload: &RawPayload) -> Result<&Value, NormalizeError> {
    match payload.data.get("data") {
        Some(v @ Value::Object(_)) => Ok(v),
        _ => Err(NormalizeError::Shape {
            dataset: label(payload),
            reason: "expected object at 'data'".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Dataset, DatasetKey};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn payload(dataset: Dataset, data: Value) -> RawPayload {
        RawPayload::new(
            &DatasetKey::new(dataset),
            "/global",
            Utc.with_ymd_and_hms(2025, 8, 31, 9, 30, 0).unwrap(),
            data,
        )
    }

    fn global() -> RawPayload {
        payload(
            Dataset::Global,
            json!({"data": {
                "active_cryptocurrencies": 17000,
                "markets": 1200,
                "total_market_cap": {"usd": 3.9e12, "eur": 3.3e12},
                "total_volume": {"usd": 1.2e11},
                "market_cap_percentage": {"btc": 57.1, "eth": 13.4}
            }}),
        )
    }

    #[test]
    fn combines_both_payloads() {
        let defi = payload(
            Dataset::DefiGlobal,
            json!({"data": {
                "defi_market_cap": "120000000000.5",
                "trading_volume_24h": "9000000000",
                "defi_dominance": "3.1"
            }}),
        );
        let out = normalize_global(&global(), &defi).unwrap();
        let r = &out.records[0];
        assert_eq!(r.active_markets, 1200);
        assert_eq!(r.total_market_cap_usd, 3.9e12);
        assert_eq!(r.defi_market_cap, 120000000000.5);
        assert_eq!(r.defi_dominance, 3.1);
    }

    #[test]
    fn missing_defi_field_rejects_the_row() {
        let defi = payload(Dataset::DefiGlobal, json!({"data": {"defi_market_cap": "1"}}));
        let out = normalize_global(&global(), &defi).unwrap();
        assert!(out.records.is_empty());
        assert_eq!(out.rejected[0].field, "trading_volume_24h");
    }

    #[test]
    fn missing_data_envelope_is_shape_error() {
        let defi = payload(Dataset::DefiGlobal, json!({"status": "down"}));
        assert!(normalize_global(&global(), &defi).is_err());
    }
}
