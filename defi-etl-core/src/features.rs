//! Derived feature columns for markets, protocol overviews and protocol TVL.
//!
//! Band boundaries are right-inclusive: a value equal to an edge falls in the
//! lower band. Values at or below the first edge get no band.

use crate::records::{
    MarketFeatureRow, MarketRecord, ProtocolFeatureRow, ProtocolSnapshotRecord, ProtocolTvlRecord, TvlFeatureRow,
};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::{BTreeMap, HashMap};

const CHANGE_24H_EDGES: [f64; 9] = [f64::NEG_INFINITY, -20.0, -10.0, -5.0, 0.0, 5.0, 10.0, 20.0, f64::INFINITY];
const CHANGE_24H_LABELS: [&str; 8] = [
    "extreme_loss",
    "high_loss",
    "moderate_loss",
    "slight_loss",
    "slight_gain",
    "moderate_gain",
    "high_gain",
    "extreme_gain",
];

const MARKET_CAP_EDGES: [f64; 8] = [0.0, 1e6, 1e7, 1e8, 1e9, 1e10, 1e11, f64::INFINITY];
const MARKET_CAP_LABELS: [&str; 7] = ["micro", "small", "medium", "large", "mega", "giga", "tera"];

const ACTIVITY_EDGES: [f64; 6] = [0.0, 0.01, 0.05, 0.1, 0.2, f64::INFINITY];
const ACTIVITY_LABELS: [&str; 5] = ["very_low", "low", "medium", "high", "very_high"];

const DOMINANCE_EDGES: [f64; 7] = [0.0, 1.0, 5.0, 10.0, 25.0, 50.0, f64::INFINITY];
const DOMINANCE_LABELS: [&str; 6] = ["minimal", "low", "moderate", "significant", "major", "dominant"];

const TVL_EDGES: [f64; 7] = [0.0, 1e6, 1e7, 1e8, 1e9, 1e10, f64::INFINITY];
const TVL_LABELS: [&str; 6] = ["micro", "small", "medium", "large", "mega", "giga"];

/// Label of the half-open band `(edges[i], edges[i+1]]` containing `value`.
pub fn band(value: f64, edges: &[f64], labels: &[&'static str]) -> Option<&'static str> {
    debug_assert_eq!(edges.len(), labels.len() + 1);
    edges
        .windows(2)
        .zip(labels)
        .find(|(w, _)| value > w[0] && value <= w[1])
        .map(|(_, label)| *label)
}

/// Three-way flag around a symmetric threshold.
fn flag(value: f64, threshold: f64, up: &str, down: &str, neutral: &str) -> String {
    if value > threshold {
        up.to_string()
    } else if value < -threshold {
        down.to_string()
    } else {
        neutral.to_string()
    }
}

pub fn market_features(records: &[MarketRecord]) -> Vec<MarketFeatureRow> {
    let total_cap: f64 = records.iter().map(|r| r.market_cap).sum();
    records
        .iter()
        .map(|r| {
            let ratio = (r.market_cap > 0.0).then(|| r.total_volume / r.market_cap);
            let dominance = (total_cap > 0.0).then(|| r.market_cap / total_cap * 100.0);
            MarketFeatureRow {
                snapshot_date: r.snapshot_date,
                id: r.id.clone(),
                symbol: r.symbol.clone(),
                name: r.name.clone(),
                current_price: r.current_price,
                market_cap: r.market_cap,
                total_volume: r.total_volume,
                pct_24h: r.pct_24h,
                pct_7d: r.pct_7d,
                market_cap_rank: r.market_cap_rank,
                volume_rank: r.volume_rank,
                price_change_24h_flag: r.pct_24h.map(|p| flag(p, 10.0, "high_gain", "high_loss", "normal")),
                price_change_24h_category: r
                    .pct_24h
                    .and_then(|p| band(p, &CHANGE_24H_EDGES, &CHANGE_24H_LABELS))
                    .map(str::to_string),
                price_change_7d_flag: r.pct_7d.map(|p| flag(p, 20.0, "strong_gain", "strong_loss", "stable")),
                market_cap_billion: r.market_cap / 1e9,
                market_cap_category: band(r.market_cap, &MARKET_CAP_EDGES, &MARKET_CAP_LABELS).map(str::to_string),
                volume_market_cap_ratio: ratio,
                volume_activity: ratio
                    .and_then(|x| band(x, &ACTIVITY_EDGES, &ACTIVITY_LABELS))
                    .map(str::to_string),
                sentiment_24h: r.pct_24h.map(|p| flag(p, 5.0, "greed", "fear", "neutral")),
                sentiment_7d: r.pct_7d.map(|p| flag(p, 10.0, "bullish", "bearish", "sideways")),
                market_dominance_pct: dominance,
                dominance_category: dominance
                    .and_then(|d| band(d, &DOMINANCE_EDGES, &DOMINANCE_LABELS))
                    .map(str::to_string),
            }
        })
        .collect()
}

/// Rolling statistics per (protocol, chain) series over calendar-day windows.
///
/// The 7d/30d windows cover every observation in `(date - window, date]`, so
/// the first observation of a series is its own mean. The 7d/30d changes
/// compare against the observation exactly that many days earlier and are
/// empty when that day is missing or zero. Rows keep the input order.
pub fn tvl_features(records: &[ProtocolTvlRecord]) -> Vec<TvlFeatureRow> {
    let mut series: HashMap<(&str, &str), BTreeMap<NaiveDate, f64>> = HashMap::new();
    for r in records {
        series
            .entry((r.protocol_slug.as_str(), r.chain.as_str()))
            .or_default()
            .insert(r.date, r.tvl_usd);
    }

    records
        .iter()
        .map(|r| {
            let points = &series[&(r.protocol_slug.as_str(), r.chain.as_str())];
            let week = Window::over(points, r.date, 7);
            let month = Window::over(points, r.date, 30);
            let cal = Calendar::of(r.date);
            TvlFeatureRow {
                date: r.date,
                protocol_name: r.protocol_name.clone(),
                protocol_slug: r.protocol_slug.clone(),
                chain: r.chain.clone(),
                tvl_usd: r.tvl_usd,
                tvl_billion: r.tvl_billion,
                tvl_category: band(r.tvl_usd, &TVL_EDGES, &TVL_LABELS).map(str::to_string),
                tvl_rolling_mean_7d: week.mean,
                tvl_rolling_mean_30d: month.mean,
                tvl_rolling_std_7d: week.std,
                tvl_rolling_std_30d: month.std,
                tvl_rolling_volatility_7d: week.volatility(),
                tvl_rolling_volatility_30d: month.volatility(),
                tvl_change_7d_pct: change_since(points, r.date, r.tvl_usd, 7),
                tvl_change_30d_pct: change_since(points, r.date, r.tvl_usd, 30),
                year: cal.year,
                month: cal.month,
                day: cal.day,
                day_of_week: cal.day_of_week,
                quarter: cal.quarter,
                week_of_year: cal.week_of_year,
                month_name: cal.month_name,
                day_name: cal.day_name,
                is_weekend: cal.is_weekend,
                days_since_epoch: cal.days_since_epoch,
            }
        })
        .collect()
}

/// Overview rows with daily and weekly TVL change flags. `change_1d` moves
/// beyond ±5% and `change_7d` beyond ±10% are flagged.
pub fn protocol_features(records: &[ProtocolSnapshotRecord]) -> Vec<ProtocolFeatureRow> {
    records
        .iter()
        .map(|r| ProtocolFeatureRow {
            snapshot_date: r.snapshot_date,
            name: r.name.clone(),
            slug: r.slug.clone(),
            category: r.category.clone(),
            tvl_usd: r.tvl_usd,
            tvl_billion: r.tvl_usd / 1e9,
            tvl_category: band(r.tvl_usd, &TVL_EDGES, &TVL_LABELS).map(str::to_string),
            change_1d: r.change_1d,
            change_7d: r.change_7d,
            tvl_change_1d_flag: r.change_1d.map(|c| flag(c, 5.0, "strong_growth", "strong_decline", "stable")),
            tvl_change_7d_flag: r.change_7d.map(|c| flag(c, 10.0, "weekly_growth", "weekly_decline", "stable")),
        })
        .collect()
}

/// Mean and sample standard deviation of one trailing window.
struct Window {
    mean: f64,
    std: Option<f64>,
}

impl Window {
    fn over(points: &BTreeMap<NaiveDate, f64>, end: NaiveDate, days: i64) -> Self {
        let start = end
            .checked_sub_signed(Duration::days(days))
            .and_then(|d| d.succ_opt())
            .unwrap_or(NaiveDate::MIN);
        let values: Vec<f64> = points.range(start..=end).map(|(_, v)| *v).collect();
        if values.is_empty() {
            return Self { mean: 0.0, std: None };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = (values.len() > 1).then(|| {
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (n - 1.0)).sqrt()
        });
        Self { mean, std }
    }

    fn volatility(&self) -> Option<f64> {
        self.std.filter(|_| self.mean != 0.0).map(|std| std / self.mean)
    }
}

/// Percent change from the observation exactly `days` earlier.
fn change_since(points: &BTreeMap<NaiveDate, f64>, date: NaiveDate, value: f64, days: i64) -> Option<f64> {
    let then = date.checked_sub_signed(Duration::days(days))?;
    points
        .get(&then)
        .copied()
        .filter(|prev| *prev > 0.0)
        .map(|prev| (value - prev) / prev * 100.0)
}

/// `num_days_from_ce` of 1970-01-01.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

struct Calendar {
    year: i32,
    month: u32,
    day: u32,
    day_of_week: u32,
    quarter: u32,
    week_of_year: u32,
    month_name: String,
    day_name: String,
    is_weekend: bool,
    days_since_epoch: i64,
}

impl Calendar {
    fn of(date: NaiveDate) -> Self {
        let weekday = date.weekday();
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
            day_of_week: weekday.num_days_from_monday(),
            quarter: (date.month() - 1) / 3 + 1,
            week_of_year: date.iso_week().week(),
            month_name: date.format("%B").to_string(),
            day_name: date.format("%A").to_string(),
            is_weekend: matches!(weekday, Weekday::Sat | Weekday::Sun),
            days_since_epoch: i64::from(date.num_days_from_ce() - EPOCH_DAYS_FROM_CE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(id: &str, cap: f64, volume: f64, pct_24h: Option<f64>, pct_7d: Option<f64>) -> MarketRecord {
        MarketRecord {
            snapshot_date: NaiveDate::from_ymd_opt(2025, 8, 31).unwrap(),
            id: id.into(),
            symbol: id.to_uppercase(),
            name: id.into(),
            current_price: 1.0,
            market_cap: cap,
            total_volume: volume,
            pct_1h: None,
            pct_24h,
            pct_7d,
            market_cap_rank: None,
            circulating_supply: None,
            total_supply: None,
            max_supply: None,
            ath: None,
            ath_change_percentage: None,
            atl: None,
            atl_change_percentage: None,
            last_updated: None,
            volume_rank: 1,
            category_tags: String::new(),
        }
    }

    #[test]
    fn bands_are_right_inclusive() {
        assert_eq!(band(-20.0, &CHANGE_24H_EDGES, &CHANGE_24H_LABELS), Some("extreme_loss"));
        assert_eq!(band(0.0, &CHANGE_24H_EDGES, &CHANGE_24H_LABELS), Some("slight_loss"));
        assert_eq!(band(0.1, &CHANGE_24H_EDGES, &CHANGE_24H_LABELS), Some("slight_gain"));
        assert_eq!(band(25.0, &CHANGE_24H_EDGES, &CHANGE_24H_LABELS), Some("extreme_gain"));
        assert_eq!(band(0.0, &MARKET_CAP_EDGES, &MARKET_CAP_LABELS), None);
        assert_eq!(band(1e6, &MARKET_CAP_EDGES, &MARKET_CAP_LABELS), Some("micro"));
        assert_eq!(band(2e12, &MARKET_CAP_EDGES, &MARKET_CAP_LABELS), Some("tera"));
    }

    #[test]
    fn market_flags_and_dominance() {
        let rows = market_features(&[
            market("btc", 3.0e12, 3.0e10, Some(12.0), Some(-25.0)),
            market("dust", 1.0e12, 0.0, None, Some(3.0)),
        ]);
        let btc = &rows[0];
        assert_eq!(btc.price_change_24h_flag.as_deref(), Some("high_gain"));
        assert_eq!(btc.price_change_7d_flag.as_deref(), Some("strong_loss"));
        assert_eq!(btc.sentiment_24h.as_deref(), Some("greed"));
        assert_eq!(btc.sentiment_7d.as_deref(), Some("bearish"));
        assert_eq!(btc.market_cap_category.as_deref(), Some("tera"));
        assert_eq!(btc.volume_activity.as_deref(), Some("very_low"));
        assert_eq!(btc.market_dominance_pct, Some(75.0));
        assert_eq!(btc.dominance_category.as_deref(), Some("dominant"));

        let dust = &rows[1];
        assert_eq!(dust.price_change_24h_flag, None);
        assert_eq!(dust.sentiment_7d.as_deref(), Some("sideways"));
        assert_eq!(dust.volume_market_cap_ratio, Some(0.0));
        assert_eq!(dust.volume_activity, None);
    }

    #[test]
    fn rolling_means_and_weekly_change() {
        let d0 = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let records: Vec<ProtocolTvlRecord> = (0..10)
            .map(|i| ProtocolTvlRecord {
                date: d0 + Duration::days(i),
                protocol_name: "Aave".into(),
                protocol_slug: "aave".into(),
                chain: "Ethereum".into(),
                tvl_usd: 100.0 + i as f64,
                tvl_billion: 0.0,
            })
            .collect();
        let rows = tvl_features(&records);
        assert_eq!(rows[0].tvl_rolling_mean_7d, 100.0);
        assert_eq!(rows[0].tvl_change_7d_pct, None);
        // day 9: window covers days 3..=9
        assert_eq!(rows[9].tvl_rolling_mean_7d, 106.0);
        assert_eq!(rows[9].tvl_rolling_mean_30d, 104.5);
        let change = rows[9].tvl_change_7d_pct.unwrap();
        assert!((change - (109.0 - 102.0) / 102.0 * 100.0).abs() < 1e-9);
        assert_eq!(rows[9].tvl_category.as_deref(), Some("micro"));
    }

    fn tvl(date: NaiveDate, value: f64) -> ProtocolTvlRecord {
        ProtocolTvlRecord {
            date,
            protocol_name: "Aave".into(),
            protocol_slug: "aave".into(),
            chain: "Ethereum".into(),
            tvl_usd: value,
            tvl_billion: value / 1e9,
        }
    }

    #[test]
    fn rolling_spread_and_volatility() {
        let d0 = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let records: Vec<_> = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]
            .iter()
            .enumerate()
            .map(|(i, v)| tvl(d0 + Duration::days(i as i64), *v))
            .collect();
        let rows = tvl_features(&records);

        assert_eq!(rows[0].tvl_rolling_std_7d, None);
        assert_eq!(rows[0].tvl_rolling_volatility_7d, None);

        // days 1..=7: 4,4,4,5,5,7,9 → mean 38/7
        let last = &rows[7];
        let mean = 38.0 / 7.0;
        assert!((last.tvl_rolling_mean_7d - mean).abs() < 1e-12);
        let ss: f64 = [4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].iter().map(|v: &f64| (v - mean).powi(2)).sum();
        let std = (ss / 6.0).sqrt();
        assert!((last.tvl_rolling_std_7d.unwrap() - std).abs() < 1e-12);
        assert!((last.tvl_rolling_volatility_7d.unwrap() - std / mean).abs() < 1e-12);
        // all eight points fit in 30 days
        assert!((last.tvl_rolling_mean_30d - 5.0).abs() < 1e-12);
        assert_eq!(last.tvl_change_30d_pct, None);
    }

    #[test]
    fn calendar_columns() {
        // 2025-08-31 is a Sunday in ISO week 35
        let rows = tvl_features(&[tvl(NaiveDate::from_ymd_opt(2025, 8, 31).unwrap(), 1.0)]);
        let r = &rows[0];
        assert_eq!((r.year, r.month, r.day), (2025, 8, 31));
        assert_eq!(r.day_of_week, 6);
        assert_eq!(r.quarter, 3);
        assert_eq!(r.week_of_year, 35);
        assert_eq!(r.month_name, "August");
        assert_eq!(r.day_name, "Sunday");
        assert!(r.is_weekend);
        assert_eq!(r.days_since_epoch, 20_331);
    }

    #[test]
    fn dates_at_the_calendar_edge_do_not_panic() {
        let rows = tvl_features(&[tvl(NaiveDate::MIN, 1.0), tvl(NaiveDate::MAX, 2.0)]);
        assert_eq!(rows[0].tvl_change_7d_pct, None);
        assert_eq!(rows[0].tvl_rolling_mean_7d, 1.0);
        assert_eq!(rows[1].tvl_rolling_mean_30d, 2.0);
    }

    #[test]
    fn protocol_change_flags() {
        let snapshot = |slug: &str, tvl_usd: f64, change_1d: Option<f64>, change_7d: Option<f64>| ProtocolSnapshotRecord {
            snapshot_date: NaiveDate::from_ymd_opt(2025, 8, 31).unwrap(),
            name: slug.to_uppercase(),
            slug: slug.into(),
            category: Some("Lending".into()),
            chains: "Ethereum".into(),
            tvl_usd,
            change_1h: None,
            change_1d,
            change_7d,
            gecko_id: None,
        };
        let rows = protocol_features(&[
            snapshot("aave", 3.5e10, Some(6.0), Some(-12.0)),
            snapshot("tiny", 5.0e5, Some(-5.0), None),
        ]);
        assert_eq!(rows[0].tvl_change_1d_flag.as_deref(), Some("strong_growth"));
        assert_eq!(rows[0].tvl_change_7d_flag.as_deref(), Some("weekly_decline"));
        assert_eq!(rows[0].tvl_category.as_deref(), Some("giga"));
        assert_eq!(rows[0].tvl_billion, 35.0);
        assert_eq!(rows[1].tvl_change_1d_flag.as_deref(), Some("stable"));
        assert_eq!(rows[1].tvl_change_7d_flag, None);
        assert_eq!(rows[1].tvl_category.as_deref(), Some("micro"));
    }
}
