//! Export schema contract: the boundary between canonical files and the
//! dashboard.
//!
//! Each export file is a fixed list of output columns, each taken from one
//! column of one canonical file (copied as-is or scaled to billions). The
//! exporter checks every source column exists before writing anything.

use crate::processed::ProcessedDataset;

/// How an output column is derived from its source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Copy,
    /// `source / 1e9`
    Billions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportColumn {
    pub source: &'static str,
    pub output: &'static str,
    pub kind: ColumnKind,
}

const fn copy(source: &'static str, output: &'static str) -> ExportColumn {
    ExportColumn {
        source,
        output,
        kind: ColumnKind::Copy,
    }
}

const fn same(name: &'static str) -> ExportColumn {
    copy(name, name)
}

const fn billions(source: &'static str, output: &'static str) -> ExportColumn {
    ExportColumn {
        source,
        output,
        kind: ColumnKind::Billions,
    }
}

/// The four dashboard files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExportFile {
    KpiSnapshot,
    MarketsTop,
    CategoriesSnapshot,
    TvlProtocols,
}

impl ExportFile {
    pub const ALL: [ExportFile; 4] = [
        ExportFile::KpiSnapshot,
        ExportFile::MarketsTop,
        ExportFile::CategoriesSnapshot,
        ExportFile::TvlProtocols,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            ExportFile::KpiSnapshot => "kpi_snapshot.csv",
            ExportFile::MarketsTop => "markets_top.csv",
            ExportFile::CategoriesSnapshot => "categories_snapshot.csv",
            ExportFile::TvlProtocols => "tvl_protocols_30d.csv",
        }
    }

    pub fn input(self) -> ProcessedDataset {
        match self {
            ExportFile::KpiSnapshot => ProcessedDataset::GlobalSnapshot,
            ExportFile::MarketsTop => ProcessedDataset::Markets,
            ExportFile::CategoriesSnapshot => ProcessedDataset::Categories,
            ExportFile::TvlProtocols => ProcessedDataset::ProtocolTvl,
        }
    }

    pub fn columns(self) -> &'static [ExportColumn] {
        match self {
            ExportFile::KpiSnapshot => KPI_COLUMNS,
            ExportFile::MarketsTop => MARKETS_TOP_COLUMNS,
            ExportFile::CategoriesSnapshot => CATEGORIES_COLUMNS,
            ExportFile::TvlProtocols => TVL_COLUMNS,
        }
    }

    /// Source columns this export reads, in first-use order, without repeats.
    pub fn required_columns(self) -> Vec<&'static str> {
        let mut cols: Vec<&'static str> = Vec::new();
        for c in self.columns() {
            if !cols.contains(&c.source) {
                cols.push(c.source);
            }
        }
        cols
    }

    pub fn output_columns(self) -> Vec<&'static str> {
        self.columns().iter().map(|c| c.output).collect()
    }

    /// Required source columns absent from `available`.
    pub fn missing_columns<S: AsRef<str>>(self, available: &[S]) -> Vec<String> {
        self.required_columns()
            .into_iter()
            .filter(|req| !available.iter().any(|a| a.as_ref() == *req))
            .map(str::to_string)
            .collect()
    }
}

pub const KPI_COLUMNS: &[ExportColumn] = &[
    same("snapshot_date"),
    same("total_market_cap_usd"),
    same("total_volume_24h"),
    same("btc_dominance"),
    same("eth_dominance"),
    same("defi_market_cap"),
    same("defi_volume_24h"),
    same("defi_dominance"),
    same("active_cryptocurrencies"),
    same("active_markets"),
    billions("total_market_cap_usd", "total_market_cap_billion"),
    billions("total_volume_24h", "total_volume_24h_billion"),
    billions("defi_market_cap", "defi_market_cap_billion"),
    billions("defi_volume_24h", "defi_volume_24h_billion"),
];

/// Rows are the top N by `market_cap`.
pub const MARKETS_TOP_COLUMNS: &[ExportColumn] = &[
    same("snapshot_date"),
    same("name"),
    same("symbol"),
    copy("market_cap", "market_cap_usd"),
    billions("market_cap", "market_cap_billion"),
    same("current_price"),
    copy("total_volume", "volume_24h"),
    copy("pct_24h", "price_change_24h"),
    copy("pct_7d", "price_change_7d"),
    same("market_cap_rank"),
    same("volume_rank"),
    same("circulating_supply"),
];

pub const CATEGORIES_COLUMNS: &[ExportColumn] = &[
    same("snapshot_date"),
    same("name"),
    same("market_cap"),
    billions("market_cap", "market_cap_billion"),
    same("volume_24h"),
    same("market_cap_change_24h"),
    same("top_3_coins"),
    same("market_cap_share"),
];

/// Rows are restricted to the trailing window ending at the newest `date`.
pub const TVL_COLUMNS: &[ExportColumn] = &[
    same("date"),
    same("protocol_name"),
    same("protocol_slug"),
    same("chain"),
    same("tvl_usd"),
    same("tvl_billion"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_columns_are_unique_per_file() {
        for file in ExportFile::ALL {
            let outputs = file.output_columns();
            let mut dedup = outputs.clone();
            dedup.sort_unstable();
            dedup.dedup();
            assert_eq!(dedup.len(), outputs.len(), "{}", file.file_name());
        }
    }

    #[test]
    fn markets_top_reads_canonical_names() {
        let req = ExportFile::MarketsTop.required_columns();
        assert!(req.contains(&"market_cap"));
        assert!(req.contains(&"total_volume"));
        assert_eq!(req.iter().filter(|c| **c == "market_cap").count(), 1);
    }

    #[test]
    fn missing_columns_reported() {
        let available = ["date", "protocol_name", "chain", "tvl_usd", "tvl_billion"];
        assert_eq!(ExportFile::TvlProtocols.missing_columns(&available), vec!["protocol_slug"]);
        let full = ExportFile::TvlProtocols.required_columns();
        assert!(ExportFile::TvlProtocols.missing_columns(&full).is_empty());
    }

    #[test]
    fn kpi_has_billion_variants() {
        let out = ExportFile::KpiSnapshot.output_columns();
        for c in [
            "total_market_cap_billion",
            "total_volume_24h_billion",
            "defi_market_cap_billion",
            "defi_volume_24h_billion",
        ] {
            assert!(out.contains(&c), "{c}");
        }
    }
}
