//! Canonical CSV files under the processed directory.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::source::{Dataset, Source};

/// Whether a file needs every raw input or at least one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRule {
    All,
    Any,
}

/// One canonical output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProcessedDataset {
    GlobalSnapshot,
    Markets,
    Categories,
    TokenHistory,
    Protocols,
    ProtocolTvl,
    Chains,
    Stablecoins,
    DexPairs,
    MarketFeatures,
    ProtocolFeatures,
    TvlFeatures,
}

impl ProcessedDataset {
    pub const ALL: [ProcessedDataset; 12] = [
        ProcessedDataset::GlobalSnapshot,
        ProcessedDataset::Markets,
        ProcessedDataset::Categories,
        ProcessedDataset::TokenHistory,
        ProcessedDataset::Protocols,
        ProcessedDataset::ProtocolTvl,
        ProcessedDataset::Chains,
        ProcessedDataset::Stablecoins,
        ProcessedDataset::DexPairs,
        ProcessedDataset::MarketFeatures,
        ProcessedDataset::ProtocolFeatures,
        ProcessedDataset::TvlFeatures,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            ProcessedDataset::GlobalSnapshot => "cg_global_snapshot.csv",
            ProcessedDataset::Markets => "cg_markets_latest.csv",
            ProcessedDataset::Categories => "cg_categories_snapshot.csv",
            ProcessedDataset::TokenHistory => "cg_token_history.csv",
            ProcessedDataset::Protocols => "llama_all_protocols.csv",
            ProcessedDataset::ProtocolTvl => "llama_tvl_protocols.csv",
            ProcessedDataset::Chains => "llama_tvl_chains.csv",
            ProcessedDataset::Stablecoins => "llama_stablecoins.csv",
            ProcessedDataset::DexPairs => "dex_pairs.csv",
            ProcessedDataset::MarketFeatures => "cg_markets_with_features.csv",
            ProcessedDataset::ProtocolFeatures => "llama_protocols_with_features.csv",
            ProcessedDataset::TvlFeatures => "llama_tvl_with_features.csv",
        }
    }

    pub fn source(self) -> Source {
        match self {
            ProcessedDataset::GlobalSnapshot
            | ProcessedDataset::Markets
            | ProcessedDataset::Categories
            | ProcessedDataset::TokenHistory
            | ProcessedDataset::MarketFeatures => Source::CoinGecko,
            ProcessedDataset::Protocols
            | ProcessedDataset::ProtocolTvl
            | ProcessedDataset::Chains
            | ProcessedDataset::Stablecoins
            | ProcessedDataset::ProtocolFeatures
            | ProcessedDataset::TvlFeatures => Source::DefiLlama,
            ProcessedDataset::DexPairs => Source::DexScreener,
        }
    }

    /// Raw datasets this file is built from. Feature files depend on other
    /// processed files instead and return an empty list.
    pub fn raw_inputs(self) -> &'static [Dataset] {
        match self {
            ProcessedDataset::GlobalSnapshot => &[Dataset::Global, Dataset::DefiGlobal],
            ProcessedDataset::Markets => &[Dataset::Markets],
            ProcessedDataset::Categories => &[Dataset::Categories],
            ProcessedDataset::TokenHistory => &[Dataset::TokenHistory],
            ProcessedDataset::Protocols => &[Dataset::Protocols],
            ProcessedDataset::ProtocolTvl => &[Dataset::ProtocolTvl],
            ProcessedDataset::Chains => &[Dataset::Chains],
            ProcessedDataset::Stablecoins => &[Dataset::Stablecoins],
            ProcessedDataset::DexPairs => &[Dataset::Pairs, Dataset::TokenPairs],
            ProcessedDataset::MarketFeatures
            | ProcessedDataset::ProtocolFeatures
            | ProcessedDataset::TvlFeatures => &[],
        }
    }

    /// How [`ProcessedDataset::raw_inputs`] combine.
    pub fn input_rule(self) -> InputRule {
        match self {
            ProcessedDataset::DexPairs => InputRule::Any,
            _ => InputRule::All,
        }
    }

    /// Raw inputs from `raw_inputs` absent from `available`, or an empty list
    /// when the file can be built.
    pub fn missing_inputs(self, available: &BTreeSet<Dataset>) -> Vec<Dataset> {
        let inputs = self.raw_inputs();
        let missing: Vec<Dataset> = inputs.iter().copied().filter(|d| !available.contains(d)).collect();
        match self.input_rule() {
            InputRule::All => missing,
            InputRule::Any if missing.len() < inputs.len() => Vec::new(),
            InputRule::Any => missing,
        }
    }

    /// Processed file a feature file is derived from.
    pub fn derived_from(self) -> Option<ProcessedDataset> {
        match self {
            ProcessedDataset::MarketFeatures => Some(ProcessedDataset::Markets),
            ProcessedDataset::ProtocolFeatures => Some(ProcessedDataset::Protocols),
            ProcessedDataset::TvlFeatures => Some(ProcessedDataset::ProtocolTvl),
            _ => None,
        }
    }

    /// Canonical files built straight from raw payloads for a source.
    pub fn for_source(source: Source) -> Vec<ProcessedDataset> {
        Self::ALL
            .into_iter()
            .filter(|d| d.source() == source && d.derived_from().is_none())
            .collect()
    }
}

impl fmt::Display for ProcessedDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

#[derive(Debug, Error)]
pub enum ProcessedError {
    #[error("processed I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("CSV error in {}: {source}", .path.display())]
    Csv { path: PathBuf, source: csv::Error },

    #[error("processed file not found: {}", .path.display())]
    Missing { path: PathBuf },
}

/// Reads and writes canonical CSV files.
#[derive(Debug, Clone)]
pub struct ProcessedStore {
    root: PathBuf,
}

impl ProcessedStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, dataset: ProcessedDataset) -> PathBuf {
        self.root.join(dataset.file_name())
    }

    /// Overwrite `dataset` with `rows`.
    pub fn write<T: Serialize>(&self, dataset: ProcessedDataset, rows: &[T]) -> Result<PathBuf, ProcessedError> {
        let path = self.path(dataset);
        write_csv_atomic(&path, rows)?;
        Ok(path)
    }

    pub fn read<T: DeserializeOwned>(&self, dataset: ProcessedDataset) -> Result<Vec<T>, ProcessedError> {
        let path = self.path(dataset);
        if !path.exists() {
            return Err(ProcessedError::Missing { path });
        }
        let csv_err = |source| ProcessedError::Csv {
            path: path.clone(),
            source,
        };
        let mut reader = csv::Reader::from_path(&path).map_err(csv_err)?;
        reader
            .deserialize()
            .collect::<Result<Vec<T>, _>>()
            .map_err(csv_err)
    }
}

/// Serialize rows to `{path}.tmp`, then rename over `path`.
pub fn write_csv_atomic<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), ProcessedError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ProcessedError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let tmp_path = path.with_extension("csv.tmp");
    let csv_err = |source| ProcessedError::Csv {
        path: tmp_path.clone(),
        source,
    };

    let mut writer = csv::Writer::from_path(&tmp_path).map_err(csv_err)?;
    for row in rows {
        writer.serialize(row).map_err(csv_err)?;
    }
    writer.flush().map_err(|source| ProcessedError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    drop(writer);

    fs::rename(&tmp_path, path).map_err(|source| {
        let _ = fs::remove_file(&tmp_path);
        ProcessedError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}
