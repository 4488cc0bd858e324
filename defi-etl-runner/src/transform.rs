//! Transform stage: newest raw artifacts → canonical CSV files.
//!
//! Each [`ProcessedDataset`] is built independently. A missing input or a
//! dataset with no valid records fails only that file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use defi_etl_core::features::{market_features, protocol_features, tvl_features};
use defi_etl_core::normalize::{
    normalize_categories, normalize_chains, normalize_dex_pairs, normalize_global,
    normalize_markets, normalize_protocol_tvl, normalize_protocols, normalize_stablecoins,
    normalize_token_history, NormalizeError, Normalized,
};
use defi_etl_core::records::{MarketRecord, ProtocolSnapshotRecord, ProtocolTvlRecord};
use defi_etl_core::{
    Dataset, DatasetKey, ProcessedDataset, ProcessedError, ProcessedStore, RawPayload, RawStore,
    RawStoreError, Source,
};

use crate::report::{DatasetReport, RunStage};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("no raw artifact for {0}")]
    MissingRaw(String),

    #[error(transparent)]
    Raw(#[from] RawStoreError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Processed(#[from] ProcessedError),
}

/// A canonical file that was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub dataset: ProcessedDataset,
    pub path: PathBuf,
    pub rows: usize,
    pub rejected: usize,
}

/// Canonical files for `transform <source>`, in build order. `None` means all
/// sources; feature files are always included then.
pub fn transform_plan(source: Option<Source>, features: bool) -> Vec<ProcessedDataset> {
    match source {
        None => ProcessedDataset::ALL.to_vec(),
        Some(source) => ProcessedDataset::ALL
            .into_iter()
            .filter(|d| d.source() == source)
            .filter(|d| features || d.derived_from().is_none())
            .collect(),
    }
}

pub struct Transformer<'a> {
    raw: &'a RawStore,
    processed: &'a ProcessedStore,
    /// When set, only these raw files count as available.
    fresh: Option<BTreeSet<PathBuf>>,
}

impl<'a> Transformer<'a> {
    pub fn new(raw: &'a RawStore, processed: &'a ProcessedStore) -> Self {
        Self {
            raw,
            processed,
            fresh: None,
        }
    }

    /// Restrict inputs to raw files written in the current run.
    pub fn only(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.fresh = Some(paths.into_iter().collect());
        self
    }

    /// Build every dataset, best-effort. One report per dataset, in input order.
    pub fn run(&self, datasets: &[ProcessedDataset]) -> Vec<DatasetReport> {
        datasets.iter().map(|&dataset| self.report(dataset)).collect()
    }

    /// [`Transformer::build`] folded into a report.
    pub fn report(&self, dataset: ProcessedDataset) -> DatasetReport {
        match self.build(dataset) {
            Ok(done) => DatasetReport::succeeded(
                RunStage::Normalizing,
                dataset.file_name(),
                done.path,
                done.rows,
                done.rejected,
            ),
            Err(err) => {
                warn!(dataset = %dataset, error = %err, "transform failed");
                DatasetReport::failed(RunStage::Normalizing, dataset.file_name(), &err)
            }
        }
    }

    pub fn build(&self, dataset: ProcessedDataset) -> Result<Transformed, TransformError> {
        let name = dataset.file_name();
        match dataset {
            ProcessedDataset::GlobalSnapshot => {
                let global = self.require(Dataset::Global)?;
                let defi = self.require(Dataset::DefiGlobal)?;
                self.publish(dataset, normalize_global(&global, &defi)?)
            }
            ProcessedDataset::Markets => {
                let markets = self.require(Dataset::Markets)?;
                let categories = self.latest(&DatasetKey::new(Dataset::Categories))?;
                self.publish(dataset, normalize_markets(&markets, categories.as_ref())?)
            }
            ProcessedDataset::Categories => {
                let payload = self.require(Dataset::Categories)?;
                self.publish(dataset, normalize_categories(&payload)?)
            }
            ProcessedDataset::TokenHistory => {
                let payloads = self.require_all(&[Dataset::TokenHistory])?;
                self.publish(dataset, normalize_token_history(&payloads)?)
            }
            ProcessedDataset::Protocols => {
                let payload = self.require(Dataset::Protocols)?;
                self.publish(dataset, normalize_protocols(&payload)?)
            }
            ProcessedDataset::ProtocolTvl => {
                let payloads = self.require_all(&[Dataset::ProtocolTvl])?;
                self.publish(dataset, normalize_protocol_tvl(&payloads)?)
            }
            ProcessedDataset::Chains => {
                let payload = self.require(Dataset::Chains)?;
                self.publish(dataset, normalize_chains(&payload)?)
            }
            ProcessedDataset::Stablecoins => {
                let payload = self.require(Dataset::Stablecoins)?;
                self.publish(dataset, normalize_stablecoins(&payload)?)
            }
            ProcessedDataset::DexPairs => {
                let payloads = self.require_all(&[Dataset::Pairs, Dataset::TokenPairs])?;
                self.publish(dataset, normalize_dex_pairs(&payloads)?)
            }
            ProcessedDataset::MarketFeatures => {
                let markets: Vec<MarketRecord> = self.processed.read(ProcessedDataset::Markets)?;
                let rows = market_features(&markets);
                self.write(dataset, &rows, 0)
                    .map(|t| log_written(name, t))
            }
            ProcessedDataset::ProtocolFeatures => {
                let protocols: Vec<ProtocolSnapshotRecord> = self.processed.read(ProcessedDataset::Protocols)?;
                let rows = protocol_features(&protocols);
                self.write(dataset, &rows, 0)
                    .map(|t| log_written(name, t))
            }
            ProcessedDataset::TvlFeatures => {
                let tvl: Vec<ProtocolTvlRecord> = self.processed.read(ProcessedDataset::ProtocolTvl)?;
                let rows = tvl_features(&tvl);
                self.write(dataset, &rows, 0)
                    .map(|t| log_written(name, t))
            }
        }
    }

    fn publish<T: Serialize>(
        &self,
        dataset: ProcessedDataset,
        normalized: Normalized<T>,
    ) -> Result<Transformed, TransformError> {
        let normalized = normalized.non_empty(dataset.file_name())?;
        let done = self.write(dataset, &normalized.records, normalized.rejected.len())?;
        Ok(log_written(dataset.file_name(), done))
    }

    fn write<T: Serialize>(
        &self,
        dataset: ProcessedDataset,
        rows: &[T],
        rejected: usize,
    ) -> Result<Transformed, TransformError> {
        let path = self.processed.write(dataset, rows)?;
        Ok(Transformed {
            dataset,
            path,
            rows: rows.len(),
            rejected,
        })
    }

    fn is_fresh(&self, path: &Path) -> bool {
        self.fresh.as_ref().map_or(true, |fresh| fresh.contains(path))
    }

    fn latest(&self, key: &DatasetKey) -> Result<Option<RawPayload>, TransformError> {
        Ok(self
            .raw
            .latest(key)?
            .filter(|(path, _)| self.is_fresh(path))
            .map(|(_, payload)| payload))
    }

    fn require(&self, dataset: Dataset) -> Result<RawPayload, TransformError> {
        let key = DatasetKey::new(dataset);
        self.latest(&key)?
            .ok_or_else(|| TransformError::MissingRaw(key.to_string()))
    }

    /// Newest payload per qualifier for every dataset in `datasets`, which
    /// must together contribute at least one payload.
    fn require_all(&self, datasets: &[Dataset]) -> Result<Vec<RawPayload>, TransformError> {
        let mut payloads = Vec::new();
        for &dataset in datasets {
            for (path, payload) in self.raw.latest_per_qualifier(dataset)? {
                if self.is_fresh(&path) {
                    payloads.push(payload);
                }
            }
        }
        if payloads.is_empty() {
            let names: Vec<String> = datasets
                .iter()
                .map(|d| format!("{}/{}@*", d.source(), d.slug()))
                .collect();
            return Err(TransformError::MissingRaw(names.join(", ")));
        }
        Ok(payloads)
    }
}

fn log_written(name: &str, done: Transformed) -> Transformed {
    info!(
        dataset = name,
        rows = done.rows,
        rejected = done.rejected,
        path = %done.path.display(),
        "canonical file written"
    );
    done
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_per_source() {
        assert_eq!(
            transform_plan(Some(Source::DexScreener), true),
            vec![ProcessedDataset::DexPairs]
        );
        let cg = transform_plan(Some(Source::CoinGecko), false);
        assert!(cg.contains(&ProcessedDataset::Markets));
        assert!(!cg.contains(&ProcessedDataset::MarketFeatures));
        let cg = transform_plan(Some(Source::CoinGecko), true);
        assert_eq!(cg.last(), Some(&ProcessedDataset::MarketFeatures));
        assert_eq!(transform_plan(None, false).len(), ProcessedDataset::ALL.len());
    }
}
