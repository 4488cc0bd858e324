//! Pipeline driver: Extract → Normalize → Export.
//!
//! Each CLI command runs one or all stages and returns a [`RunSummary`].
//! `quickrun` gates every step on what the previous step produced in the
//! same run, so stale files from an earlier run never reach the dashboard.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

use defi_etl_core::http::Transport;
use defi_etl_core::schema::ExportFile;
use defi_etl_core::{
    Dataset, DatasetKey, FetchError, InputRule, ProcessedDataset, ProcessedStore, RawStore, Source,
};

use crate::config::{ConfigError, Settings};
use crate::export::TableauExporter;
use crate::extract::{keys_for, Clients, Extractor};
use crate::report::{DatasetReport, RunStage, RunSummary};
use crate::transform::Transformer;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot build HTTP client: {0}")]
    Http(#[from] FetchError),
}

/// Name used in the summary for the export step as a whole.
pub const EXPORT_STEP: &str = "tableau";

pub struct Pipeline {
    settings: Settings,
    clients: Clients,
    raw: RawStore,
    processed: ProcessedStore,
}

impl Pipeline {
    pub fn new(settings: Settings) -> Result<Self, PipelineError> {
        settings.validate()?;
        let clients = Clients::from_settings(&settings)?;
        Ok(Self::with_clients(settings, clients))
    }

    pub fn with_transport(settings: Settings, transport: Arc<dyn Transport>) -> Self {
        let clients = Clients::with_transport(&settings, transport);
        Self::with_clients(settings, clients)
    }

    fn with_clients(settings: Settings, clients: Clients) -> Self {
        Self {
            raw: RawStore::new(&settings.paths.raw_dir),
            processed: ProcessedStore::new(&settings.paths.processed_dir),
            settings,
            clients,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn raw_store(&self) -> &RawStore {
        &self.raw
    }

    pub fn processed_store(&self) -> &ProcessedStore {
        &self.processed
    }

    pub fn exporter(&self) -> TableauExporter {
        TableauExporter::new(
            &self.settings.paths.processed_dir,
            &self.settings.paths.export_dir,
            &self.settings.export,
        )
    }

    /// `extract <source>`: fetch the given datasets.
    pub fn extract(&self, datasets: &[Dataset]) -> RunSummary {
        let mut summary = RunSummary::new();
        summary.enter(RunStage::Extracting);
        self.run_extract(datasets, &mut summary);
        summary.finish();
        summary
    }

    /// `transform <target>`: rebuild canonical files from the newest raw files.
    pub fn transform(&self, plan: &[ProcessedDataset]) -> RunSummary {
        let mut summary = RunSummary::new();
        summary.enter(RunStage::Normalizing);
        summary.extend(Transformer::new(&self.raw, &self.processed).run(plan));
        summary.finish();
        summary
    }

    /// `load tableau`: export from the current canonical files.
    pub fn export(&self) -> RunSummary {
        let mut summary = RunSummary::new();
        summary.enter(RunStage::Exporting);
        self.run_export(&mut summary);
        summary.finish();
        summary
    }

    /// Every stage for every source.
    pub fn quickrun(&self) -> RunSummary {
        let mut summary = RunSummary::new();

        summary.advance();
        let datasets: Vec<Dataset> = Source::ALL
            .iter()
            .flat_map(|s| s.datasets().iter().copied())
            .collect();
        let (extracted, fresh) = self.run_extract(&datasets, &mut summary);

        summary.advance();
        let produced = self.run_gated_transform(&ProcessedDataset::ALL, &extracted, fresh, &mut summary);

        summary.advance();
        let missing: Vec<&str> = ExportFile::ALL
            .iter()
            .map(|f| f.input())
            .filter(|d| !produced.contains(d))
            .map(|d| d.file_name())
            .collect();
        if missing.is_empty() {
            self.run_export(&mut summary);
        } else {
            let reason = format!("not produced in this run: {}", missing.join(", "));
            error!(%reason, "export aborted");
            summary.push(DatasetReport::failed(RunStage::Exporting, EXPORT_STEP, reason));
            summary.fail();
        }

        summary.finish();
        summary
    }

    /// `extract defillama --historical-tvl`: fetch the protocol listing, then
    /// the TVL history of every listed protocol (the first `max_protocols`
    /// when set), and rebuild the protocol files from exactly those payloads.
    pub fn historical_tvl(&self, max_protocols: Option<usize>) -> RunSummary {
        let mut summary = RunSummary::new();

        summary.advance();
        let (mut extracted, mut fresh) = self.run_extract(&[Dataset::Protocols], &mut summary);
        if !extracted.contains(&Dataset::Protocols) {
            summary.finish();
            return summary;
        }
        let listing = match self.raw.require_latest(&DatasetKey::new(Dataset::Protocols)) {
            Ok((_, payload)) => payload,
            Err(err) => {
                error!(error = %err, "protocol listing unreadable");
                summary.push(DatasetReport::failed(RunStage::Extracting, "defillama/protocols", &err));
                summary.finish();
                return summary;
            }
        };
        let keys: Vec<DatasetKey> = protocol_slugs(&listing.data, max_protocols)
            .into_iter()
            .map(|slug| DatasetKey::qualified(Dataset::ProtocolTvl, slug))
            .collect();
        let (more, paths) = self.run_keys(&keys, &mut summary);
        extracted.extend(more);
        fresh.extend(paths);

        summary.advance();
        let plan = [
            ProcessedDataset::Protocols,
            ProcessedDataset::ProtocolTvl,
            ProcessedDataset::ProtocolFeatures,
            ProcessedDataset::TvlFeatures,
        ];
        self.run_gated_transform(&plan, &extracted, fresh, &mut summary);

        summary.finish();
        summary
    }

    /// Returns the datasets with at least one successful key and the raw
    /// files written.
    fn run_extract(
        &self,
        datasets: &[Dataset],
        summary: &mut RunSummary,
    ) -> (BTreeSet<Dataset>, BTreeSet<PathBuf>) {
        self.run_keys(&keys_for(&self.settings, datasets), summary)
    }

    fn run_keys(
        &self,
        keys: &[DatasetKey],
        summary: &mut RunSummary,
    ) -> (BTreeSet<Dataset>, BTreeSet<PathBuf>) {
        info!(keys = keys.len(), "extracting");
        let extractor = Extractor::new(&self.clients, &self.raw, &self.settings);

        let mut extracted = BTreeSet::new();
        let mut fresh = BTreeSet::new();
        for (key, report) in extractor.run(keys) {
            if let (true, Some(path)) = (report.is_success(), &report.path) {
                extracted.insert(key.dataset);
                fresh.insert(path.clone());
            }
            summary.push(report);
        }
        (extracted, fresh)
    }

    /// Build `plan` in order from the `fresh` raw files, skipping what
    /// [`gate`] blocks. Returns the files produced.
    fn run_gated_transform(
        &self,
        plan: &[ProcessedDataset],
        extracted: &BTreeSet<Dataset>,
        fresh: BTreeSet<PathBuf>,
        summary: &mut RunSummary,
    ) -> BTreeSet<ProcessedDataset> {
        let transformer = Transformer::new(&self.raw, &self.processed).only(fresh);
        let mut produced = BTreeSet::new();
        for &dataset in plan {
            let report = match gate(dataset, extracted, &produced) {
                Some(reason) => {
                    info!(dataset = %dataset, %reason, "transform skipped");
                    DatasetReport::skipped(RunStage::Normalizing, dataset.file_name(), reason)
                }
                None => transformer.report(dataset),
            };
            if report.is_success() {
                produced.insert(dataset);
            }
            summary.push(report);
        }
        produced
    }

    fn run_export(&self, summary: &mut RunSummary) {
        match self.exporter().export_all() {
            Ok(files) => {
                for f in files {
                    summary.push(DatasetReport::succeeded(
                        RunStage::Exporting,
                        f.file.file_name(),
                        f.path,
                        f.rows,
                        0,
                    ));
                }
            }
            Err(err) => {
                error!(error = %err, "export failed");
                summary.push(DatasetReport::failed(RunStage::Exporting, EXPORT_STEP, &err));
                summary.fail();
            }
        }
    }
}

/// Slugs of a `/protocols` listing in listing order, without blanks or
/// repeats, capped at `max`.
fn protocol_slugs(listing: &Value, max: Option<usize>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    listing
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter_map(|p| p.get("slug").and_then(Value::as_str))
        .map(str::trim)
        .filter(|slug| !slug.is_empty() && seen.insert(slug.to_string()))
        .take(max.unwrap_or(usize::MAX))
        .map(str::to_string)
        .collect()
}

/// Why `dataset` must not be built in this run, if it must not.
fn gate(
    dataset: ProcessedDataset,
    extracted: &BTreeSet<Dataset>,
    produced: &BTreeSet<ProcessedDataset>,
) -> Option<String> {
    if let Some(input) = dataset.derived_from() {
        if !produced.contains(&input) {
            return Some(format!("{input} was not produced in this run"));
        }
    }
    let missing: Vec<&str> = dataset.missing_inputs(extracted).iter().map(|d| d.slug()).collect();
    if missing.is_empty() {
        return None;
    }
    let reason = match dataset.input_rule() {
        InputRule::All => "raw input not extracted in this run",
        InputRule::Any => "none of the raw inputs extracted in this run",
    };
    Some(format!("{reason}: {}", missing.join(", ")))
}
