//! defi-etl runner: the three pipeline stages and what drives them.
//!
//! This crate builds on `defi-etl-core` to provide:
//! - Layered settings (TOML file, then environment) ([`config`])
//! - Extraction of every configured dataset into the raw store ([`extract`])
//! - Normalization runs from raw artifacts to canonical CSV files ([`transform`])
//! - The Tableau export over canonical files ([`export`])
//! - Per-dataset run summaries ([`report`]) and the stage driver ([`pipeline`])

pub mod config;
pub mod export;
pub mod extract;
pub mod pipeline;
pub mod report;
pub mod transform;

pub use config::{ConfigError, Settings};
pub use export::{ExportError, ExportedFile, TableauExporter, README_FILE};
pub use extract::{keys_for, Clients, ExtractionError, Extractor};
pub use pipeline::{Pipeline, PipelineError};
pub use report::{DatasetReport, Outcome, RunStage, RunSummary};
pub use transform::{transform_plan, TransformError, Transformed, Transformer};
