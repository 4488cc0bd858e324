//! Tableau export: canonical CSV files → the four dashboard files.
//!
//! Every export file is built in memory first (read, column check, lazy
//! reshape); only when all of them succeed are they written, each through a
//! temp file and rename. A schema mismatch or missing input therefore leaves
//! the export directory untouched. A `README.md` connection guide is written
//! last.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};
use polars::prelude::*;
use thiserror::Error;
use tracing::info;

use defi_etl_core::schema::{ColumnKind, ExportFile};

use crate::config::ExportSettings;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export schema mismatch for {file}: missing column(s) {}", .missing.join(", "))]
    SchemaMismatch { file: String, missing: Vec<String> },

    #[error("export input missing: {}", .path.display())]
    MissingInput { path: PathBuf },

    #[error("dataframe error while building {file}: {source}")]
    Frame { file: String, source: PolarsError },

    #[error("export I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Connection guide written next to the export files.
pub const README_FILE: &str = "README.md";

/// One written export file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub file: ExportFile,
    pub path: PathBuf,
    pub rows: usize,
}

pub struct TableauExporter {
    processed_dir: PathBuf,
    export_dir: PathBuf,
    markets_top_n: usize,
    tvl_window_days: u32,
}

impl TableauExporter {
    pub fn new(
        processed_dir: impl Into<PathBuf>,
        export_dir: impl Into<PathBuf>,
        settings: &ExportSettings,
    ) -> Self {
        Self {
            processed_dir: processed_dir.into(),
            export_dir: export_dir.into(),
            markets_top_n: settings.markets_top_n,
            tvl_window_days: settings.tvl_window_days,
        }
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    /// Build all four files, then write them.
    pub fn export_all(&self) -> Result<Vec<ExportedFile>, ExportError> {
        let mut frames = Vec::with_capacity(ExportFile::ALL.len());
        for file in ExportFile::ALL {
            frames.push((file, self.build(file)?));
        }

        fs::create_dir_all(&self.export_dir).map_err(|source| ExportError::Io {
            path: self.export_dir.clone(),
            source,
        })?;

        let mut written = Vec::with_capacity(frames.len());
        for (file, mut df) in frames {
            let path = self.export_dir.join(file.file_name());
            write_frame_atomic(file, &path, &mut df)?;
            info!(file = file.file_name(), rows = df.height(), "export written");
            written.push(ExportedFile {
                file,
                path,
                rows: df.height(),
            });
        }

        let readme = self.export_dir.join(README_FILE);
        write_text_atomic(&readme, &self.readme())?;
        info!(path = %readme.display(), "connection guide written");
        Ok(written)
    }

    /// The finished frame for one export file.
    pub fn build(&self, file: ExportFile) -> Result<DataFrame, ExportError> {
        let frame_err = |source| ExportError::Frame {
            file: file.file_name().to_string(),
            source,
        };

        let input = self.processed_dir.join(file.input().file_name());
        if !input.exists() {
            return Err(ExportError::MissingInput { path: input });
        }
        let mut lf = LazyCsvReader::new(&input)
            .with_has_header(true)
            .with_infer_schema_length(None)
            .finish()
            .map_err(frame_err)?;

        let schema = lf.collect_schema().map_err(frame_err)?;
        let available: Vec<String> = schema.iter_names().map(|n| n.to_string()).collect();
        let missing = file.missing_columns(&available);
        if !missing.is_empty() {
            return Err(ExportError::SchemaMismatch {
                file: file.file_name().to_string(),
                missing,
            });
        }

        let lf = match file {
            ExportFile::MarketsTop => lf
                .sort(
                    ["market_cap"],
                    SortMultipleOptions::default()
                        .with_order_descending(true)
                        .with_nulls_last(true)
                        .with_maintain_order(true),
                )
                .limit(self.markets_top_n as IdxSize),
            ExportFile::TvlProtocols => {
                let window = self.tvl_window(lf.clone()).map_err(frame_err)?;
                let lf = match window {
                    Some(cutoff) => lf.filter(
                        col("date")
                            .cast(DataType::String)
                            .gt_eq(lit(cutoff.format("%Y-%m-%d").to_string())),
                    ),
                    None => lf,
                };
                lf.sort(
                    ["date", "protocol_name", "chain"],
                    SortMultipleOptions::default().with_maintain_order(true),
                )
            }
            ExportFile::KpiSnapshot | ExportFile::CategoriesSnapshot => lf,
        };

        lf.select(select_exprs(file)).collect().map_err(frame_err)
    }

    /// First date inside the trailing window that ends at the newest `date`.
    fn tvl_window(&self, lf: LazyFrame) -> PolarsResult<Option<NaiveDate>> {
        let newest = lf
            .select([col("date").cast(DataType::String).max()])
            .collect()?;
        let newest = newest
            .column("date")?
            .as_materialized_series()
            .str()?
            .get(0)
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
        Ok(newest.map(|d| {
            d.checked_sub_signed(Duration::days(i64::from(self.tvl_window_days) - 1))
                .unwrap_or(NaiveDate::MIN)
        }))
    }

    /// Connection guide for the dashboard author: every export file, what it
    /// holds and its columns.
    pub fn readme(&self) -> String {
        let mut out = String::from("# Tableau Data Sources\n\n");
        out.push_str("Connect with **Data > Connect > Text file** and pick a CSV from this folder.\n");
        out.push_str("Files are replaced in place on every export; use **Data > Refresh** to reload.\n\n");
        for (i, file) in ExportFile::ALL.iter().enumerate() {
            out.push_str(&format!("## {}. {}\n\n", i + 1, file.file_name()));
            out.push_str(&format!("{}\n\n", self.purpose(*file)));
            out.push_str(&format!("Built from `{}`.\n\n", file.input().file_name()));
            out.push_str("| Column | Source | Unit |\n| --- | --- | --- |\n");
            for c in file.columns() {
                let unit = match c.kind {
                    ColumnKind::Copy => "as published",
                    ColumnKind::Billions => "USD billions",
                };
                out.push_str(&format!("| `{}` | `{}` | {} |\n", c.output, c.source, unit));
            }
            out.push('\n');
        }
        out.push_str("## Notes\n\n");
        out.push_str("- Monetary values are USD unless the column says billions.\n");
        out.push_str("- Percentage changes are in percent (5.0 = 5%).\n");
        out.push_str("- Empty cells mean the upstream API did not report the value.\n");
        out
    }

    fn purpose(&self, file: ExportFile) -> String {
        match file {
            ExportFile::KpiSnapshot => {
                "Market-wide KPIs: total market cap and volume, BTC/ETH dominance, DeFi market cap and dominance. \
                 One row per snapshot; suited to KPI cards."
                    .to_string()
            }
            ExportFile::MarketsTop => format!(
                "The {} largest coins by market cap with price changes and volume; suited to top-mover tables and heatmaps.",
                self.markets_top_n
            ),
            ExportFile::CategoriesSnapshot => {
                "Market cap per sector and its share of the total; suited to pie and bar charts.".to_string()
            }
            ExportFile::TvlProtocols => format!(
                "Daily TVL per protocol and chain over the last {} days of data; suited to line and area charts.",
                self.tvl_window_days
            ),
        }
    }
}

fn select_exprs(file: ExportFile) -> Vec<Expr> {
    file.columns()
        .iter()
        .map(|c| match c.kind {
            ColumnKind::Copy => col(c.source).alias(c.output),
            ColumnKind::Billions => (col(c.source).cast(DataType::Float64) / lit(1e9)).alias(c.output),
        })
        .collect()
}

fn write_text_atomic(path: &Path, text: &str) -> Result<(), ExportError> {
    let tmp_path = path.with_extension("md.tmp");
    fs::write(&tmp_path, text).map_err(|source| ExportError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    fs::rename(&tmp_path, path).map_err(|source| {
        let _ = fs::remove_file(&tmp_path);
        ExportError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn write_frame_atomic(file: ExportFile, path: &Path, df: &mut DataFrame) -> Result<(), ExportError> {
    let tmp_path = path.with_extension("csv.tmp");
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ExportError::Io { path, source }
    };

    let mut out = fs::File::create(&tmp_path).map_err(io_err(&tmp_path))?;
    CsvWriter::new(&mut out)
        .include_header(true)
        .finish(df)
        .map_err(|source| ExportError::Frame {
            file: file.file_name().to_string(),
            source,
        })?;
    out.sync_all().map_err(io_err(&tmp_path))?;
    drop(out);

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        io_err(path)(e)
    })
}
