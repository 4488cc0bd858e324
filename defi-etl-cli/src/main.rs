//! defi-etl CLI: extract, transform, load and raw-store commands.
//!
//! Commands:
//! - `extract <source>`: fetch raw JSON from CoinGecko, DefiLlama or DexScreener
//!   (`extract defillama --historical-tvl` walks every listed protocol)
//! - `transform <target>`: rebuild canonical CSV files from the newest raw files
//! - `load tableau`: write the four dashboard files
//! - `quickrun`: all of the above for every source
//! - `raw status` / `raw prune`: inspect and trim the raw store

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use defi_etl_core::{Dataset, RawStore, Source};
use defi_etl_runner::pipeline::EXPORT_STEP;
use defi_etl_runner::{transform_plan, Outcome, Pipeline, RunStage, RunSummary, Settings};

#[derive(Parser)]
#[command(
    name = "defi-etl",
    about = "DeFi BI-ETL: CoinGecko, DefiLlama and DexScreener to Tableau-ready CSV"
)]
struct Cli {
    /// Settings file (TOML). Defaults to config/settings.toml when present.
    #[arg(long, global = true, env = "DEFI_ETL_SETTINGS")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch raw data from one source into the raw store.
    Extract {
        #[command(subcommand)]
        source: ExtractSource,
    },
    /// Rebuild canonical CSV files from the newest raw artifacts.
    Transform {
        /// Which source's files to rebuild.
        target: TransformTarget,

        /// Also rebuild the feature-engineered files.
        #[arg(long, default_value_t = false)]
        features: bool,
    },
    /// Export canonical files to a BI target.
    Load {
        #[command(subcommand)]
        target: LoadTarget,
    },
    /// Extract, transform and export every source in one run.
    Quickrun,
    /// Raw artifact management.
    Raw {
        #[command(subcommand)]
        action: RawAction,
    },
}

/// With no dataset flags, every dataset of the source is fetched.
#[derive(Subcommand)]
enum ExtractSource {
    Coingecko {
        #[arg(long)]
        all: bool,
        /// Global market snapshot.
        #[arg(long)]
        global: bool,
        /// Global DeFi snapshot.
        #[arg(long)]
        defi: bool,
        #[arg(long)]
        categories: bool,
        /// Paged `/coins/markets`.
        #[arg(long)]
        markets: bool,
        /// Daily market chart per token id.
        #[arg(long)]
        history: bool,
        #[arg(long)]
        trending: bool,

        /// Number of market pages to fetch.
        #[arg(long)]
        pages: Option<u32>,

        /// Token ids for `--history` (comma-separated).
        #[arg(long, value_delimiter = ',')]
        token_ids: Option<Vec<String>>,

        /// Days of history per token.
        #[arg(long)]
        days: Option<u32>,
    },
    Defillama {
        #[arg(long)]
        all: bool,
        /// Overview of all protocols.
        #[arg(long, visible_alias = "tvl")]
        protocols: bool,
        #[arg(long)]
        chains: bool,
        /// Per-protocol TVL history; optional comma-separated slugs override the settings.
        #[arg(long, num_args = 0.., value_delimiter = ',')]
        protocol_tvl: Option<Vec<String>>,
        #[arg(long)]
        stablecoins: bool,
        #[arg(long)]
        bridges: bool,
        #[arg(long)]
        yields: bool,

        /// TVL history for every listed protocol instead of the configured slugs.
        #[arg(long, conflicts_with_all = ["protocol_tvl", "all"])]
        historical_tvl: bool,

        /// Cap for `--historical-tvl`, in listing order.
        #[arg(long, requires = "historical_tvl")]
        max_protocols: Option<usize>,
    },
    Dexscreener {
        #[arg(long)]
        all: bool,
        /// Pair search per chain.
        #[arg(long)]
        pairs: bool,
        /// Pairs per configured token address.
        #[arg(long)]
        token_pairs: bool,

        /// Chains to search (comma-separated).
        #[arg(long, value_delimiter = ',')]
        chains: Option<Vec<String>>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TransformTarget {
    All,
    Coingecko,
    Defillama,
    Dexscreener,
}

impl TransformTarget {
    fn source(self) -> Option<Source> {
        match self {
            TransformTarget::All => None,
            TransformTarget::Coingecko => Some(Source::CoinGecko),
            TransformTarget::Defillama => Some(Source::DefiLlama),
            TransformTarget::Dexscreener => Some(Source::DexScreener),
        }
    }
}

#[derive(Subcommand)]
enum LoadTarget {
    /// Write kpi_snapshot, markets_top, categories_snapshot and tvl_protocols_30d.
    Tableau,
}

#[derive(Subcommand)]
enum RawAction {
    /// Files, newest timestamp and size per raw dataset.
    Status,
    /// Delete all but the newest raw files per dataset.
    Prune {
        /// Raw files to keep per dataset and qualifier.
        #[arg(long)]
        keep: usize,

        /// Actually delete (without this flag, only previews what would be removed).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.settings.as_deref()).context("loading settings")?;
    init_logging(&settings.logging.level);

    match cli.command {
        Commands::Extract { source } => {
            let run = apply_extract_args(&mut settings, source);
            let pipeline = Pipeline::new(settings)?;
            finish(&match run {
                ExtractRun::Datasets(datasets) => pipeline.extract(&datasets),
                ExtractRun::HistoricalTvl { max_protocols } => pipeline.historical_tvl(max_protocols),
            })
        }
        Commands::Transform { target, features } => {
            let plan = transform_plan(target.source(), features);
            let pipeline = Pipeline::new(settings)?;
            finish(&pipeline.transform(&plan))
        }
        Commands::Load {
            target: LoadTarget::Tableau,
        } => finish(&Pipeline::new(settings)?.export()),
        Commands::Quickrun => finish(&Pipeline::new(settings)?.quickrun()),
        Commands::Raw { action } => {
            let store = RawStore::new(&settings.paths.raw_dir);
            match action {
                RawAction::Status => run_raw_status(&store),
                RawAction::Prune { keep, confirm } => run_raw_prune(&store, keep, confirm),
            }
        }
    }
}

/// `DEFI_ETL_LOG`, then `RUST_LOG`, then the settings file's level.
fn init_logging(default_level: &str) {
    let filter = ["DEFI_ETL_LOG", "RUST_LOG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|v| !v.trim().is_empty())
        .and_then(|v| EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[derive(Debug, PartialEq, Eq)]
enum ExtractRun {
    Datasets(Vec<Dataset>),
    HistoricalTvl { max_protocols: Option<usize> },
}

/// Fold the source's flags into `settings` and decide what to fetch.
fn apply_extract_args(settings: &mut Settings, source: ExtractSource) -> ExtractRun {
    let datasets = match source {
        ExtractSource::Coingecko {
            all,
            global,
            defi,
            categories,
            markets,
            history,
            trending,
            pages,
            token_ids,
            days,
        } => {
            let cg = &mut settings.coingecko;
            if let Some(pages) = pages {
                cg.pages = pages;
            }
            if let Some(ids) = token_ids {
                cg.token_ids = ids;
            }
            if let Some(days) = days {
                cg.history_days = days;
            }
            selected(
                all,
                &[
                    (global, Dataset::Global),
                    (defi, Dataset::DefiGlobal),
                    (categories, Dataset::Categories),
                    (markets, Dataset::Markets),
                    (history, Dataset::TokenHistory),
                    (trending, Dataset::Trending),
                ],
            )
        }
        ExtractSource::Defillama {
            all,
            protocols,
            chains,
            protocol_tvl,
            stablecoins,
            bridges,
            yields,
            historical_tvl,
            max_protocols,
        } => {
            if historical_tvl {
                return ExtractRun::HistoricalTvl { max_protocols };
            }
            let tvl = protocol_tvl.is_some();
            if let Some(slugs) = protocol_tvl.filter(|s| !s.is_empty()) {
                settings.defillama.protocols = slugs;
            }
            selected(
                all,
                &[
                    (protocols, Dataset::Protocols),
                    (tvl, Dataset::ProtocolTvl),
                    (chains, Dataset::Chains),
                    (stablecoins, Dataset::Stablecoins),
                    (bridges, Dataset::Bridges),
                    (yields, Dataset::Yields),
                ],
            )
        }
        ExtractSource::Dexscreener {
            all,
            pairs,
            token_pairs,
            chains,
        } => {
            if let Some(chains) = chains {
                settings.dexscreener.chains = chains;
            }
            selected(
                all,
                &[(pairs, Dataset::Pairs), (token_pairs, Dataset::TokenPairs)],
            )
        }
    };
    ExtractRun::Datasets(datasets)
}

fn selected(all: bool, flags: &[(bool, Dataset)]) -> Vec<Dataset> {
    let any = flags.iter().any(|(on, _)| *on);
    flags
        .iter()
        .filter(|(on, _)| all || !any || *on)
        .map(|(_, dataset)| *dataset)
        .collect()
}

/// Print the summary; an export failure is an error, any other failure exits 1.
fn finish(summary: &RunSummary) -> Result<()> {
    print_summary(summary);

    if let Some(export) = summary
        .failures()
        .find(|d| d.stage == RunStage::Exporting)
    {
        bail!(
            "{} export failed: {}",
            if export.name == EXPORT_STEP { "Tableau" } else { export.name.as_str() },
            export.error.as_deref().unwrap_or("unknown error")
        );
    }

    if !summary.succeeded() {
        for failed in summary.failures() {
            eprintln!(
                "Error for {}: {}",
                failed.name,
                failed.error.as_deref().unwrap_or("unknown error")
            );
        }
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("=== Run Summary ===");
    println!(
        "{:<10} {:<40} {:<8} {:>8} {:>8}",
        "Stage", "Dataset", "Outcome", "Rows", "Rejected"
    );
    println!("{}", "-".repeat(78));
    for d in &summary.datasets {
        let (rows, rejected) = match (d.stage, d.outcome) {
            (RunStage::Extracting, _) | (_, Outcome::Failed | Outcome::Skipped) => {
                ("-".to_string(), "-".to_string())
            }
            _ => (d.rows.to_string(), d.rejected.to_string()),
        };
        println!(
            "{:<10} {:<40} {:<8} {:>8} {:>8}",
            d.stage.to_string(),
            d.name,
            d.outcome.to_string(),
            rows,
            rejected
        );
    }

    let skipped: Vec<_> = summary
        .datasets
        .iter()
        .filter(|d| d.outcome == Outcome::Skipped)
        .collect();
    if !skipped.is_empty() {
        println!();
        for d in skipped {
            println!("Skipped {}: {}", d.name, d.error.as_deref().unwrap_or(""));
        }
    }

    println!();
    let elapsed = summary
        .finished_at
        .map(|end| (end - summary.started_at).num_milliseconds() as f64 / 1000.0)
        .unwrap_or_default();
    println!("Run {} in {elapsed:.1}s", summary.stage);
    println!();
}

fn run_raw_status(store: &RawStore) -> Result<()> {
    if !store.root().exists() {
        println!("Raw directory does not exist: {}", store.root().display());
        return Ok(());
    }

    let rows = store.status()?;
    if rows.is_empty() {
        println!("Raw store is empty: {}", store.root().display());
        return Ok(());
    }

    let total: u64 = rows.iter().map(|r| r.bytes).sum();
    let files: usize = rows.iter().map(|r| r.files).sum();
    println!("Raw store: {}", store.root().display());
    println!("Files: {files}");
    println!("Total size: {}", format_size(total));
    println!();
    println!(
        "{:<12} {:<48} {:>6} {:<20} {:>10}",
        "Source", "Dataset", "Files", "Latest", "Size"
    );
    println!("{}", "-".repeat(100));
    for row in &rows {
        let latest = row
            .latest
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<12} {:<48} {:>6} {:<20} {:>10}",
            row.source.to_string(),
            row.stem,
            row.files,
            latest,
            format_size(row.bytes)
        );
    }
    Ok(())
}

fn run_raw_prune(store: &RawStore, keep: usize, confirm: bool) -> Result<()> {
    if keep == 0 {
        bail!("--keep must be at least 1; the newest file per dataset is always kept");
    }
    if !store.root().exists() {
        println!("Raw directory does not exist: {}", store.root().display());
        return Ok(());
    }

    let doomed = store.prune_candidates(keep)?;
    if doomed.is_empty() {
        println!("Nothing to prune: every dataset has at most {keep} file(s).");
        return Ok(());
    }

    let bytes: u64 = doomed.iter().map(|e| e.bytes).sum();
    println!(
        "Found {} raw file(s) beyond the newest {keep} per dataset ({}):",
        doomed.len(),
        format_size(bytes)
    );
    for entry in &doomed {
        println!("  {} ({})", entry.path.display(), format_size(entry.bytes));
    }

    if !confirm {
        println!();
        println!("Dry run: pass --confirm to actually delete.");
        return Ok(());
    }

    let freed = store.remove(&doomed)?;
    println!("Done. Removed {} file(s), freed {}.", doomed.len(), format_size(freed));
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_flags_selects_every_dataset() {
        let mut settings = Settings::default();
        let cli = Cli::parse_from(["defi-etl", "extract", "dexscreener"]);
        let Commands::Extract { source } = cli.command else {
            panic!("expected extract");
        };
        assert_eq!(
            apply_extract_args(&mut settings, source),
            ExtractRun::Datasets(vec![Dataset::Pairs, Dataset::TokenPairs])
        );
    }

    #[test]
    fn flags_narrow_and_override_settings() {
        let mut settings = Settings::default();
        let cli = Cli::parse_from([
            "defi-etl",
            "extract",
            "coingecko",
            "--markets",
            "--history",
            "--token-ids",
            "bitcoin,aave",
            "--pages",
            "3",
        ]);
        let Commands::Extract { source } = cli.command else {
            panic!("expected extract");
        };
        let run = apply_extract_args(&mut settings, source);
        assert_eq!(run, ExtractRun::Datasets(vec![Dataset::Markets, Dataset::TokenHistory]));
        assert_eq!(settings.coingecko.token_ids, vec!["bitcoin", "aave"]);
        assert_eq!(settings.coingecko.pages, 3);
    }

    #[test]
    fn bare_protocol_tvl_keeps_configured_slugs() {
        let mut settings = Settings::default();
        let configured = settings.defillama.protocols.clone();
        let cli = Cli::parse_from(["defi-etl", "extract", "defillama", "--protocol-tvl", "--tvl"]);
        let Commands::Extract { source } = cli.command else {
            panic!("expected extract");
        };
        let run = apply_extract_args(&mut settings, source);
        assert_eq!(run, ExtractRun::Datasets(vec![Dataset::Protocols, Dataset::ProtocolTvl]));
        assert_eq!(settings.defillama.protocols, configured);
    }

    #[test]
    fn historical_tvl_takes_its_own_path() {
        let mut settings = Settings::default();
        let cli = Cli::parse_from(["defi-etl", "extract", "defillama", "--historical-tvl", "--max-protocols", "50"]);
        let Commands::Extract { source } = cli.command else {
            panic!("expected extract");
        };
        assert_eq!(
            apply_extract_args(&mut settings, source),
            ExtractRun::HistoricalTvl { max_protocols: Some(50) }
        );

        assert!(Cli::try_parse_from(["defi-etl", "extract", "defillama", "--max-protocols", "5"]).is_err());
        assert!(Cli::try_parse_from(["defi-etl", "extract", "defillama", "--historical-tvl", "--protocol-tvl"]).is_err());
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
