//! Run summary: what each stage did to each dataset.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Pipeline state. `Failed` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Idle,
    Extracting,
    Normalizing,
    Exporting,
    Done,
    Failed,
}

impl RunStage {
    /// The state after this one completes successfully.
    pub fn next(self) -> RunStage {
        match self {
            RunStage::Idle => RunStage::Extracting,
            RunStage::Extracting => RunStage::Normalizing,
            RunStage::Normalizing => RunStage::Exporting,
            RunStage::Exporting | RunStage::Done => RunStage::Done,
            RunStage::Failed => RunStage::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStage::Done | RunStage::Failed)
    }

    fn label(self) -> &'static str {
        match self {
            RunStage::Idle => "idle",
            RunStage::Extracting => "extract",
            RunStage::Normalizing => "transform",
            RunStage::Exporting => "export",
            RunStage::Done => "done",
            RunStage::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
    /// Not attempted because an input was not produced in this run.
    Skipped,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Succeeded => "ok",
            Outcome::Failed => "FAILED",
            Outcome::Skipped => "skipped",
        })
    }
}

/// Outcome of one dataset in one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetReport {
    pub stage: RunStage,
    pub name: String,
    pub outcome: Outcome,
    pub path: Option<PathBuf>,
    pub rows: usize,
    pub rejected: usize,
    pub error: Option<String>,
}

impl DatasetReport {
    pub fn succeeded(
        stage: RunStage,
        name: impl Into<String>,
        path: PathBuf,
        rows: usize,
        rejected: usize,
    ) -> Self {
        Self {
            stage,
            name: name.into(),
            outcome: Outcome::Succeeded,
            path: Some(path),
            rows,
            rejected,
            error: None,
        }
    }

    pub fn failed(stage: RunStage, name: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            stage,
            name: name.into(),
            outcome: Outcome::Failed,
            path: None,
            rows: 0,
            rejected: 0,
            error: Some(error.to_string()),
        }
    }

    pub fn skipped(stage: RunStage, name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            stage,
            name: name.into(),
            outcome: Outcome::Skipped,
            path: None,
            rows: 0,
            rejected: 0,
            error: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }
}

/// Everything one CLI invocation did.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stage: RunStage,
    pub datasets: Vec<DatasetReport>,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            stage: RunStage::Idle,
            datasets: Vec::new(),
        }
    }

    /// Move to `stage` unless the run already ended.
    pub fn enter(&mut self, stage: RunStage) {
        if !self.stage.is_terminal() {
            self.stage = stage;
        }
    }

    /// Move to the stage after the current one. A failed run stays failed.
    pub fn advance(&mut self) {
        self.stage = self.stage.next();
    }

    pub fn push(&mut self, report: DatasetReport) {
        self.datasets.push(report);
    }

    pub fn extend(&mut self, reports: impl IntoIterator<Item = DatasetReport>) {
        self.datasets.extend(reports);
    }

    /// Mark the run as failed. Terminal.
    pub fn fail(&mut self) {
        self.stage = RunStage::Failed;
    }

    /// Close the run: `Done` unless a dataset failed or [`RunSummary::fail`] was called.
    pub fn finish(&mut self) {
        if self.failures().next().is_some() {
            self.stage = RunStage::Failed;
        } else if self.stage != RunStage::Failed {
            self.stage = RunStage::Done;
        }
        self.finished_at = Some(Utc::now());
    }

    pub fn failures(&self) -> impl Iterator<Item = &DatasetReport> {
        self.datasets.iter().filter(|d| d.outcome == Outcome::Failed)
    }

    pub fn in_stage(&self, stage: RunStage) -> impl Iterator<Item = &DatasetReport> {
        self.datasets.iter().filter(move |d| d.stage == stage)
    }

    pub fn count(&self, stage: RunStage, outcome: Outcome) -> usize {
        self.in_stage(stage).filter(|d| d.outcome == outcome).count()
    }

    pub fn succeeded(&self) -> bool {
        self.stage == RunStage::Done
    }
}
