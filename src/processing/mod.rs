//! The batch: one independent load → deface → verify → write pipeline per
//! candidate, with per-file fault isolation.

pub mod error;
pub mod manifest;
pub mod run_log;
pub mod runner;
pub mod status;

use std::path::PathBuf;

pub use error::{DefaceIssue, DefaceIssueReason};
pub use manifest::{hash_path, read_manifest, ManifestOutput, OutputDrift, RunManifest};
pub use run_log::{load_events, RunEvent, RunEventType, RunLog};
pub use runner::{prepare, run_with_config, BatchRunner, PreparedRun, RunOutcome};
pub use status::{format_summary, progress_line};

#[derive(Debug, Clone)]
pub enum FileOutcome {
    Defaced { output: PathBuf, sha256: String },
    Skipped { output: PathBuf },
    Failed(DefaceIssue),
}

/// Result for one candidate.
#[derive(Debug, Clone)]
pub struct FileReport {
    /// Relative path with `/` separators.
    pub label: String,
    pub outcome: FileOutcome,
}

impl FileReport {
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, FileOutcome::Failed(_))
    }
}

/// Counts for a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub discovered: usize,
    pub defaced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub issues: Vec<DefaceIssue>,
}

impl RunSummary {
    pub fn from_reports(reports: &[FileReport]) -> Self {
        let mut summary = RunSummary {
            discovered: reports.len(),
            ..Default::default()
        };
        for report in reports {
            match &report.outcome {
                FileOutcome::Defaced { .. } => summary.defaced += 1,
                FileOutcome::Skipped { .. } => summary.skipped += 1,
                FileOutcome::Failed(issue) => {
                    summary.failed += 1;
                    summary.issues.push(issue.clone());
                }
            }
        }
        summary
    }

    pub fn succeeded(&self) -> usize {
        self.defaced + self.skipped
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}
