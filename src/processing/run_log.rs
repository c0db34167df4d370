//! Append-only JSONL log of defacing runs.

use super::{FileOutcome, FileReport, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventType {
    RunStarted,
    FileProcessed,
    FileFailed,
    RunCompleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub event_id: Uuid,
    pub run_id: Uuid,
    pub event_type: RunEventType,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}

/// Shared between workers; appends are serialized so lines never interleave.
pub struct RunLog {
    path: PathBuf,
    run_id: Uuid,
    lock: Mutex<()>,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>, run_id: Uuid) -> Self {
        Self {
            path: path.into(),
            run_id,
            lock: Mutex::new(()),
        }
    }

    pub fn run_started(&self, input_root: &Path, output_root: &Path, defacer: &str, total: usize) -> Result<()> {
        self.append(
            RunEventType::RunStarted,
            json!({
                "input_root": input_root,
                "output_root": output_root,
                "defacer": defacer,
                "total_files": total
            }),
        )
    }

    pub fn file_finished(&self, report: &FileReport) -> Result<()> {
        let (event_type, details) = match &report.outcome {
            FileOutcome::Defaced { output, sha256 } => (
                RunEventType::FileProcessed,
                json!({ "file": report.label, "status": "defaced", "output": output, "sha256": sha256 }),
            ),
            FileOutcome::Skipped { output } => (
                RunEventType::FileProcessed,
                json!({ "file": report.label, "status": "skipped", "output": output }),
            ),
            FileOutcome::Failed(issue) => (
                RunEventType::FileFailed,
                json!({
                    "file": report.label,
                    "path": issue.path,
                    "reason": issue.reason,
                    "message": issue.message
                }),
            ),
        };
        self.append(event_type, details)
    }

    pub fn run_completed(&self, summary: &RunSummary, duration_ms: i64) -> Result<()> {
        self.append(
            RunEventType::RunCompleted,
            json!({
                "discovered": summary.discovered,
                "defaced": summary.defaced,
                "skipped": summary.skipped,
                "failed": summary.failed,
                "duration_ms": duration_ms
            }),
        )
    }

    fn append(&self, event_type: RunEventType, details: serde_json::Value) -> Result<()> {
        let event = RunEvent {
            event_id: Uuid::new_v4(),
            run_id: self.run_id,
            event_type,
            timestamp: Utc::now(),
            details,
        };
        let line = serde_json::to_string(&event)?;
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("Run log lock poisoned"))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Unable to open run log {}", self.path.display()))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

/// Reads every event of a run log.
pub fn load_events(path: &Path) -> Result<Vec<RunEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = fs::read_to_string(path)
        .with_context(|| format!("Unable to read {:?}", path))?;
    let mut events = Vec::new();
    for line in data.lines().filter(|l| !l.trim().is_empty()) {
        let event: RunEvent =
            serde_json::from_str(line).with_context(|| "Failed to parse run log record")?;
        events.push(event);
    }
    Ok(events)
}
