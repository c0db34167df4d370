use super::{DefaceIssue, FileOutcome, FileReport};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestOutput {
    pub relative_path: String,
    pub path: PathBuf,
    pub sha256: String,
}

/// Record of the outputs a run wrote, for later verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub defacer: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub outputs: Vec<ManifestOutput>,
    #[serde(default)]
    pub failures: Vec<DefaceIssue>,
}

impl RunManifest {
    pub fn from_reports(
        run_id: Uuid,
        input_root: &Path,
        output_root: &Path,
        defacer: &str,
        started_at: DateTime<Utc>,
        reports: &[FileReport],
    ) -> Self {
        let completed_at = Utc::now();
        let mut outputs = Vec::new();
        let mut failures = Vec::new();
        for report in reports {
            match &report.outcome {
                FileOutcome::Defaced { output, sha256 } => outputs.push(ManifestOutput {
                    relative_path: report.label.clone(),
                    path: output.clone(),
                    sha256: sha256.clone(),
                }),
                FileOutcome::Skipped { .. } => {}
                FileOutcome::Failed(issue) => failures.push(issue.clone()),
            }
        }
        Self {
            run_id,
            input_root: input_root.to_path_buf(),
            output_root: output_root.to_path_buf(),
            defacer: defacer.to_string(),
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds(),
            outputs,
            failures,
        }
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

pub fn read_manifest(path: &Path) -> Result<RunManifest> {
    let file =
        File::open(path).with_context(|| format!("Missing manifest {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid manifest {}", path.display()))
}

/// Streams a file through SHA-256 and returns the lowercase hex digest.
pub fn hash_path(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("Unable to open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Unable to hash {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// An output that no longer matches what the run recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputDrift {
    Missing { relative_path: String, path: PathBuf },
    Changed { relative_path: String, expected: String, found: String },
}

impl fmt::Display for OutputDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputDrift::Missing {
                relative_path,
                path,
            } => write!(f, "[missing] {relative_path} ({})", path.display()),
            OutputDrift::Changed {
                relative_path,
                expected,
                found,
            } => write!(f, "[mismatch] {relative_path} expected {expected}, found {found}"),
        }
    }
}

impl RunManifest {
    /// Re-hashes every recorded output. An empty result means the tree is
    /// exactly what the run wrote.
    pub fn verify_outputs(&self) -> Result<Vec<OutputDrift>> {
        let mut drift = Vec::new();
        for output in &self.outputs {
            if !output.path.is_file() {
                drift.push(OutputDrift::Missing {
                    relative_path: output.relative_path.clone(),
                    path: output.path.clone(),
                });
                continue;
            }
            let found = hash_path(&output.path)?;
            if found != output.sha256 {
                drift.push(OutputDrift::Changed {
                    relative_path: output.relative_path.clone(),
                    expected: output.sha256.clone(),
                    found,
                });
            }
        }
        Ok(drift)
    }
}
