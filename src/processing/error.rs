use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Why a single file could not be defaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaceIssueReason {
    MissingSource,
    LoadFailure,
    TransformFailure,
    OutputMismatch,
    WriteFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaceIssue {
    /// The offending file: the source for load faults, the output for write faults.
    pub path: PathBuf,
    pub reason: DefaceIssueReason,
    pub message: String,
}

impl DefaceIssue {
    pub fn new(path: &Path, reason: DefaceIssueReason, message: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            reason,
            message: message.into(),
        }
    }

    /// Wraps an error chain, keeping every context layer in the message.
    pub fn from_error(path: &Path, reason: DefaceIssueReason, err: &anyhow::Error) -> Self {
        Self::new(path, reason, format!("{err:#}"))
    }
}
