use super::{DefaceJob, Defacer};
use crate::config::DefacerSettings;
use anyhow::{bail, Context, Result};
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Lines of tool output kept in failure messages.
const OUTPUT_TAIL_LINES: usize = 12;

/// Runs an external defacing tool once per file:
/// `<command> [args..] <source> <output_flag> <staging>`.
#[derive(Debug, Clone)]
pub struct ExternalDefacer {
    command: String,
    args: Vec<String>,
    output_flag: String,
}

impl ExternalDefacer {
    pub fn from_settings(settings: &DefacerSettings) -> Self {
        Self {
            command: settings.command.clone(),
            args: settings.args.clone(),
            output_flag: settings.output_flag.clone(),
        }
    }

    /// Resolves the command on `PATH` (or as a path) before a batch starts.
    pub fn ensure_available(&self) -> Result<PathBuf> {
        match resolve_program(&self.command) {
            Some(path) => Ok(path),
            None if self.command == "pydeface" => {
                bail!("pydeface not found. Install with: pip install pydeface")
            }
            None => bail!("defacing command '{}' not found", self.command),
        }
    }

    pub fn command_line(&self, source: &Path, staging: &Path) -> Vec<OsString> {
        let mut line: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        line.push(source.as_os_str().to_os_string());
        if !self.output_flag.is_empty() {
            line.push(OsString::from(&self.output_flag));
        }
        line.push(staging.as_os_str().to_os_string());
        line
    }
}

impl Defacer for ExternalDefacer {
    fn name(&self) -> &str {
        &self.command
    }

    fn deface(&self, job: &DefaceJob<'_>) -> Result<()> {
        let args = self.command_line(job.source_path, job.staging_path);
        debug!(command = %self.command, ?args, "running external defacer");
        let output = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to start '{}'", self.command))?;

        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            bail!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                output_tail(&text)
            );
        }
        if !job.staging_path.is_file() {
            bail!(
                "{} reported success but wrote no output at {}",
                self.command,
                job.staging_path.display()
            );
        }
        Ok(())
    }
}

fn output_tail(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        return "no output".to_string();
    }
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    lines[start..].join(" | ")
}

fn resolve_program(command: &str) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(command))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
