//! Run configuration for the defacing batch.
//!
//! Settings come from an optional TOML file and are then overridden by CLI
//! flags. The file is looked up in this order:
//!   1. an explicit `--config` path,
//!   2. the `BIDS_DEFACE_CONFIG` environment variable,
//!   3. `bids-deface/config.toml` under the per-user config directory, if it exists.
//!
//! Missing sections fall back to the defaults below, which reproduce the
//! behaviour of a plain `pydeface` run over every T1w image.

use anyhow::{bail, Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable pointing at a config file.
pub const CONFIG_ENV_VAR: &str = "BIDS_DEFACE_CONFIG";
/// File name looked up under the per-user config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Root configuration for one defacing run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DefaceConfig {
    /// Dataset and output locations.
    #[serde(default)]
    pub paths: PathSettings,
    /// Which files under the dataset root are candidates.
    #[serde(default)]
    pub discovery: DiscoverySettings,
    /// Which defacing backend runs and how it is invoked.
    #[serde(default)]
    pub defacer: DefacerSettings,
    /// Batch behaviour (workers, sidecars, reporting files).
    #[serde(default)]
    pub run: RunOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathSettings {
    pub input_root: Option<PathBuf>,
    pub output_root: Option<PathBuf>,
}

/// How candidates are selected from the dataset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Walk `sub-*/[ses-*/]anat/` and match the configured suffixes.
    #[default]
    Pattern,
    /// The built-in list of flagged ds004021 T1w images.
    Flagged,
    /// Relative paths read from `discovery.list_file`.
    List,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    #[serde(default)]
    pub selection: Selection,
    /// BIDS suffixes accepted by the pattern walk (`T1w`, `T2w`, ...).
    #[serde(default = "default_suffixes")]
    pub suffixes: Vec<String>,
    #[serde(default)]
    pub list_file: Option<PathBuf>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            selection: Selection::default(),
            suffixes: default_suffixes(),
            list_file: None,
        }
    }
}

fn default_suffixes() -> Vec<String> {
    vec!["T1w".to_string()]
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DefacerKind {
    /// Spawn an external defacing command per file.
    #[default]
    External,
    /// Apply a face mask that is already aligned with the images.
    Mask,
}

/// Defacing backend selection plus the invocation of the external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefacerSettings {
    #[serde(default)]
    pub kind: DefacerKind,
    #[serde(default = "default_command")]
    pub command: String,
    /// Extra arguments placed before the input path.
    #[serde(default)]
    pub args: Vec<String>,
    /// Flag that introduces the output path.
    #[serde(default = "default_output_flag")]
    pub output_flag: String,
    #[serde(default)]
    pub mask_path: Option<PathBuf>,
}

impl Default for DefacerSettings {
    fn default() -> Self {
        Self {
            kind: DefacerKind::default(),
            command: default_command(),
            args: Vec::new(),
            output_flag: default_output_flag(),
            mask_path: None,
        }
    }
}

fn default_command() -> String {
    "pydeface".to_string()
}

fn default_output_flag() -> String {
    "--outfile".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Number of files defaced concurrently (1 = sequential).
    #[serde(default = "default_workers")]
    pub workers: u32,
    /// Copy the matching `.json` sidecar next to each output.
    #[serde(default)]
    pub copy_sidecars: bool,
    /// Leave outputs that already exist untouched.
    #[serde(default)]
    pub skip_existing: bool,
    /// Reject outputs whose shape, datatype or affine differ from the input.
    #[serde(default = "default_verify_geometry")]
    pub verify_geometry: bool,
    #[serde(default)]
    pub run_log: Option<PathBuf>,
    #[serde(default)]
    pub manifest: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            copy_sidecars: false,
            skip_existing: false,
            verify_geometry: default_verify_geometry(),
            run_log: None,
            manifest: None,
        }
    }
}

const fn default_workers() -> u32 {
    4
}

const fn default_verify_geometry() -> bool {
    true
}

/// Returns the config file to load, if any.
///
/// An explicit path must exist; the environment and per-user locations are
/// only used when they point at an existing file.
pub fn config_file_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            bail!("Config file {} does not exist", path.display());
        }
        return Ok(Some(path.to_path_buf()));
    }
    if let Ok(path) = env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path);
        if !path.exists() {
            bail!(
                "{CONFIG_ENV_VAR} points at {}, which does not exist",
                path.display()
            );
        }
        return Ok(Some(path));
    }
    let Some(base_dirs) = BaseDirs::new() else {
        return Ok(None);
    };
    let candidate = base_dirs
        .config_dir()
        .join("bids-deface")
        .join(CONFIG_FILE_NAME);
    Ok(candidate.exists().then_some(candidate))
}

/// Parses a config file.
pub fn load_from(path: &Path) -> Result<DefaceConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let cfg: DefaceConfig = toml::from_str(&data)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    Ok(cfg)
}

/// Loads the config resolved by [`config_file_path`] or returns defaults.
pub fn load_or_default(explicit: Option<&Path>) -> Result<DefaceConfig> {
    match config_file_path(explicit)? {
        Some(path) => load_from(&path),
        None => Ok(DefaceConfig::default()),
    }
}

/// Input and output roots after validation, both absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoots {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
}

impl DefaceConfig {
    /// Validates the roots: the input must exist, the output must not be `/`,
    /// the input root itself, or a directory inside the input root.
    pub fn resolve_roots(&self) -> Result<ResolvedRoots> {
        let input = self
            .paths
            .input_root
            .as_ref()
            .context("No input root given (use --input-root or [paths].input_root)")?;
        let output = self
            .paths
            .output_root
            .as_ref()
            .context("No output root given (use --output-root or [paths].output_root)")?;

        if !input.is_dir() {
            bail!("dataset root not found: {}", input.display());
        }
        let input_root = input
            .canonicalize()
            .with_context(|| format!("Unable to resolve dataset root {}", input.display()))?;
        let output_root = resolve_output_root(output)?;

        if output_root.parent().is_none() {
            bail!(
                "Output root '{}' is the filesystem root; choose a dedicated directory",
                output_root.display()
            );
        }
        if output_root == input_root {
            bail!(
                "Output root '{}' is the dataset root; originals must not be overwritten",
                output_root.display()
            );
        }
        if output_root.starts_with(&input_root) {
            bail!(
                "Output root '{}' lies inside the dataset root '{}'",
                output_root.display(),
                input_root.display()
            );
        }
        Ok(ResolvedRoots {
            input_root,
            output_root,
        })
    }

    /// Checks settings that only make sense together.
    pub fn validate(&self) -> Result<()> {
        if self.defacer.kind == DefacerKind::Mask && self.defacer.mask_path.is_none() {
            bail!("The mask defacer needs a mask file (use --mask or [defacer].mask_path)");
        }
        if self.defacer.kind == DefacerKind::External && self.defacer.command.trim().is_empty() {
            bail!("The external defacer needs a command");
        }
        if self.discovery.selection == Selection::List && self.discovery.list_file.is_none() {
            bail!("List selection needs a list file (use --list or [discovery].list_file)");
        }
        if self.discovery.selection == Selection::Pattern && self.discovery.suffixes.is_empty() {
            bail!("Pattern selection needs at least one suffix");
        }
        Ok(())
    }
}

/// Makes the output root absolute, canonicalizing its deepest existing
/// ancestor so a symlinked parent compares equal to the input root.
fn resolve_output_root(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)
        .with_context(|| format!("Unable to resolve output root {}", path.display()))?;
    let mut existing = absolute.as_path();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = existing
        .canonicalize()
        .unwrap_or_else(|_| existing.to_path_buf());
    for name in tail.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
