//! Candidate discovery under a BIDS dataset root.

pub mod bids;
pub mod flagged;

use crate::config::{DiscoverySettings, Selection};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

pub use bids::BidsName;
pub use flagged::FLAGGED_T1W;

/// Top-level directories that never hold raw subject data.
const EXCLUDED_DIRS: [&str; 3] = ["derivatives", "sourcedata", "code"];

/// One image selected for defacing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    /// Path relative to the dataset root, mirrored under the output root.
    pub relative_path: PathBuf,
    pub source_path: PathBuf,
    pub name: BidsName,
}

impl ImageCandidate {
    fn new(root: &Path, relative_path: PathBuf, name: BidsName) -> Self {
        Self {
            source_path: root.join(&relative_path),
            relative_path,
            name,
        }
    }

    pub fn output_path(&self, output_root: &Path) -> PathBuf {
        output_root.join(&self.relative_path)
    }

    /// Relative path with `/` separators, used in progress lines and logs.
    pub fn label(&self) -> String {
        relative_label(&self.relative_path)
    }

    /// Sidecar JSON next to the source image.
    pub fn source_sidecar(&self) -> PathBuf {
        self.source_path.with_file_name(self.name.sidecar_name())
    }

    /// Sidecar JSON next to the mirrored output.
    pub fn output_sidecar(&self, output_root: &Path) -> PathBuf {
        self.output_path(output_root)
            .with_file_name(self.name.sidecar_name())
    }
}

/// Selects candidates according to the discovery settings.
///
/// The result is sorted by relative path and free of duplicates. An empty
/// result is not an error; callers decide how to report it.
pub fn discover(root: &Path, settings: &DiscoverySettings) -> Result<Vec<ImageCandidate>> {
    let mut candidates = match settings.selection {
        Selection::Pattern => walk_anat_images(root, &settings.suffixes)?,
        Selection::Flagged => candidates_from_list(root, FLAGGED_T1W.iter().copied())?,
        Selection::List => {
            let list_file = settings
                .list_file
                .as_ref()
                .context("List selection needs a list file")?;
            let entries = read_list_file(list_file)?;
            candidates_from_list(root, entries.iter().map(String::as_str))?
        }
    };
    candidates.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    candidates.dedup_by(|a, b| a.relative_path == b.relative_path);
    if candidates.is_empty() {
        warn!(
            root = %root.display(),
            selection = ?settings.selection,
            "no candidate images found; check the dataset root and selection"
        );
    }
    Ok(candidates)
}

/// Walks `sub-*/[ses-*/]anat/` and keeps images whose suffix is accepted.
pub fn walk_anat_images(root: &Path, suffixes: &[String]) -> Result<Vec<ImageCandidate>> {
    if !root.is_dir() {
        bail!("Dataset root {:?} does not exist", root);
    }
    let mut candidates = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(4)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded_dir(entry));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable dataset entry");
                continue;
            }
        };
        if !is_image_file(&entry) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .context("Walked entry outside the dataset root")?
            .to_path_buf();
        match match_anat_path(&relative, suffixes) {
            Some(name) => candidates.push(ImageCandidate::new(root, relative, name)),
            None => debug!(path = %relative.display(), "not an anatomical candidate"),
        }
    }
    Ok(candidates)
}

/// Regular files, and symlinks resolving to one (git-annex stores every
/// image as a link into the object store).
fn is_image_file(entry: &DirEntry) -> bool {
    entry.file_type().is_file() || (entry.path_is_symlink() && entry.path().is_file())
}

/// Builds candidates from explicit relative paths. Paths that do not exist
/// are kept so the run reports them as missing.
pub fn candidates_from_list<'a, I>(root: &Path, entries: I) -> Result<Vec<ImageCandidate>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut candidates = Vec::new();
    for entry in entries {
        let relative = PathBuf::from(entry);
        if relative.as_os_str().is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            bail!("List entry '{entry}' must be a plain relative path inside the dataset");
        }
        let file_name = relative
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("List entry '{entry}' has no file name"))?;
        let name = BidsName::parse(file_name)
            .with_context(|| format!("List entry '{entry}' is not a BIDS image"))?;
        candidates.push(ImageCandidate::new(root, relative, name));
    }
    Ok(candidates)
}

/// Reads one relative path per line; blank lines and `#` comments are ignored.
pub fn read_list_file(path: &Path) -> Result<Vec<String>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Unable to read list file {:?}", path))?;
    Ok(data
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

pub(crate) fn relative_label(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_excluded_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || EXCLUDED_DIRS.contains(&name.as_ref())
}

/// Accepts `sub-X/anat/<name>` and `sub-X/ses-Y/anat/<name>` when the file's
/// entities agree with its directories.
fn match_anat_path(relative: &Path, suffixes: &[String]) -> Option<BidsName> {
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    let (subject_dir, session_dir, file_name) = match parts.as_slice() {
        [sub, "anat", file] => (*sub, None, *file),
        [sub, ses, "anat", file] => (*sub, Some(*ses), *file),
        _ => return None,
    };
    let subject = bids::directory_label(subject_dir, "sub")?;
    let session = match session_dir {
        Some(dir) => Some(bids::directory_label(dir, "ses")?),
        None => None,
    };
    let name = BidsName::parse(file_name).ok()?;
    if name.subject() != subject || name.session() != session {
        return None;
    }
    suffixes
        .iter()
        .any(|suffix| suffix == &name.suffix)
        .then_some(name)
}
