//! BIDS filename parsing.
//!
//! A BIDS filename is a sequence of `key-value` entities joined by `_`,
//! followed by a suffix and an extension, e.g.
//! `sub-06_ses-01_acq-mprage_T1w.nii.gz`.

use anyhow::{bail, Result};

/// NIfTI extensions recognised as image files.
pub const NIFTI_EXTENSIONS: [&str; 2] = [".nii.gz", ".nii"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidsName {
    entities: Vec<(String, String)>,
    pub suffix: String,
    pub extension: String,
}

impl BidsName {
    pub fn parse(file_name: &str) -> Result<Self> {
        let Some(extension) = NIFTI_EXTENSIONS
            .iter()
            .find(|ext| file_name.ends_with(*ext))
        else {
            bail!("'{file_name}' is not a NIfTI file");
        };
        let stem = &file_name[..file_name.len() - extension.len()];
        let mut parts: Vec<&str> = stem.split('_').collect();
        let suffix = match parts.pop() {
            Some(suffix) if !suffix.is_empty() && !suffix.contains('-') => suffix,
            _ => bail!("'{file_name}' has no BIDS suffix"),
        };

        let mut entities = Vec::with_capacity(parts.len());
        for part in parts {
            match part.split_once('-') {
                Some((key, value)) if !key.is_empty() && !value.is_empty() => {
                    entities.push((key.to_string(), value.to_string()));
                }
                _ => bail!("'{file_name}' has a malformed entity '{part}'"),
            }
        }
        match entities.first() {
            Some((key, _)) if key == "sub" => {}
            _ => bail!("'{file_name}' does not start with a sub- entity"),
        }

        Ok(Self {
            entities,
            suffix: suffix.to_string(),
            extension: (*extension).to_string(),
        })
    }

    pub fn entity(&self, key: &str) -> Option<&str> {
        self.entities
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn subject(&self) -> &str {
        // parse() guarantees the first entity is sub
        &self.entities[0].1
    }

    pub fn session(&self) -> Option<&str> {
        self.entity("ses")
    }

    /// File name of the JSON sidecar that shares this image's stem.
    pub fn sidecar_name(&self) -> String {
        let mut name: Vec<String> = self
            .entities
            .iter()
            .map(|(k, v)| format!("{k}-{v}"))
            .collect();
        name.push(self.suffix.clone());
        format!("{}.json", name.join("_"))
    }
}

/// Returns the label of a `<key>-<label>` directory name.
pub fn directory_label<'a>(name: &'a str, key: &str) -> Option<&'a str> {
    name.strip_prefix(key)
        .and_then(|rest| rest.strip_prefix('-'))
        .filter(|label| !label.is_empty())
}
