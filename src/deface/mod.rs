//! Defacing backends.
//!
//! The batch runner only knows the [`Defacer`] trait: given a source image
//! it must leave a complete defaced NIfTI file at the staging path. How the
//! face region is found is the backend's business.

pub mod external;
pub mod mask;

use crate::config::{DefacerKind, DefacerSettings};
use crate::image::NiftiImage;
use anyhow::{Context, Result};
use std::path::Path;

pub use external::ExternalDefacer;
pub use mask::MaskDefacer;

/// Inputs handed to a defacer for one file.
pub struct DefaceJob<'a> {
    pub source_path: &'a Path,
    pub source: &'a NiftiImage,
    /// Where the defaced file must be written. Its extension matches the
    /// source's, and its directory is private to this job.
    pub staging_path: &'a Path,
}

pub trait Defacer: Send + Sync {
    fn name(&self) -> &str;

    fn deface(&self, job: &DefaceJob<'_>) -> Result<()>;
}

/// Builds the backend selected in the settings, checking that it can run.
pub fn build_defacer(settings: &DefacerSettings) -> Result<Box<dyn Defacer>> {
    match settings.kind {
        DefacerKind::External => {
            let defacer = ExternalDefacer::from_settings(settings);
            defacer.ensure_available()?;
            Ok(Box::new(defacer))
        }
        DefacerKind::Mask => {
            let mask_path = settings
                .mask_path
                .as_ref()
                .context("The mask defacer needs a mask file")?;
            Ok(Box::new(MaskDefacer::load(mask_path)?))
        }
    }
}
