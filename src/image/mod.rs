//! NIfTI-1 single-file volumes (`.nii`, `.nii.gz`).
//!
//! The header is parsed with the `nifti` crate, but the file bytes are kept
//! as read: defacing only rewrites voxel payload bytes, so header, extensions
//! and affine are written back bit-for-bit.

pub mod geometry;

use anyhow::{bail, Context, Result};
use flate2::read::MultiGzDecoder;
use flate2::{Compression, GzBuilder};
use nifti::NiftiHeader;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

pub use geometry::ImageGeometry;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const NIFTI1_HEADER_SIZE: usize = 348;
/// Header plus the 4-byte extension flag of a single-file NIfTI-1.
const MIN_VOX_OFFSET: usize = 352;
const SINGLE_FILE_MAGIC: &[u8; 4] = b"n+1\0";

/// A decoded NIfTI-1 file held fully in memory.
#[derive(Debug, Clone)]
pub struct NiftiImage {
    header: NiftiHeader,
    bytes: Vec<u8>,
    data_offset: usize,
    data_len: usize,
}

impl NiftiImage {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path).with_context(|| format!("Unable to read {}", path.display()))?;
        Self::from_bytes(raw).with_context(|| format!("Invalid NIfTI file {}", path.display()))
    }

    /// Decodes file contents; gzip is detected from the stream magic.
    pub fn from_bytes(raw: Vec<u8>) -> Result<Self> {
        let bytes = if raw.starts_with(&GZIP_MAGIC) {
            let mut decoded = Vec::new();
            MultiGzDecoder::new(raw.as_slice())
                .read_to_end(&mut decoded)
                .context("Failed to decompress gzip stream")?;
            decoded
        } else {
            raw
        };
        if bytes.len() < NIFTI1_HEADER_SIZE {
            bail!(
                "File too small ({} bytes, need at least {NIFTI1_HEADER_SIZE})",
                bytes.len()
            );
        }
        let header = NiftiHeader::from_reader(bytes.as_slice())
            .context("Failed to parse NIfTI-1 header")?;

        if &header.magic != SINGLE_FILE_MAGIC {
            bail!("Only single-file NIfTI-1 images are supported (.hdr/.img pairs are not)");
        }
        let ndim = header.dim[0] as usize;
        if !(1..=7).contains(&ndim) {
            bail!("Invalid dimensionality dim[0]={ndim}");
        }
        if header.dim[1..=ndim].iter().any(|&d| d == 0) {
            bail!("Volume has an empty dimension: {:?}", &header.dim[1..=ndim]);
        }
        if header.bitpix <= 0 || header.bitpix % 8 != 0 {
            bail!("Unsupported bitpix {}", header.bitpix);
        }
        if !header.vox_offset.is_finite() || header.vox_offset < MIN_VOX_OFFSET as f32 {
            bail!("Invalid vox_offset {}", header.vox_offset);
        }
        let data_offset = header.vox_offset as usize;
        let voxel_count = header.dim[1..=ndim]
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d as usize))
            .context("Voxel count overflows")?;
        let data_len = voxel_count
            .checked_mul(header.bitpix as usize / 8)
            .context("Payload size overflows")?;
        let needed = data_offset
            .checked_add(data_len)
            .context("Payload size overflows")?;
        if bytes.len() < needed {
            bail!(
                "Truncated voxel data: expected {needed} bytes, found {}",
                bytes.len()
            );
        }

        Ok(Self {
            header,
            bytes,
            data_offset,
            data_len,
        })
    }

    pub fn geometry(&self) -> ImageGeometry {
        ImageGeometry::from_header(&self.header)
    }

    /// First three dimensions; missing ones count as 1.
    pub fn spatial_shape(&self) -> [usize; 3] {
        let ndim = self.header.dim[0] as usize;
        let mut shape = [1usize; 3];
        for (axis, extent) in shape.iter_mut().enumerate().take(ndim.min(3)) {
            *extent = self.header.dim[axis + 1] as usize;
        }
        shape
    }

    /// Bytes per voxel.
    pub fn voxel_bytes(&self) -> usize {
        self.header.bitpix as usize / 8
    }

    pub fn voxel_count(&self) -> usize {
        self.data_len / self.voxel_bytes()
    }

    pub fn voxels(&self) -> &[u8] {
        &self.bytes[self.data_offset..self.data_offset + self.data_len]
    }

    pub fn voxels_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[self.data_offset..self.data_offset + self.data_len]
    }

    /// Writes the image, gzip-compressed when the path ends in `.gz`.
    ///
    /// The gzip header carries no timestamp, so identical images produce
    /// identical files.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Unable to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        if is_gzip_path(path) {
            let mut encoder = GzBuilder::new()
                .mtime(0)
                .write(&mut writer, Compression::default());
            encoder
                .write_all(&self.bytes)
                .with_context(|| format!("Unable to write {}", path.display()))?;
            encoder
                .finish()
                .with_context(|| format!("Unable to finish {}", path.display()))?;
        } else {
            writer
                .write_all(&self.bytes)
                .with_context(|| format!("Unable to write {}", path.display()))?;
        }
        let file = writer
            .into_inner()
            .map_err(|err| err.into_error())
            .with_context(|| format!("Unable to flush {}", path.display()))?;
        file.sync_all()
            .with_context(|| format!("Unable to sync {}", path.display()))?;
        Ok(())
    }
}

pub(crate) fn is_gzip_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}
