use super::{DefaceJob, Defacer};
use crate::image::NiftiImage;
use anyhow::{bail, Context, Result};
use std::path::Path;

/// Largest sform difference (mm) tolerated between mask and image.
const GRID_TOLERANCE: f32 = 1e-3;

/// Applies a face mask that already lives in the image's voxel grid.
///
/// Mask voxels that are zero mark the face and are removed from the image;
/// any other value keeps the voxel. A removed voxel has its stored bytes
/// zeroed, so the header (and therefore datatype, scaling and affine) is
/// untouched. For 4-D images the mask applies to every volume.
pub struct MaskDefacer {
    name: String,
    mask: NiftiImage,
    /// One flag per spatial voxel, true where the face is removed.
    face: Vec<bool>,
}

impl MaskDefacer {
    pub fn load(path: &Path) -> Result<Self> {
        let mask = NiftiImage::load(path)
            .with_context(|| format!("Unable to load face mask {}", path.display()))?;
        Self::from_image(mask, format!("mask:{}", path.display()))
    }

    pub fn from_image(mask: NiftiImage, name: impl Into<String>) -> Result<Self> {
        let [nx, ny, nz] = mask.spatial_shape();
        let spatial = nx * ny * nz;
        let width = mask.voxel_bytes();
        let face: Vec<bool> = mask
            .voxels()
            .chunks_exact(width)
            .take(spatial)
            .map(|voxel| voxel.iter().all(|&b| b == 0))
            .collect();
        if face.len() != spatial {
            bail!("Face mask holds fewer voxels than its spatial shape");
        }
        Ok(Self {
            name: name.into(),
            mask,
            face,
        })
    }

    /// Number of voxels removed per volume.
    #[cfg(test)]
    fn face_voxels(&self) -> usize {
        self.face.iter().filter(|&&removed| removed).count()
    }

    /// Zeroes the face voxels of `image` in place.
    pub fn apply(&self, image: &mut NiftiImage) -> Result<()> {
        let image_geometry = image.geometry();
        let mask_geometry = self.mask.geometry();
        if !image_geometry.same_grid(&mask_geometry, GRID_TOLERANCE) {
            bail!(
                "Face mask grid {:?} does not match image grid {:?}",
                mask_geometry.shape,
                image_geometry.shape
            );
        }
        let width = image.voxel_bytes();
        let spatial = self.face.len();
        for (index, voxel) in image.voxels_mut().chunks_exact_mut(width).enumerate() {
            if self.face[index % spatial] {
                voxel.fill(0);
            }
        }
        Ok(())
    }
}

impl Defacer for MaskDefacer {
    fn name(&self) -> &str {
        &self.name
    }

    fn deface(&self, job: &DefaceJob<'_>) -> Result<()> {
        let mut image = job.source.clone();
        self.apply(&mut image)?;
        image.write_to(job.staging_path)
    }
}
