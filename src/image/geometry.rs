use nifti::NiftiHeader;
use serde::{Deserialize, Serialize};

/// Shape, storage type and voxel-to-world transforms of a volume.
///
/// Two geometries match only when every field is bitwise equal; defacing
/// must never resample or retype a volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGeometry {
    pub shape: Vec<u16>,
    pub datatype: i16,
    pub bitpix: i16,
    pub qform_code: i16,
    pub sform_code: i16,
    /// `pixdim[0..=3]`: qfac followed by the spatial voxel sizes.
    pub pixdim: [f32; 4],
    pub quatern: [f32; 3],
    pub qoffset: [f32; 3],
    pub srow: [[f32; 4]; 3],
}

impl ImageGeometry {
    pub fn from_header(header: &NiftiHeader) -> Self {
        let ndim = (header.dim[0] as usize).min(7);
        Self {
            shape: header.dim[1..=ndim].to_vec(),
            datatype: header.datatype,
            bitpix: header.bitpix,
            qform_code: header.qform_code,
            sform_code: header.sform_code,
            pixdim: [
                header.pixdim[0],
                header.pixdim[1],
                header.pixdim[2],
                header.pixdim[3],
            ],
            quatern: [header.quatern_b, header.quatern_c, header.quatern_d],
            qoffset: [header.quatern_x, header.quatern_y, header.quatern_z],
            srow: [header.srow_x, header.srow_y, header.srow_z],
        }
    }

    pub fn matches(&self, other: &Self) -> bool {
        self.describe_mismatch(other).is_none()
    }

    /// Names the first field that differs, or `None` when the geometries match.
    pub fn describe_mismatch(&self, other: &Self) -> Option<String> {
        if self.shape != other.shape {
            return Some(format!("shape {:?} != {:?}", self.shape, other.shape));
        }
        if self.datatype != other.datatype || self.bitpix != other.bitpix {
            return Some(format!(
                "datatype {}/{} bits != {}/{} bits",
                self.datatype, self.bitpix, other.datatype, other.bitpix
            ));
        }
        if self.qform_code != other.qform_code || self.sform_code != other.sform_code {
            return Some(format!(
                "qform/sform codes {}/{} != {}/{}",
                self.qform_code, self.sform_code, other.qform_code, other.sform_code
            ));
        }
        if !bits_eq(&self.pixdim, &other.pixdim) {
            return Some(format!("pixdim {:?} != {:?}", self.pixdim, other.pixdim));
        }
        if !bits_eq(&self.quatern, &other.quatern) || !bits_eq(&self.qoffset, &other.qoffset) {
            return Some("qform quaternion or offset differs".to_string());
        }
        for (axis, (a, b)) in self.srow.iter().zip(other.srow.iter()).enumerate() {
            if !bits_eq(a, b) {
                return Some(format!("srow_{} {:?} != {:?}", ["x", "y", "z"][axis], a, b));
            }
        }
        None
    }

    /// Whether the spatial grids agree within `tolerance` (same first three
    /// dims, sform rows within tolerance).
    pub fn same_grid(&self, other: &Self, tolerance: f32) -> bool {
        let spatial = |shape: &[u16]| {
            let mut dims = [1u16; 3];
            for (slot, d) in dims.iter_mut().zip(shape.iter()) {
                *slot = *d;
            }
            dims
        };
        spatial(&self.shape) == spatial(&other.shape)
            && self
                .srow
                .iter()
                .flatten()
                .zip(other.srow.iter().flatten())
                .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

fn bits_eq(a: &[f32], b: &[f32]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}
