use bids_deface::config::{DefaceConfig, DefacerKind};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Spatial shape used by every synthetic volume.
pub const DIMS: [u16; 3] = [4, 4, 4];

pub struct IntegrationHarness {
    workspace: TempDir,
}

impl IntegrationHarness {
    pub fn new() -> Self {
        let workspace = TempDir::new().expect("failed to create temp workspace");
        let harness = Self { workspace };
        fs::create_dir_all(harness.input_root()).expect("failed to create dataset root");
        harness
    }

    pub fn workspace_path(&self) -> &Path {
        self.workspace.path()
    }

    pub fn input_root(&self) -> PathBuf {
        self.workspace.path().join("ds004021")
    }

    pub fn output_root(&self) -> PathBuf {
        self.workspace.path().join("ds004021_defaced")
    }

    /// Writes an int16 T1w-like volume whose voxel `i` holds `i + 1`.
    pub fn write_volume(&self, rel: &str) -> PathBuf {
        let values: Vec<i16> = (0..voxel_count(&DIMS)).map(|i| i as i16 + 1).collect();
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let path = self.input_root().join(rel);
        write_nifti(&path, &DIMS, 4, 16, &data);
        path
    }

    pub fn write_corrupt(&self, rel: &str) -> PathBuf {
        let path = self.input_root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"this is not a nifti volume").unwrap();
        path
    }

    pub fn write_sidecar(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.input_root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    /// Face mask removing the first axial slice (z = 0).
    pub fn write_face_mask(&self) -> PathBuf {
        let [nx, ny, nz] = DIMS.map(usize::from);
        let mut keep = vec![1u8; nx * ny * nz];
        keep[..nx * ny].fill(0);
        let path = self.workspace.path().join("masks").join("facemask.nii.gz");
        write_nifti(&path, &DIMS, 2, 8, &keep);
        path
    }

    /// Writes a shell script that stands in for the external defacer.
    pub fn write_script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.workspace.path().join("scripts").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        path
    }

    pub fn base_config(&self) -> DefaceConfig {
        let mut config = DefaceConfig::default();
        config.paths.input_root = Some(self.input_root());
        config.paths.output_root = Some(self.output_root());
        config.run.workers = 2;
        config
    }

    pub fn mask_config(&self) -> DefaceConfig {
        let mut config = self.base_config();
        config.defacer.kind = DefacerKind::Mask;
        config.defacer.mask_path = Some(self.write_face_mask());
        config
    }

    /// Runs the script through `/bin/sh` so nothing freshly written is exec'd.
    pub fn script_config(&self, script: &Path) -> DefaceConfig {
        let mut config = self.base_config();
        config.defacer.kind = DefacerKind::External;
        config.defacer.command = "/bin/sh".into();
        config.defacer.args = vec![script.display().to_string()];
        config
    }

    /// Every file under the output root, relative, with `/` separators.
    pub fn output_files(&self) -> Vec<String> {
        let root = self.output_root();
        if !root.exists() {
            return Vec::new();
        }
        let mut files: Vec<String> = WalkDir::new(&root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                e.path()
                    .strip_prefix(&root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        files.sort();
        files
    }
}

pub fn voxel_count(dims: &[u16]) -> usize {
    dims.iter().map(|&d| d as usize).product()
}

/// Writes a little-endian single-file NIfTI-1, gzip-compressed for `.gz`.
pub fn write_nifti(path: &Path, dims: &[u16], datatype: i16, bitpix: i16, data: &[u8]) {
    let mut bytes = vec![0u8; 352];
    bytes[0..4].copy_from_slice(&348i32.to_le_bytes());
    let mut dim = [1u16; 8];
    dim[0] = dims.len() as u16;
    dim[1..=dims.len()].copy_from_slice(dims);
    for (i, d) in dim.iter().enumerate() {
        bytes[40 + i * 2..42 + i * 2].copy_from_slice(&d.to_le_bytes());
    }
    bytes[70..72].copy_from_slice(&datatype.to_le_bytes());
    bytes[72..74].copy_from_slice(&bitpix.to_le_bytes());
    for (i, p) in [1.0f32, 1.0, 1.0, 1.0].iter().enumerate() {
        bytes[76 + i * 4..80 + i * 4].copy_from_slice(&p.to_le_bytes());
    }
    bytes[108..112].copy_from_slice(&352.0f32.to_le_bytes());
    bytes[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    bytes[252..254].copy_from_slice(&1i16.to_le_bytes());
    bytes[254..256].copy_from_slice(&1i16.to_le_bytes());
    let srow = [
        [1.0f32, 0.0, 0.0, -1.5],
        [0.0, 1.0, 0.0, -1.5],
        [0.0, 0.0, 1.0, -1.5],
    ];
    for (r, row) in srow.iter().enumerate() {
        for (c, v) in row.iter().enumerate() {
            let at = 280 + r * 16 + c * 4;
            bytes[at..at + 4].copy_from_slice(&v.to_le_bytes());
        }
    }
    bytes[344..348].copy_from_slice(b"n+1\0");
    bytes.extend_from_slice(data);

    fs::create_dir_all(path.parent().unwrap()).unwrap();
    if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes).unwrap();
        fs::write(path, encoder.finish().unwrap()).unwrap();
    } else {
        fs::write(path, bytes).unwrap();
    }
}

mod selection;
mod run_records;
