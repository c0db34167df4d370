pub mod config;
pub mod dataset;
pub mod deface;
pub mod image;
pub mod processing;

// Re-export commonly used types for convenience.
pub use config::{DefaceConfig, ResolvedRoots};
pub use dataset::{discover, ImageCandidate};
pub use deface::{build_defacer, Defacer};
pub use image::{ImageGeometry, NiftiImage};
pub use processing::{
    prepare, run_with_config, BatchRunner, FileOutcome, FileReport, PreparedRun, RunOutcome,
    RunSummary,
};
