use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use bids_deface::processing::read_manifest;
use clap::Parser;

/// Checks that a defaced tree still matches the manifest its run wrote.
#[derive(Parser)]
#[command(name = "verify_manifest")]
struct Cli {
    /// Manifest written by `deface --manifest`
    manifest: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match verify(&cli.manifest) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn verify(path: &Path) -> Result<bool> {
    let manifest = read_manifest(path)?;
    if !manifest.failures.is_empty() {
        println!(
            "Run {} recorded {} failed images:",
            manifest.run_id,
            manifest.failures.len()
        );
        for issue in &manifest.failures {
            println!("  - {} ({:?})", issue.path.display(), issue.reason);
        }
    }

    let drift = manifest.verify_outputs()?;
    if drift.is_empty() {
        println!(
            "Manifest {} verified: {} defaced outputs match recorded hashes.",
            path.display(),
            manifest.outputs.len()
        );
        return Ok(true);
    }
    println!("Manifest verification failed ({} outputs):", drift.len());
    for entry in &drift {
        println!("  - {entry}");
    }
    Ok(false)
}
