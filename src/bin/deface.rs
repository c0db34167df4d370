use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use bids_deface::config::{self, DefaceConfig, DefacerKind, Selection};
use bids_deface::processing::{format_summary, prepare, progress_line, RunSummary};
use clap::{Parser, ValueEnum};

/// Exit code for configuration and setup faults.
const SETUP_FAILURE: u8 = 2;

#[derive(Parser)]
#[command(name = "deface")]
#[command(about = "Deface anatomical MRI images of a BIDS dataset into a separate output tree")]
struct Cli {
    /// Dataset root (source, never modified)
    #[arg(long, visible_alias = "dataset-root")]
    input_root: Option<PathBuf>,
    /// Where the defaced tree is written, mirroring the dataset layout
    #[arg(long)]
    output_root: Option<PathBuf>,
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Only deface the built-in list of flagged ds004021 T1w images
    #[arg(long, conflicts_with = "list")]
    flagged: bool,
    /// Text file with one relative image path per line
    #[arg(long)]
    list: Option<PathBuf>,
    /// BIDS suffix to deface (repeatable, default T1w)
    #[arg(long = "suffix")]
    suffixes: Vec<String>,
    /// Defacing backend
    #[arg(long, value_enum)]
    defacer: Option<Backend>,
    /// External defacing command (default pydeface)
    #[arg(long)]
    command: Option<String>,
    /// Face mask in image space, for the mask backend
    #[arg(long)]
    mask: Option<PathBuf>,
    /// Number of parallel workers
    #[arg(long)]
    workers: Option<u32>,
    /// Also copy matching sidecar .json files
    #[arg(long)]
    copy_sidecars: bool,
    /// Skip images whose output already exists
    #[arg(long)]
    skip_existing: bool,
    /// Do not compare output shape, datatype and affine with the input
    #[arg(long)]
    no_verify: bool,
    /// Append JSONL run events to this file
    #[arg(long)]
    run_log: Option<PathBuf>,
    /// Write a JSON manifest of outputs and their sha256
    #[arg(long)]
    manifest: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    External,
    Mask,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(summary) if summary.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            ExitCode::from(SETUP_FAILURE)
        }
    }
}

fn run(cli: Cli) -> Result<RunSummary> {
    let mut config = config::load_or_default(cli.config.as_deref())?;
    apply_overrides(&mut config, cli);
    let prepared = prepare(&config)?;

    println!("Source: {}", prepared.roots.input_root.display());
    println!("Output: {}", prepared.roots.output_root.display());
    println!("Defacer: {}", prepared.defacer.name());
    println!("Workers: {}", config.run.workers.max(1));
    println!("{}", "-".repeat(72));

    if prepared.candidates.is_empty() {
        println!("No candidate images found; nothing to do.");
        return Ok(RunSummary::default());
    }

    let outcome = prepared
        .runner(config.run.clone())
        .run(&prepared.candidates, |report| println!("{}", progress_line(report)))?;

    println!("{}", "-".repeat(72));
    for line in format_summary(&outcome.summary) {
        println!("{line}");
    }
    Ok(outcome.summary)
}

fn apply_overrides(config: &mut DefaceConfig, cli: Cli) {
    if cli.input_root.is_some() {
        config.paths.input_root = cli.input_root;
    }
    if cli.output_root.is_some() {
        config.paths.output_root = cli.output_root;
    }
    if cli.flagged {
        config.discovery.selection = Selection::Flagged;
    }
    if let Some(list) = cli.list {
        config.discovery.selection = Selection::List;
        config.discovery.list_file = Some(list);
    }
    if !cli.suffixes.is_empty() {
        config.discovery.suffixes = cli.suffixes;
    }
    if let Some(backend) = cli.defacer {
        config.defacer.kind = match backend {
            Backend::External => DefacerKind::External,
            Backend::Mask => DefacerKind::Mask,
        };
    }
    if let Some(command) = cli.command {
        config.defacer.command = command;
    }
    if let Some(mask) = cli.mask {
        config.defacer.mask_path = Some(mask);
        if cli.defacer.is_none() {
            config.defacer.kind = DefacerKind::Mask;
        }
    }
    if let Some(workers) = cli.workers {
        config.run.workers = workers;
    }
    config.run.copy_sidecars |= cli.copy_sidecars;
    config.run.skip_existing |= cli.skip_existing;
    if cli.no_verify {
        config.run.verify_geometry = false;
    }
    if cli.run_log.is_some() {
        config.run.run_log = cli.run_log;
    }
    if cli.manifest.is_some() {
        config.run.manifest = cli.manifest;
    }
}
