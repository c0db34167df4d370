use super::error::{DefaceIssue, DefaceIssueReason};
use super::manifest::{hash_path, RunManifest};
use super::run_log::RunLog;
use super::{FileOutcome, FileReport, RunSummary};
use crate::config::{DefaceConfig, ResolvedRoots, RunOptions};
use crate::dataset::{discover, ImageCandidate};
use crate::deface::{build_defacer, DefaceJob, Defacer};
use crate::image::NiftiImage;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

/// Prefix of staging files and directories created next to outputs.
const STAGING_PREFIX: &str = ".deface-";

/// Outcome of a whole batch.
pub struct RunOutcome {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// One report per candidate, in candidate order.
    pub reports: Vec<FileReport>,
    pub summary: RunSummary,
}

pub struct BatchRunner<'a> {
    roots: ResolvedRoots,
    options: RunOptions,
    defacer: &'a dyn Defacer,
}

impl<'a> BatchRunner<'a> {
    pub fn new(roots: ResolvedRoots, options: RunOptions, defacer: &'a dyn Defacer) -> Self {
        Self {
            roots,
            options,
            defacer,
        }
    }

    /// Defaces every candidate; `on_progress` sees each report as it finishes.
    ///
    /// Per-file faults end up in the reports. Only setup faults (thread pool,
    /// output root, run log, manifest) are returned as errors.
    pub fn run<F>(&self, candidates: &[ImageCandidate], on_progress: F) -> Result<RunOutcome>
    where
        F: Fn(&FileReport) + Sync,
    {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        if candidates.is_empty() {
            return Ok(RunOutcome {
                run_id,
                started_at,
                completed_at: Utc::now(),
                reports: Vec::new(),
                summary: RunSummary::default(),
            });
        }

        fs::create_dir_all(&self.roots.output_root).with_context(|| {
            format!(
                "Output root '{}' is not writable",
                self.roots.output_root.display()
            )
        })?;
        let log = self
            .options
            .run_log
            .as_ref()
            .map(|path| RunLog::new(path, run_id));
        if let Some(log) = &log {
            log.run_started(
                &self.roots.input_root,
                &self.roots.output_root,
                self.defacer.name(),
                candidates.len(),
            )?;
        }

        let workers = self.options.workers.max(1) as usize;
        info!(
            %run_id,
            files = candidates.len(),
            workers,
            defacer = self.defacer.name(),
            "starting defacing run"
        );
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .context("Failed to configure defacing thread pool")?;
        let reports: Vec<FileReport> = pool.install(|| {
            candidates
                .par_iter()
                .map(|candidate| {
                    let report = self.process_one(candidate);
                    if let Some(log) = &log {
                        if let Err(err) = log.file_finished(&report) {
                            warn!(error = %err, file = %report.label, "unable to append run log");
                        }
                    }
                    on_progress(&report);
                    report
                })
                .collect()
        });

        let completed_at = Utc::now();
        let summary = RunSummary::from_reports(&reports);
        let duration_ms = (completed_at - started_at).num_milliseconds();
        if let Some(log) = &log {
            log.run_completed(&summary, duration_ms)?;
        }
        if let Some(path) = &self.options.manifest {
            RunManifest::from_reports(
                run_id,
                &self.roots.input_root,
                &self.roots.output_root,
                self.defacer.name(),
                started_at,
                &reports,
            )
            .persist(path)?;
        }
        info!(
            %run_id,
            defaced = summary.defaced,
            skipped = summary.skipped,
            failed = summary.failed,
            duration_ms,
            "defacing run finished"
        );

        Ok(RunOutcome {
            run_id,
            started_at,
            completed_at,
            reports,
            summary,
        })
    }

    /// Runs the pipeline for one candidate. Never panics on file faults.
    pub fn process_one(&self, candidate: &ImageCandidate) -> FileReport {
        let outcome = self
            .deface_candidate(candidate)
            .unwrap_or_else(FileOutcome::Failed);
        FileReport {
            label: candidate.label(),
            outcome,
        }
    }

    fn deface_candidate(&self, candidate: &ImageCandidate) -> Result<FileOutcome, DefaceIssue> {
        let source = candidate.source_path.as_path();
        let output = candidate.output_path(&self.roots.output_root);

        if !source.is_file() {
            return Err(DefaceIssue::new(
                source,
                DefaceIssueReason::MissingSource,
                format!("Missing source file: {}", source.display()),
            ));
        }
        if self.options.skip_existing && output.exists() {
            self.copy_sidecar(candidate)?;
            return Ok(FileOutcome::Skipped { output });
        }

        let image = NiftiImage::load(source)
            .map_err(|err| DefaceIssue::from_error(source, DefaceIssueReason::LoadFailure, &err))?;

        let write_issue =
            |err: anyhow::Error| DefaceIssue::from_error(&output, DefaceIssueReason::WriteFailure, &err);
        let parent = output
            .parent()
            .context("Output path has no parent directory")
            .map_err(write_issue)?;
        fs::create_dir_all(parent)
            .with_context(|| format!("Unable to create {}", parent.display()))
            .map_err(write_issue)?;
        // Dropping the staging directory removes whatever the defacer left behind.
        let staging_dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)
            .with_context(|| format!("Unable to create staging directory in {}", parent.display()))
            .map_err(write_issue)?;
        let file_name = output
            .file_name()
            .context("Output path has no file name")
            .map_err(write_issue)?;
        let staging_path = staging_dir.path().join(file_name);

        let job = DefaceJob {
            source_path: source,
            source: &image,
            staging_path: &staging_path,
        };
        self.defacer
            .deface(&job)
            .map_err(|err| DefaceIssue::from_error(source, DefaceIssueReason::TransformFailure, &err))?;

        if self.options.verify_geometry {
            let staged = NiftiImage::load(&staging_path).map_err(|err| {
                DefaceIssue::new(
                    source,
                    DefaceIssueReason::OutputMismatch,
                    format!("Defaced output is not a readable image: {err:#}"),
                )
            })?;
            if let Some(reason) = image.geometry().describe_mismatch(&staged.geometry()) {
                return Err(DefaceIssue::new(
                    source,
                    DefaceIssueReason::OutputMismatch,
                    format!("Defaced output changed {reason}"),
                ));
            }
        }

        let sha256 = hash_path(&staging_path).map_err(write_issue)?;
        fs::rename(&staging_path, &output)
            .with_context(|| format!("Unable to move defaced image into {}", output.display()))
            .map_err(write_issue)?;
        drop(staging_dir);

        self.copy_sidecar(candidate)?;
        Ok(FileOutcome::Defaced { output, sha256 })
    }

    fn copy_sidecar(&self, candidate: &ImageCandidate) -> Result<(), DefaceIssue> {
        if !self.options.copy_sidecars {
            return Ok(());
        }
        let source = candidate.source_sidecar();
        if !source.is_file() {
            return Ok(());
        }
        let target = candidate.output_sidecar(&self.roots.output_root);
        copy_atomic(&source, &target)
            .map_err(|err| DefaceIssue::from_error(&target, DefaceIssueReason::WriteFailure, &err))
    }
}

/// Everything a batch needs once setup has succeeded.
pub struct PreparedRun {
    pub defacer: Box<dyn Defacer>,
    pub roots: ResolvedRoots,
    pub candidates: Vec<ImageCandidate>,
}

impl PreparedRun {
    pub fn runner(&self, options: RunOptions) -> BatchRunner<'_> {
        BatchRunner::new(self.roots.clone(), options, self.defacer.as_ref())
    }
}

/// Validates the configuration, builds the defacer, resolves the roots and
/// discovers candidates. Every error here is a setup fault.
pub fn prepare(config: &DefaceConfig) -> Result<PreparedRun> {
    config.validate()?;
    let defacer = build_defacer(&config.defacer)?;
    let roots = config.resolve_roots()?;
    let candidates = discover(&roots.input_root, &config.discovery)?;
    Ok(PreparedRun {
        defacer,
        roots,
        candidates,
    })
}

/// Prepares and runs the batch. Errors are setup faults; file faults live in
/// the outcome.
pub fn run_with_config<F>(config: &DefaceConfig, on_progress: F) -> Result<RunOutcome>
where
    F: Fn(&FileReport) + Sync,
{
    let prepared = prepare(config)?;
    prepared
        .runner(config.run.clone())
        .run(&prepared.candidates, on_progress)
}

/// Copies through a staging file in the target directory, then renames.
fn copy_atomic(source: &Path, target: &Path) -> Result<()> {
    let parent = target
        .parent()
        .context("Sidecar target has no parent directory")?;
    fs::create_dir_all(parent)?;
    let mut staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(parent)
        .with_context(|| format!("Unable to stage sidecar in {}", parent.display()))?;
    let mut reader = File::open(source)
        .with_context(|| format!("Unable to open sidecar {}", source.display()))?;
    io::copy(&mut reader, staged.as_file_mut())
        .with_context(|| format!("Unable to copy sidecar {}", source.display()))?;
    staged.as_file().sync_all()?;
    staged
        .persist(target)
        .map_err(|err| err.error)
        .with_context(|| format!("Unable to move sidecar into {}", target.display()))?;
    Ok(())
}
