use super::{FileOutcome, FileReport, RunSummary};

pub fn progress_line(report: &FileReport) -> String {
    match &report.outcome {
        FileOutcome::Defaced { .. } => format!("[OK] {} -> defaced", report.label),
        FileOutcome::Skipped { .. } => {
            format!("[OK] {} -> skipped (already exists)", report.label)
        }
        FileOutcome::Failed(issue) => format!("[ERR] {} -> {}", report.label, issue.message),
    }
}

/// Final report: a summary line followed by one line per failed path.
pub fn format_summary(summary: &RunSummary) -> Vec<String> {
    let mut lines = vec![format!(
        "Summary: {} succeeded, {} failed (defaced {}, skipped {}, discovered {})",
        summary.succeeded(),
        summary.failed,
        summary.defaced,
        summary.skipped,
        summary.discovered
    )];
    for issue in &summary.issues {
        lines.push(format!(
            "  failed: {} ({:?})",
            issue.path.display(),
            issue.reason
        ));
    }
    lines
}
