use super::IntegrationHarness;
use anyhow::Result;
use bids_deface::processing::{hash_path, load_events, read_manifest, OutputDrift, RunEventType};
use std::fs;
use bids_deface::run_with_config;

#[test]
fn manifest_records_output_hashes_and_failures() -> Result<()> {
    let harness = IntegrationHarness::new();
    harness.write_volume("sub-11/ses-01/anat/sub-11_ses-01_T1w.nii.gz");
    harness.write_corrupt("sub-11/ses-02/anat/sub-11_ses-02_T1w.nii.gz");
    let manifest_path = harness.workspace_path().join("records").join("manifest.json");
    let mut config = harness.mask_config();
    config.run.manifest = Some(manifest_path.clone());

    let outcome = run_with_config(&config, |_| {})?;
    let manifest = read_manifest(&manifest_path)?;
    assert_eq!(manifest.run_id, outcome.run_id);
    assert_eq!(manifest.outputs.len(), 1);
    assert_eq!(manifest.failures.len(), 1);
    let output = &manifest.outputs[0];
    assert_eq!(output.relative_path, "sub-11/ses-01/anat/sub-11_ses-01_T1w.nii.gz");
    assert_eq!(hash_path(&output.path)?, output.sha256);
    assert!(!harness.output_files().iter().any(|f| f.ends_with(".json")));
    Ok(())
}

#[test]
fn run_log_captures_lifecycle_events() -> Result<()> {
    let harness = IntegrationHarness::new();
    harness.write_volume("sub-12/anat/sub-12_T1w.nii.gz");
    harness.write_corrupt("sub-13/anat/sub-13_T1w.nii.gz");
    let log_path = harness.workspace_path().join("logs").join("runs.jsonl");
    let mut config = harness.mask_config();
    config.run.run_log = Some(log_path.clone());

    let outcome = run_with_config(&config, |_| {})?;
    let events = load_events(&log_path)?;
    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|e| e.run_id == outcome.run_id));
    assert_eq!(events[0].event_type, RunEventType::RunStarted);
    assert_eq!(events[3].event_type, RunEventType::RunCompleted);
    assert_eq!(
        events
            .iter()
            .filter(|e| e.event_type == RunEventType::FileFailed)
            .count(),
        1
    );
    assert_eq!(events[3].details["failed"], 1);

    run_with_config(&config, |_| {})?;
    assert_eq!(load_events(&log_path)?.len(), 8);
    Ok(())
}

#[test]
fn manifest_verification_detects_changed_and_missing_outputs() -> Result<()> {
    let harness = IntegrationHarness::new();
    harness.write_volume("sub-14/anat/sub-14_T1w.nii.gz");
    harness.write_volume("sub-15/anat/sub-15_T1w.nii.gz");
    let manifest_path = harness.workspace_path().join("manifest.json");
    let mut config = harness.mask_config();
    config.run.manifest = Some(manifest_path.clone());
    run_with_config(&config, |_| {})?;

    let manifest = read_manifest(&manifest_path)?;
    assert!(manifest.verify_outputs()?.is_empty());

    let output_root = harness.output_root();
    fs::write(output_root.join("sub-14/anat/sub-14_T1w.nii.gz"), b"tampered")?;
    fs::remove_file(output_root.join("sub-15/anat/sub-15_T1w.nii.gz"))?;
    let drift = manifest.verify_outputs()?;
    assert_eq!(drift.len(), 2);
    assert!(matches!(
        &drift[0],
        OutputDrift::Changed { relative_path, .. } if relative_path == "sub-14/anat/sub-14_T1w.nii.gz"
    ));
    assert!(matches!(
        &drift[1],
        OutputDrift::Missing { relative_path, .. } if relative_path == "sub-15/anat/sub-15_T1w.nii.gz"
    ));
    assert!(drift[1].to_string().starts_with("[missing]"));
    Ok(())
}
