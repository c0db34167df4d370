use super::{voxel_count, write_nifti, IntegrationHarness, DIMS};
use anyhow::Result;
use bids_deface::config::Selection;
use bids_deface::processing::DefaceIssueReason;
use bids_deface::{prepare, run_with_config};
use std::fs;

#[test]
fn flagged_selection_reports_missing_images() -> Result<()> {
    let harness = IntegrationHarness::new();
    harness.write_volume("sub-06/ses-01/anat/sub-06_ses-01_T1w.nii.gz");
    harness.write_volume("sub-06/ses-02/anat/sub-06_ses-02_T1w.nii.gz");
    // not flagged, must be left alone
    harness.write_volume("sub-01/ses-01/anat/sub-01_ses-01_T1w.nii.gz");
    let mut config = harness.mask_config();
    config.discovery.selection = Selection::Flagged;

    let outcome = run_with_config(&config, |_| {})?;
    assert_eq!(outcome.summary.discovered, 27);
    assert_eq!(outcome.summary.defaced, 2);
    assert_eq!(outcome.summary.failed, 25);
    assert!(outcome
        .summary
        .issues
        .iter()
        .all(|issue| issue.reason == DefaceIssueReason::MissingSource));
    assert_eq!(
        harness.output_files(),
        vec![
            "sub-06/ses-01/anat/sub-06_ses-01_T1w.nii.gz".to_string(),
            "sub-06/ses-02/anat/sub-06_ses-02_T1w.nii.gz".to_string(),
        ]
    );
    Ok(())
}

#[test]
fn list_file_selects_exactly_the_listed_images() -> Result<()> {
    let harness = IntegrationHarness::new();
    harness.write_volume("sub-01/anat/sub-01_T1w.nii.gz");
    harness.write_volume("sub-02/anat/sub-02_T1w.nii.gz");
    let list = harness.workspace_path().join("subset.txt");
    fs::write(
        &list,
        "# reviewed by hand\nsub-02/anat/sub-02_T1w.nii.gz\nsub-03/anat/sub-03_T1w.nii.gz\n",
    )?;
    let mut config = harness.mask_config();
    config.discovery.selection = Selection::List;
    config.discovery.list_file = Some(list);

    let outcome = run_with_config(&config, |_| {})?;
    assert_eq!(outcome.summary.discovered, 2);
    assert_eq!(outcome.summary.defaced, 1);
    assert_eq!(outcome.summary.failed, 1);
    assert_eq!(
        outcome.summary.issues[0].reason,
        DefaceIssueReason::MissingSource
    );
    assert_eq!(
        harness.output_files(),
        vec!["sub-02/anat/sub-02_T1w.nii.gz".to_string()]
    );
    Ok(())
}

#[test]
fn pattern_selection_honours_extra_suffixes() -> Result<()> {
    let harness = IntegrationHarness::new();
    harness.write_volume("sub-01/anat/sub-01_T1w.nii.gz");
    harness.write_volume("sub-01/anat/sub-01_T2w.nii.gz");
    harness.write_volume("sub-01/func/sub-01_task-rest_bold.nii.gz");
    harness.write_volume("derivatives/masks/sub-01/anat/sub-01_T1w.nii.gz");

    let mut config = harness.mask_config();
    let t1_only = run_with_config(&config, |_| {})?;
    assert_eq!(t1_only.summary.defaced, 1);

    config.discovery.suffixes = vec!["T1w".into(), "T2w".into()];
    let both = run_with_config(&config, |_| {})?;
    assert_eq!(both.summary.defaced, 2);
    assert_eq!(
        harness.output_files(),
        vec![
            "sub-01/anat/sub-01_T1w.nii.gz".to_string(),
            "sub-01/anat/sub-01_T2w.nii.gz".to_string(),
        ]
    );
    Ok(())
}

#[test]
fn output_root_inside_dataset_is_refused() {
    let harness = IntegrationHarness::new();
    harness.write_volume("sub-01/anat/sub-01_T1w.nii.gz");
    let mut config = harness.mask_config();
    config.paths.output_root = Some(harness.input_root().join("derivatives").join("defaced"));

    assert!(run_with_config(&config, |_| {}).is_err());
    assert!(!harness.input_root().join("derivatives").exists());
}

#[cfg(unix)]
#[test]
fn symlinked_images_are_discovered() -> Result<()> {
    let harness = IntegrationHarness::new();
    let annexed = harness.workspace_path().join("annex").join("object.nii.gz");
    let values: Vec<u8> = (0..voxel_count(&DIMS))
        .flat_map(|i| (i as i16 + 1).to_le_bytes())
        .collect();
    write_nifti(&annexed, &DIMS, 4, 16, &values);
    let link = harness.input_root().join("sub-01/anat/sub-01_T1w.nii.gz");
    fs::create_dir_all(link.parent().unwrap())?;
    std::os::unix::fs::symlink(&annexed, &link)?;

    let outcome = run_with_config(&harness.mask_config(), |_| {})?;
    assert_eq!(outcome.summary.discovered, 1);
    assert_eq!(outcome.summary.defaced, 1);
    assert_eq!(
        harness.output_files(),
        vec!["sub-01/anat/sub-01_T1w.nii.gz".to_string()]
    );
    let written = harness.output_root().join("sub-01/anat/sub-01_T1w.nii.gz");
    assert!(!fs::symlink_metadata(&written)?.file_type().is_symlink());
    Ok(())
}

#[test]
fn prepare_discovers_without_touching_the_output_root() -> Result<()> {
    let harness = IntegrationHarness::new();
    harness.write_volume("sub-02/anat/sub-02_T1w.nii.gz");
    harness.write_volume("sub-01/anat/sub-01_T1w.nii.gz");

    let prepared = prepare(&harness.mask_config())?;
    assert!(prepared.defacer.name().starts_with("mask:"));
    assert_eq!(prepared.roots.input_root, harness.input_root().canonicalize()?);
    let labels: Vec<String> = prepared.candidates.iter().map(|c| c.label()).collect();
    assert_eq!(
        labels,
        vec![
            "sub-01/anat/sub-01_T1w.nii.gz".to_string(),
            "sub-02/anat/sub-02_T1w.nii.gz".to_string(),
        ]
    );
    assert!(!harness.output_root().exists());
    Ok(())
}
