/// T1w images of ds004021 flagged as carrying identifiable facial features.
pub const FLAGGED_T1W: &[&str] = &[
    "sub-06/ses-01/anat/sub-06_ses-01_T1w.nii.gz",
    "sub-06/ses-02/anat/sub-06_ses-02_T1w.nii.gz",
    "sub-07/ses-01/anat/sub-07_ses-01_T1w.nii.gz",
    "sub-07/ses-02/anat/sub-07_ses-02_T1w.nii.gz",
    "sub-10/ses-01/anat/sub-10_ses-01_T1w.nii.gz",
    "sub-10/ses-02/anat/sub-10_ses-02_T1w.nii.gz",
    "sub-11/ses-01/anat/sub-11_ses-01_T1w.nii.gz",
    "sub-11/ses-02/anat/sub-11_ses-02_T1w.nii.gz",
    "sub-12/ses-01/anat/sub-12_ses-01_T1w.nii.gz",
    "sub-12/ses-02/anat/sub-12_ses-02_T1w.nii.gz",
    "sub-14/ses-01/anat/sub-14_ses-01_T1w.nii.gz",
    "sub-14/ses-02/anat/sub-14_ses-02_T1w.nii.gz",
    "sub-18/ses-01/anat/sub-18_ses-01_T1w.nii.gz",
    "sub-18/ses-02/anat/sub-18_ses-02_T1w.nii.gz",
    "sub-19/ses-01/anat/sub-19_ses-01_T1w.nii.gz",
    "sub-19/ses-02/anat/sub-19_ses-02_T1w.nii.gz",
    "sub-22/ses-01/anat/sub-22_ses-01_T1w.nii.gz",
    "sub-22/ses-02/anat/sub-22_ses-02_T1w.nii.gz",
    "sub-24/ses-01/anat/sub-24_ses-01_T1w.nii.gz",
    "sub-24/ses-02/anat/sub-24_ses-02_T1w.nii.gz",
    "sub-27/ses-01/anat/sub-27_ses-01_T1w.nii.gz",
    "sub-28/ses-01/anat/sub-28_ses-01_T1w.nii.gz",
    "sub-28/ses-02/anat/sub-28_ses-02_T1w.nii.gz",
    "sub-29/ses-01/anat/sub-29_ses-01_T1w.nii.gz",
    "sub-29/ses-02/anat/sub-29_ses-02_T1w.nii.gz",
    "sub-39/ses-01/anat/sub-39_ses-01_T1w.nii.gz",
    "sub-39/ses-02/anat/sub-39_ses-02_T1w.nii.gz",
];
