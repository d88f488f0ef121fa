//! Label, annotation, and finalizer constants shared by the Job factory and
//! the reconciler's label-selector listing (spec.md §6).

pub const LABEL_PIPELINE_CONFIG: &str = "c8s.dev/pipeline-config";
pub const LABEL_PIPELINE_RUN: &str = "c8s.dev/pipeline-run";
pub const LABEL_STEP_NAME: &str = "c8s.dev/step-name";
pub const LABEL_COMMIT: &str = "c8s.dev/commit";
pub const LABEL_BRANCH: &str = "c8s.dev/branch";
pub const LABEL_MANAGED_BY: &str = "c8s.dev/managed-by";
pub const MANAGED_BY_VALUE: &str = "c8s";

pub const ANNOTATION_COMMIT_MESSAGE: &str = "c8s.dev/commit-message";
pub const ANNOTATION_AUTHOR: &str = "c8s.dev/author";

/// The platform-supplied label linking a Pod back to the Job that created
/// it (not one of ours — set by the Job controller itself).
pub const LABEL_JOB_NAME: &str = "job-name";

/// Finalizer token the reconciler adds to a `PipelineRun` on first sight
/// and clears once all owned Jobs have been deletion-initiated.
pub const FINALIZER: &str = "c8s.dev/pipeline-run";

/// Builds the label selector string used to list every Job (or Pod) owned
/// by a run: `c8s.dev/pipeline-run=<run>`.
pub fn run_label_selector(run_name: &str) -> String {
    format!("{LABEL_PIPELINE_RUN}={run_name}")
}
