//! Cluster-facing types: the `kube::CustomResource` wrappers and the Job
//! Factory that turns a step into a `batch/v1` `Job` manifest.
//!
//! Everything here depends on `k8s-openapi`/`kube`; the pure domain model
//! lives in `c8s_core` and has no cluster dependency at all.

pub mod crd;
pub mod job;

pub use crd::{PipelineConfig, PipelineConfigCrdSpec, PipelineRun, PipelineRunCrdSpec};
pub use job::{build_job, RunContext};
