//! Custom resource definitions for the cluster-API contract (spec.md §6):
//! `PipelineConfig` and `PipelineRun`.
//!
//! The actual field models live in `c8s_core` (pure, no cluster
//! dependency); these wrappers are the thin kube-rs layer that gives them
//! Kubernetes object identity (metadata, a `status` subresource) via the
//! `#[derive(CustomResource)]` macro from the `kube` crate's `derive`
//! feature — the feature the workspace already declares.

use c8s_core::pipeline::PipelineConfig as PipelineConfigSpec;
use c8s_core::run::{PipelineRunSpec, PipelineRunStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The `PipelineConfig` custom resource. Immutable template; no status
/// subresource (spec.md never describes one).
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "c8s.dev",
    version = "v1",
    kind = "PipelineConfig",
    namespaced,
    shortname = "pc"
)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfigCrdSpec(#[serde(flatten)] pub PipelineConfigSpec);

impl std::ops::Deref for PipelineConfigCrdSpec {
    type Target = PipelineConfigSpec;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The `PipelineRun` custom resource: one execution of a `PipelineConfig`.
/// Carries a `status` subresource so spec edits and status writes use
/// separate API calls, as Kubernetes controllers expect.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "c8s.dev",
    version = "v1",
    kind = "PipelineRun",
    namespaced,
    shortname = "pr",
    status = "PipelineRunStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunCrdSpec(#[serde(flatten)] pub PipelineRunSpec);

impl std::ops::Deref for PipelineRunCrdSpec {
    type Target = PipelineRunSpec;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_run_crd_round_trips_through_json() {
        let run = PipelineRun::new(
            "run-1",
            PipelineRunCrdSpec(PipelineRunSpec {
                pipeline_config_ref: "demo".to_string(),
                commit: "abc123".to_string(),
                branch: "main".to_string(),
                triggered_by: "webhook".to_string(),
                commit_message: None,
                author: None,
                matrix_index: None,
                parent_id: None,
            }),
        );
        let json = serde_json::to_string(&run).unwrap();
        let back: PipelineRun = serde_json::from_str(&json).unwrap();
        assert_eq!(back.spec.commit, "abc123");
    }
}
