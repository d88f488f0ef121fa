//! Matrix Coordinator (component G), I/O half: creates child `PipelineRun`s
//! for a matrix-expanded config and periodically rolls their phases up into
//! the parent.

use c8s_core::matrix::{expand_cells, fold_phase, is_settled, mean_succeeded_duration};
use c8s_core::pipeline::MatrixSpec;
use c8s_core::run::{PipelineRunSpec, PipelineRunStatus, ResourceUsage, RunPhase};
use c8s_core::Error;
use c8s_k8s::crd::{PipelineRun, PipelineRunCrdSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Resource, ResourceExt};
use tracing::info;

/// Creates one child run per surviving matrix cell, skipping cells whose
/// deterministic child name already exists (the same Create-is-idempotent
/// pattern the Job Factory relies on).
pub async fn expand_children(
    runs: &Api<PipelineRun>,
    parent: &PipelineRun,
    parent_name: &str,
    matrix: &MatrixSpec,
) -> Result<Vec<String>, Error> {
    let cells = expand_cells(matrix);
    let mut created = Vec::with_capacity(cells.len());

    for (index, cell) in cells.into_iter().enumerate() {
        let child_name = format!("{parent_name}-{index}");

        match runs.get_opt(&child_name).await {
            Ok(Some(_)) => {
                created.push(child_name);
                continue;
            }
            Ok(None) => {}
            Err(e) => return Err(Error::Kube(e.to_string())),
        }

        let spec = PipelineRunSpec {
            pipeline_config_ref: parent.spec.pipeline_config_ref.clone(),
            commit: parent.spec.commit.clone(),
            branch: parent.spec.branch.clone(),
            triggered_by: parent.spec.triggered_by.clone(),
            commit_message: parent.spec.commit_message.clone(),
            author: parent.spec.author.clone(),
            matrix_index: Some(cell),
            parent_id: Some(parent_name.to_string()),
        };

        let mut child = PipelineRun::new(&child_name, PipelineRunCrdSpec(spec));
        child.meta_mut().owner_references = Some(vec![OwnerReference {
            api_version: "c8s.dev/v1".to_string(),
            kind: "PipelineRun".to_string(),
            name: parent_name.to_string(),
            uid: parent.uid().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }]);

        runs.create(&PostParams::default(), &child).await.map_err(|e| Error::Kube(e.to_string()))?;
        info!(parent = %parent_name, child = %child_name, "created matrix child run");
        created.push(child_name);
    }

    Ok(created)
}

/// §4.G step 3: fold every child's status into the parent's, by listing
/// children whose `spec.parentID == parentName`.
pub async fn aggregate_children(
    runs: &Api<PipelineRun>,
    parent_name: &str,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<PipelineRunStatus, Error> {
    let all = runs.list(&ListParams::default()).await.map_err(|e| Error::Kube(e.to_string()))?;

    let children: Vec<_> = all
        .items
        .into_iter()
        .filter(|r| r.spec.parent_id.as_deref() == Some(parent_name))
        .collect();

    let phases: Vec<RunPhase> = children
        .iter()
        .map(|c| c.status.as_ref().map(|s| s.phase).unwrap_or_default())
        .collect();

    let mut status = PipelineRunStatus {
        phase: fold_phase(phases.iter().copied()),
        ..Default::default()
    };

    if is_settled(&phases) && !phases.is_empty() {
        status.completion_time = Some(now);
    }

    let durations: Vec<(RunPhase, i64)> = children
        .iter()
        .filter_map(|c| {
            let s = c.status.as_ref()?;
            let start = s.start_time?;
            let end = s.completion_time?;
            Some((s.phase, (end - start).num_seconds()))
        })
        .collect();

    status.resource_usage = mean_succeeded_duration(&durations).map(|duration_seconds| ResourceUsage {
        duration_seconds: Some(duration_seconds),
    });

    Ok(status)
}

pub async fn persist_parent_status(
    runs: &Api<PipelineRun>,
    parent_name: &str,
    status: &PipelineRunStatus,
) -> Result<(), Error> {
    let patch = serde_json::json!({ "status": status });
    runs.patch_status(parent_name, &PatchParams::apply("c8s-controller"), &Patch::Merge(patch))
        .await
        .map_err(|e| Error::Kube(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_run_name_is_deterministic_per_cell_index() {
        let name_for = |i: usize| format!("parent-{i}");
        assert_eq!(name_for(0), "parent-0");
        assert_eq!(name_for(1), "parent-1");
    }
}
