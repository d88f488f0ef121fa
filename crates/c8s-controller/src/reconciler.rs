//! The reconciler (spec.md §4.F): one `reconcile(runName)` invocation per
//! watch event, level-triggered and idempotent.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use c8s_core::aggregate::{aggregate, JobCounts};
use c8s_core::labels::{run_label_selector, FINALIZER, LABEL_STEP_NAME};
use c8s_core::plan::Schedule;
use c8s_core::run::RunPhase;
use chrono::Utc;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PropagationPolicy};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use thiserror::Error;
use tracing::{error, info, warn};

use c8s_k8s::crd::{PipelineConfig, PipelineRun};
use c8s_k8s::job::{build_job, RunContext};

use crate::context::Context;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Core(#[from] c8s_core::Error),
    #[error("cluster API error: {0}")]
    Kube(#[from] kube::Error),
}

pub async fn reconcile(run: Arc<PipelineRun>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let namespace = run.namespace().unwrap_or_default();
    let run_name = run.name_any();
    let runs: Api<PipelineRun> = Api::namespaced(ctx.client.clone(), &namespace);

    if run.meta().deletion_timestamp.is_some() {
        return finalize(&run, &runs, &ctx).await;
    }

    if !run.finalizers().iter().any(|f| f == FINALIZER) {
        info!(run = %run_name, "adding finalizer");
        add_finalizer(&runs, &run_name).await?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    let mut status = run.status.clone().unwrap_or_default();
    if status.phase.is_terminal() {
        return Ok(Action::await_change());
    }

    let configs: Api<PipelineConfig> = Api::namespaced(ctx.client.clone(), &namespace);
    let config = match configs.get_opt(&run.spec.pipeline_config_ref).await? {
        Some(c) => c,
        None => {
            warn!(run = %run_name, config = %run.spec.pipeline_config_ref, "pipeline config not found");
            status.phase = RunPhase::Failed;
            persist_status(&runs, &run_name, &status).await?;
            return Ok(Action::await_change());
        }
    };

    if matches!(status.phase, RunPhase::Empty) {
        status.phase = RunPhase::Pending;
        persist_status(&runs, &run_name, &status).await?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    if let Some(matrix) = config.spec.matrix.as_ref().filter(|_| run.spec.matrix_index.is_none()) {
        crate::matrix::expand_children(&runs, &run, &run_name, matrix).await?;
        let aggregated = crate::matrix::aggregate_children(&runs, &run_name, Utc::now()).await?;
        crate::matrix::persist_parent_status(&runs, &run_name, &aggregated).await?;

        return if aggregated.phase.is_terminal() {
            Ok(Action::await_change())
        } else {
            Ok(Action::requeue(ctx.requeue_after))
        };
    }

    let schedule = match Schedule::build(&config.spec, &run.spec.branch) {
        Ok(s) => s,
        Err(e) => {
            warn!(run = %run_name, error = %e, "invalid schedule");
            status.phase = RunPhase::Failed;
            persist_status(&runs, &run_name, &status).await?;
            return Ok(Action::await_change());
        }
    };

    let completed = status.completed_steps();
    let succeeded = status.succeeded_steps();
    let ready = schedule.ready_steps(&completed, &succeeded);

    let jobs: Api<Job> = Api::namespaced(ctx.client.clone(), &namespace);
    launch_ready_steps(&jobs, &ready, &run, &config.spec.repository, &namespace, &run_name).await;

    let jobs_by_step = list_owned_jobs(&jobs, &run_name).await?;
    aggregate(&mut status, &run_name, &schedule, &jobs_by_step, Utc::now());

    collect_logs(&ctx, &namespace, &run_name, &config.spec, &schedule, &jobs_by_step, &mut status).await;

    persist_status(&runs, &run_name, &status).await?;

    if status.phase.is_terminal() {
        Ok(Action::await_change())
    } else {
        Ok(Action::requeue(ctx.requeue_after))
    }
}

pub fn error_policy(_run: Arc<PipelineRun>, error: &ReconcileError, _ctx: Arc<Context>) -> Action {
    error!(%error, "reconcile failed");
    Action::requeue(Duration::from_secs(10))
}

async fn add_finalizer(runs: &Api<PipelineRun>, name: &str) -> Result<(), ReconcileError> {
    let mut run = runs.get(name).await?;
    run.meta_mut().finalizers.get_or_insert_with(Vec::new).push(FINALIZER.to_string());
    runs.replace(name, &Default::default(), &run).await?;
    Ok(())
}

async fn persist_status(
    runs: &Api<PipelineRun>,
    name: &str,
    status: &c8s_core::run::PipelineRunStatus,
) -> Result<(), ReconcileError> {
    let patch = serde_json::json!({ "status": status });
    runs.patch_status(name, &PatchParams::apply("c8s-controller"), &Patch::Merge(patch))
        .await?;
    Ok(())
}

async fn launch_ready_steps(
    jobs: &Api<Job>,
    ready: &[&c8s_core::pipeline::Step],
    run: &PipelineRun,
    repository: &str,
    namespace: &str,
    run_name: &str,
) {
    for step in ready {
        let step_name = &step.name;
        let job_name = c8s_core::run::job_name(run_name, step_name);

        match jobs.get_opt(&job_name).await {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(e) => {
                warn!(job = %job_name, error = %e, "failed to check for existing job");
                continue;
            }
        }

        let run_ctx = RunContext {
            run_name,
            namespace,
            run_uid: run.meta().uid.as_deref().unwrap_or_default(),
            pipeline_config_ref: &run.spec.pipeline_config_ref,
            repository,
            commit: &run.spec.commit,
            branch: &run.spec.branch,
            commit_message: run.spec.commit_message.as_deref(),
            author: run.spec.author.as_deref(),
        };

        let manifest = match build_job(*step, &run_ctx) {
            Ok(j) => j,
            Err(e) => {
                warn!(step = %step_name, error = %e, "failed to build job manifest");
                continue;
            }
        };

        if let Err(e) = jobs.create(&Default::default(), &manifest).await {
            if !matches!(e, kube::Error::Api(ref ae) if ae.code == 409) {
                warn!(job = %job_name, error = %e, "failed to create job");
            }
        }
    }
}

async fn list_owned_jobs(
    jobs: &Api<Job>,
    run_name: &str,
) -> Result<BTreeMap<String, JobCounts>, ReconcileError> {
    let list = jobs
        .list(&ListParams::default().labels(&run_label_selector(run_name)))
        .await?;

    let mut by_step = BTreeMap::new();
    for job in list.items {
        let Some(step_name) = job.metadata.labels.as_ref().and_then(|l| l.get(LABEL_STEP_NAME)) else {
            continue;
        };
        let status = job.status.unwrap_or_default();
        by_step.insert(
            step_name.clone(),
            JobCounts {
                active: status.active.unwrap_or(0),
                succeeded: status.succeeded.unwrap_or(0),
                failed: status.failed.unwrap_or(0),
            },
        );
    }
    Ok(by_step)
}

/// Collect logs for any step that just became terminal without a `logURL`
/// (spec.md §4.F step 12), using the pod behind its job.
async fn collect_logs(
    ctx: &Context,
    namespace: &str,
    run_name: &str,
    config: &c8s_core::pipeline::PipelineConfig,
    schedule: &Schedule,
    jobs_by_step: &BTreeMap<String, JobCounts>,
    status: &mut c8s_core::run::PipelineRunStatus,
) {
    let collector = crate::logs::LogCollector::new(
        ctx.client.clone(),
        namespace.to_string(),
        ctx.store.clone(),
        ctx.buffers.clone(),
    );

    let pending: Vec<String> = status
        .steps
        .iter()
        .filter(|s| s.needs_log_collection())
        .map(|s| s.name.clone())
        .collect();

    for step_name in pending {
        if !jobs_by_step.contains_key(&step_name) {
            continue;
        }
        let Some(step) = schedule.step(&step_name).or_else(|| config.steps.iter().find(|s| s.name == step_name)) else {
            continue;
        };
        let job_name = c8s_core::run::job_name(run_name, &step_name);

        match collector.collect(run_name, &step_name, &job_name, &step.secrets).await {
            Ok(url) => {
                if let Some(s) = status.step_mut(&step_name) {
                    s.log_url = Some(url);
                }
            }
            Err(e) => {
                warn!(run = %run_name, step = %step_name, error = %e, "log collection failed, will retry");
            }
        }
    }
}

async fn finalize(
    run: &PipelineRun,
    runs: &Api<PipelineRun>,
    ctx: &Context,
) -> Result<Action, ReconcileError> {
    let namespace = run.namespace().unwrap_or_default();
    let run_name = run.name_any();
    let jobs: Api<Job> = Api::namespaced(ctx.client.clone(), &namespace);

    let list = jobs
        .list(&ListParams::default().labels(&run_label_selector(&run_name)))
        .await?;

    for job in list.items {
        let Some(name) = job.metadata.name else { continue };
        let delete = jobs
            .delete(
                &name,
                &DeleteParams {
                    propagation_policy: Some(PropagationPolicy::Background),
                    ..Default::default()
                },
            )
            .await;
        if let Err(kube::Error::Api(ae)) = &delete {
            if ae.code != 404 {
                warn!(job = %name, error = %ae, "failed to delete job during finalization");
            }
        }
    }

    ctx.buffers.evict_prefix(&format!("{namespace}/{run_name}/"));

    let mut updated = run.clone();
    if let Some(finalizers) = updated.meta_mut().finalizers.as_mut() {
        finalizers.retain(|f| f != FINALIZER);
    }
    runs.replace(&run_name, &Default::default(), &updated).await?;

    Ok(Action::await_change())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_error_wraps_core_errors() {
        let e: ReconcileError = c8s_core::Error::InvalidInput("bad".to_string()).into();
        assert!(matches!(e, ReconcileError::Core(_)));
    }
}
