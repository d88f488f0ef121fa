//! Job Factory (component D): materializes a step as a Kubernetes `Job`
//! manifest — one clone init container, one step container, a shared
//! empty-dir workspace volume.

use std::collections::BTreeMap;

use c8s_core::labels::{
    ANNOTATION_AUTHOR, ANNOTATION_COMMIT_MESSAGE, LABEL_BRANCH, LABEL_COMMIT, LABEL_MANAGED_BY,
    LABEL_PIPELINE_CONFIG, LABEL_PIPELINE_RUN, LABEL_STEP_NAME, MANAGED_BY_VALUE,
};
use c8s_core::pipeline::Step;
use c8s_core::run::job_name;
use c8s_core::timeout::parse_timeout_seconds;
use c8s_core::{Error, Result};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec,
    ResourceRequirements, SecretKeySelector, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

const WORKSPACE_VOLUME: &str = "workspace";
const WORKSPACE_PATH: &str = "/workspace";
const CLONE_IMAGE: &str = "alpine/git:latest";
const BACKOFF_LIMIT: i32 = 2;
const TTL_AFTER_FINISHED: i32 = 3600;

const CLONE_SCRIPT: &str = r#"set -euo pipefail
git clone --depth=1 --single-branch --branch "$BRANCH" "$REPO_URL" "$WORKSPACE"
git -C "$WORKSPACE" checkout "$COMMIT""#;

/// Everything the Job Factory needs about the run it's building a Job for,
/// independent of how the caller represents a `PipelineRun` resource.
pub struct RunContext<'a> {
    pub run_name: &'a str,
    pub namespace: &'a str,
    pub run_uid: &'a str,
    pub pipeline_config_ref: &'a str,
    pub repository: &'a str,
    pub commit: &'a str,
    pub branch: &'a str,
    pub commit_message: Option<&'a str>,
    pub author: Option<&'a str>,
}

/// Build the Job manifest for `step` in the context of `run`. Secret
/// references are materialized as `valueFrom.secretKeyRef` env vars —
/// their values never pass through this process, only their names.
pub fn build_job(step: &Step, run: &RunContext<'_>) -> Result<Job> {
    let name = job_name(run.run_name, &step.name);
    let timeout_seconds = parse_timeout_seconds(&step.timeout)?;

    let labels = step_labels(run, &step.name);
    let mut annotations = BTreeMap::new();
    if let Some(msg) = run.commit_message {
        annotations.insert(ANNOTATION_COMMIT_MESSAGE.to_string(), msg.to_string());
    }
    if let Some(author) = run.author {
        annotations.insert(ANNOTATION_AUTHOR.to_string(), author.to_string());
    }

    let clone_container = Container {
        name: "clone".to_string(),
        image: Some(CLONE_IMAGE.to_string()),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string(), CLONE_SCRIPT.to_string()]),
        env: Some(vec![
            env_var("REPO_URL", run.repository),
            env_var("BRANCH", run.branch),
            env_var("COMMIT", run.commit),
            env_var("WORKSPACE", WORKSPACE_PATH),
        ]),
        volume_mounts: Some(vec![workspace_mount()]),
        ..Default::default()
    };

    let step_command = vec![
        "sh".to_string(),
        "-c".to_string(),
        step.commands.join("\n"),
    ];

    let mut step_env = vec![
        env_var("COMMIT_SHA", run.commit),
        env_var("BRANCH", run.branch),
        env_var("PIPELINE_RUN", run.run_name),
        env_var("STEP_NAME", &step.name),
        env_var("WORKSPACE", WORKSPACE_PATH),
        env_var("NAMESPACE", run.namespace),
    ];
    for secret in &step.secrets {
        step_env.push(secret_env_var(secret));
    }

    let resources = step.resources.as_ref().map(|r| {
        let mut quantities = BTreeMap::new();
        if let Some(cpu) = &r.cpu {
            quantities.insert("cpu".to_string(), Quantity(cpu.clone()));
        }
        if let Some(memory) = &r.memory {
            quantities.insert("memory".to_string(), Quantity(memory.clone()));
        }
        // Guaranteed QoS: requests == limits.
        ResourceRequirements {
            requests: Some(quantities.clone()),
            limits: Some(quantities),
            ..Default::default()
        }
    });

    let step_container = Container {
        name: step.name.clone(),
        image: Some(step.image.clone()),
        working_dir: Some(WORKSPACE_PATH.to_string()),
        command: Some(step_command),
        env: Some(step_env),
        resources,
        volume_mounts: Some(vec![workspace_mount()]),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        init_containers: Some(vec![clone_container]),
        containers: vec![step_container],
        restart_policy: Some("Never".to_string()),
        volumes: Some(vec![Volume {
            name: WORKSPACE_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        }]),
        active_deadline_seconds: Some(timeout_seconds as i64),
        ..Default::default()
    };

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(run.namespace.to_string()),
            labels: Some(labels),
            annotations: (!annotations.is_empty()).then_some(annotations),
            owner_references: Some(vec![owner_reference(run)]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(BACKOFF_LIMIT),
            ttl_seconds_after_finished: Some(TTL_AFTER_FINISHED),
            active_deadline_seconds: Some(timeout_seconds as i64),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(step_labels(run, &step.name)),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        status: None,
    })
}

fn step_labels(run: &RunContext<'_>, step_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_PIPELINE_CONFIG.to_string(), run.pipeline_config_ref.to_string()),
        (LABEL_PIPELINE_RUN.to_string(), run.run_name.to_string()),
        (LABEL_STEP_NAME.to_string(), step_name.to_string()),
        (LABEL_COMMIT.to_string(), run.commit.to_string()),
        (LABEL_BRANCH.to_string(), sanitize_label_value(run.branch)),
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string()),
    ])
}

/// Kubernetes label values must match `(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?`;
/// branch names like `feature/x` contain characters that violate that, so
/// we substitute `/` with `.` to stay within the grammar while keeping the
/// value recognizable.
fn sanitize_label_value(value: &str) -> String {
    value.replace('/', ".")
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

fn secret_env_var(secret_ref: &c8s_core::pipeline::SecretRef) -> EnvVar {
    EnvVar {
        name: secret_ref.env_name().to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_ref.secret_ref.clone(),
                key: secret_ref.key.clone(),
                optional: Some(false),
            }),
            ..Default::default()
        }),
    }
}

fn workspace_mount() -> VolumeMount {
    VolumeMount {
        name: WORKSPACE_VOLUME.to_string(),
        mount_path: WORKSPACE_PATH.to_string(),
        ..Default::default()
    }
}

fn owner_reference(run: &RunContext<'_>) -> OwnerReference {
    OwnerReference {
        api_version: "c8s.dev/v1".to_string(),
        kind: "PipelineRun".to_string(),
        name: run.run_name.to_string(),
        uid: run.run_uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn run<'a>() -> RunContext<'a> {
        RunContext {
            run_name: "run-1",
            namespace: "ci",
            run_uid: "uid-1",
            pipeline_config_ref: "demo",
            repository: "https://example.com/repo.git",
            commit: "abc123",
            branch: "main",
            commit_message: Some("fix bug"),
            author: Some("alice"),
        }
    }

    fn step() -> Step {
        Step {
            name: "test".to_string(),
            image: "rust:1.85".to_string(),
            commands: vec!["cargo test".to_string()],
            depends_on: BTreeSet::new(),
            resources: None,
            timeout: "30m".to_string(),
            secrets: vec![],
            conditional: None,
            artifacts: vec![],
        }
    }

    #[test]
    fn job_name_is_deterministic() {
        let job = build_job(&step(), &run()).unwrap();
        assert_eq!(job.metadata.name.as_deref(), Some("run-1-test"));
    }

    #[test]
    fn job_has_clone_and_step_containers() {
        let job = build_job(&step(), &run()).unwrap();
        let pod = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.init_containers.as_ref().unwrap().len(), 1);
        assert_eq!(pod.containers.len(), 1);
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
    }

    #[test]
    fn clone_container_never_interpolates_commit_or_branch_into_command() {
        let mut r = run();
        r.commit = "$(rm -rf /)";
        r.branch = "; rm -rf /";
        let job = build_job(&step(), &r).unwrap();
        let pod = job.spec.unwrap().template.spec.unwrap();
        let clone = &pod.init_containers.unwrap()[0];
        let script = &clone.command.as_ref().unwrap()[2];
        assert!(!script.contains("rm -rf"));
        let env_names: Vec<_> = clone
            .env
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert!(env_names.contains(&"BRANCH".to_string()));
        assert!(env_names.contains(&"COMMIT".to_string()));
    }

    #[test]
    fn backoff_and_ttl_match_spec() {
        let job = build_job(&step(), &run()).unwrap();
        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(2));
        assert_eq!(spec.ttl_seconds_after_finished, Some(3600));
    }

    #[test]
    fn active_deadline_matches_parsed_timeout() {
        let mut s = step();
        s.timeout = "45s".to_string();
        let job = build_job(&s, &run()).unwrap();
        assert_eq!(job.spec.unwrap().active_deadline_seconds, Some(45));
    }

    #[test]
    fn invalid_timeout_is_rejected() {
        let mut s = step();
        s.timeout = "nonsense".to_string();
        assert!(build_job(&s, &run()).is_err());
    }

    #[test]
    fn secrets_become_value_from_env_vars_never_inline_values() {
        let mut s = step();
        s.secrets = vec![c8s_core::pipeline::SecretRef {
            secret_ref: "db-creds".to_string(),
            key: "password".to_string(),
            env_var: Some("DB_PASSWORD".to_string()),
        }];
        let job = build_job(&s, &run()).unwrap();
        let pod = job.spec.unwrap().template.spec.unwrap();
        let step_container = &pod.containers[0];
        let secret_env = step_container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .find(|e| e.name == "DB_PASSWORD")
            .unwrap();
        assert!(secret_env.value.is_none());
        let selector = secret_env.value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap();
        assert_eq!(selector.name, "db-creds");
        assert_eq!(selector.key, "password");
    }

    #[test]
    fn resources_are_guaranteed_qos() {
        let mut s = step();
        s.resources = Some(c8s_core::pipeline::ResourceRequest {
            cpu: Some("500m".to_string()),
            memory: Some("256Mi".to_string()),
        });
        let job = build_job(&s, &run()).unwrap();
        let pod = job.spec.unwrap().template.spec.unwrap();
        let res = pod.containers[0].resources.as_ref().unwrap();
        assert_eq!(res.requests, res.limits);
    }

    #[test]
    fn owner_reference_points_at_the_run() {
        let job = build_job(&step(), &run()).unwrap();
        let owner = &job.metadata.owner_references.unwrap()[0];
        assert_eq!(owner.kind, "PipelineRun");
        assert_eq!(owner.name, "run-1");
        assert_eq!(owner.controller, Some(true));
    }
}
