//! PipelineRun spec/status types: one execution of a config for a commit.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The immutable spec of a run, as submitted by a trigger.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSpec {
    pub pipeline_config_ref: String,
    pub commit: String,
    pub branch: String,
    pub triggered_by: String,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub matrix_index: Option<BTreeMap<String, String>>,
    #[serde(default, rename = "parentID")]
    pub parent_id: Option<String>,
}

/// Terminal/non-terminal phase of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum RunPhase {
    #[default]
    #[serde(rename = "")]
    Empty,
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Phase of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum StepPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl StepPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepStatus {
    pub name: String,
    pub phase: StepPhase,
    pub job_name: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default, rename = "logURL")]
    pub log_url: Option<String>,
}

impl StepStatus {
    pub fn pending(name: &str, job_name: String) -> Self {
        Self {
            name: name.to_string(),
            phase: StepPhase::Pending,
            job_name,
            start_time: None,
            completion_time: None,
            exit_code: None,
            log_url: None,
        }
    }

    /// A step is ready for log collection exactly when it is terminal and
    /// no `logURL` has ever been recorded for it (invariant I6).
    pub fn needs_log_collection(&self) -> bool {
        self.phase.is_terminal() && self.log_url.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    /// Wall-clock duration of the run, in seconds.
    pub duration_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunStatus {
    #[serde(default)]
    pub phase: RunPhase,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<StepStatus>,
    #[serde(default)]
    pub resource_usage: Option<ResourceUsage>,
    /// Generation of the spec last reconciled, standard kube-rs controller
    /// idiom for distinguishing status writes from spec edits on watch.
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl PipelineRunStatus {
    pub fn step(&self, name: &str) -> Option<&StepStatus> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn step_mut(&mut self, name: &str) -> Option<&mut StepStatus> {
        self.steps.iter_mut().find(|s| s.name == name)
    }

    /// Names of steps whose phase is terminal.
    pub fn completed_steps(&self) -> std::collections::BTreeSet<String> {
        self.steps
            .iter()
            .filter(|s| s.phase.is_terminal())
            .map(|s| s.name.clone())
            .collect()
    }

    /// Names of steps that succeeded.
    pub fn succeeded_steps(&self) -> std::collections::BTreeSet<String> {
        self.steps
            .iter()
            .filter(|s| s.phase.is_success())
            .map(|s| s.name.clone())
            .collect()
    }
}

/// Deterministic job name for a (run, step) pair — invariant I3.
pub fn job_name(run_name: &str, step_name: &str) -> String {
    format!("{run_name}-{step_name}")
}
