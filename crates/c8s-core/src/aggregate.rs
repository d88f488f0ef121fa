//! Status Aggregator (component E): folds per-job phases into per-step
//! phases, and per-step phases into an overall run phase.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::plan::Schedule;
use crate::run::{PipelineRunStatus, RunPhase, StepPhase, StepStatus, job_name};

/// The subset of a Kubernetes Job's `.status` counters the aggregator
/// needs. Deliberately narrow: the cluster-API contract is out of scope
/// for this crate, so callers translate their Job objects into this.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobCounts {
    pub active: i32,
    pub succeeded: i32,
    pub failed: i32,
}

impl JobCounts {
    /// §4.E step 1: derive a step's phase from its job's counters.
    pub fn step_phase(self) -> StepPhase {
        if self.succeeded > 0 {
            StepPhase::Succeeded
        } else if self.failed > 0 {
            StepPhase::Failed
        } else if self.active > 0 {
            StepPhase::Running
        } else {
            StepPhase::Pending
        }
    }

    pub fn exit_code(self) -> Option<i32> {
        match self.step_phase() {
            StepPhase::Succeeded => Some(0),
            StepPhase::Failed => Some(1),
            _ => None,
        }
    }
}

/// Recompute `status` in place from the schedule and the observed job
/// counts, at `now`. Existing `startTime`/`completionTime`/`logUrl` are
/// preserved once set (monotonic fields, §4.E step 3) and a step or run
/// already in a terminal phase is never moved out of it (invariants I4/I5).
pub fn aggregate(
    status: &mut PipelineRunStatus,
    run_name: &str,
    schedule: &Schedule,
    jobs_by_step: &BTreeMap<String, JobCounts>,
    now: DateTime<Utc>,
) {
    for step in schedule.steps() {
        let entry = match status.step_mut(&step.name) {
            Some(existing) => existing,
            None => {
                status.steps.push(StepStatus::pending(
                    &step.name,
                    job_name(run_name, &step.name),
                ));
                status.steps.last_mut().unwrap()
            }
        };

        if entry.phase.is_terminal() {
            continue;
        }

        let counts = jobs_by_step.get(&step.name).copied().unwrap_or_default();
        let new_phase = counts.step_phase();

        if new_phase == StepPhase::Running && entry.start_time.is_none() {
            entry.start_time = Some(now);
        }
        if new_phase.is_terminal() {
            if entry.completion_time.is_none() {
                entry.completion_time = Some(now);
            }
            if entry.start_time.is_none() {
                entry.start_time = Some(now);
            }
            entry.exit_code = counts.exit_code();
        }
        entry.phase = new_phase;
    }

    // Steps outside the schedule's scope (e.g. branch-gated out) are left
    // untouched; only defined steps count toward the "expected" total.
    let expected = schedule.total_steps();

    if status.phase.is_terminal() {
        return;
    }

    let any_failed = status.steps.iter().any(|s| s.phase == StepPhase::Failed);
    let any_running = status.steps.iter().any(|s| s.phase == StepPhase::Running);
    let all_succeeded = expected > 0
        && status.steps.len() == expected
        && status.steps.iter().all(|s| s.phase == StepPhase::Succeeded);

    let new_phase = if any_failed {
        RunPhase::Failed
    } else if any_running {
        RunPhase::Running
    } else if all_succeeded {
        RunPhase::Succeeded
    } else {
        RunPhase::Pending
    };

    match new_phase {
        RunPhase::Failed | RunPhase::Succeeded => {
            if status.completion_time.is_none() {
                status.completion_time = Some(now);
            }
        }
        RunPhase::Running => {
            if status.start_time.is_none() {
                status.start_time = Some(now);
            }
        }
        _ => {}
    }

    status.phase = new_phase;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineConfig, Step};
    use std::collections::BTreeSet;

    fn step(name: &str, needs: &[&str]) -> Step {
        Step {
            name: name.to_string(),
            image: "alpine".to_string(),
            commands: vec!["true".to_string()],
            depends_on: needs.iter().map(|s| s.to_string()).collect(),
            resources: None,
            timeout: "30m".to_string(),
            secrets: vec![],
            conditional: None,
            artifacts: vec![],
        }
    }

    fn schedule(steps: Vec<Step>) -> Schedule {
        let cfg = PipelineConfig {
            repository: "https://example.com/repo.git".to_string(),
            branches: BTreeSet::from(["*".to_string()]),
            steps,
            timeout: "1h".to_string(),
            matrix: None,
            retry_policy: None,
        };
        Schedule::build(&cfg, "main").unwrap()
    }

    #[test]
    fn linear_pipeline_scenario() {
        let sched = schedule(vec![step("test", &[]), step("build", &["test"])]);
        let mut status = PipelineRunStatus::default();
        let now = Utc::now();

        // First reconcile: nothing launched yet.
        aggregate(&mut status, "run-1", &sched, &BTreeMap::new(), now);
        assert_eq!(status.phase, RunPhase::Pending);

        // test succeeds.
        let mut counts = BTreeMap::new();
        counts.insert(
            "test".to_string(),
            JobCounts {
                succeeded: 1,
                ..Default::default()
            },
        );
        aggregate(&mut status, "run-1", &sched, &counts, now);
        assert_eq!(status.step("test").unwrap().phase, StepPhase::Succeeded);
        assert_eq!(status.phase, RunPhase::Pending); // build not yet observed

        // build succeeds too.
        counts.insert(
            "build".to_string(),
            JobCounts {
                succeeded: 1,
                ..Default::default()
            },
        );
        aggregate(&mut status, "run-1", &sched, &counts, now);
        assert_eq!(status.phase, RunPhase::Succeeded);
        assert!(status.completion_time.is_some());
        assert!(status.steps.iter().all(|s| s.start_time.is_some()));
        assert!(status.steps.iter().all(|s| s.completion_time.is_some()));
    }

    #[test]
    fn single_step_failure_scenario() {
        let sched = schedule(vec![step("test", &[])]);
        let mut status = PipelineRunStatus::default();
        let now = Utc::now();

        let mut counts = BTreeMap::new();
        counts.insert(
            "test".to_string(),
            JobCounts {
                failed: 1,
                ..Default::default()
            },
        );
        aggregate(&mut status, "run-1", &sched, &counts, now);

        assert_eq!(status.phase, RunPhase::Failed);
        assert_eq!(status.step("test").unwrap().phase, StepPhase::Failed);
        assert!(status.completion_time.is_some());
    }

    #[test]
    fn terminal_phase_is_never_left() {
        let sched = schedule(vec![step("test", &[])]);
        let mut status = PipelineRunStatus::default();
        let now = Utc::now();

        let mut counts = BTreeMap::new();
        counts.insert(
            "test".to_string(),
            JobCounts {
                succeeded: 1,
                ..Default::default()
            },
        );
        aggregate(&mut status, "run-1", &sched, &counts, now);
        assert_eq!(status.phase, RunPhase::Succeeded);

        // Even if a subsequent observation implies failure (e.g. a stale
        // cache), the run's phase must not move.
        counts.insert(
            "test".to_string(),
            JobCounts {
                failed: 1,
                ..Default::default()
            },
        );
        aggregate(&mut status, "run-1", &sched, &counts, now);
        assert_eq!(status.phase, RunPhase::Succeeded);
        assert_eq!(status.step("test").unwrap().phase, StepPhase::Succeeded);
    }

    #[test]
    fn log_url_is_preserved_across_aggregations() {
        let sched = schedule(vec![step("test", &[])]);
        let mut status = PipelineRunStatus::default();
        let now = Utc::now();
        let mut counts = BTreeMap::new();
        counts.insert(
            "test".to_string(),
            JobCounts {
                succeeded: 1,
                ..Default::default()
            },
        );
        aggregate(&mut status, "run-1", &sched, &counts, now);
        status.step_mut("test").unwrap().log_url = Some("https://example.com/log".to_string());

        aggregate(&mut status, "run-1", &sched, &counts, now);
        assert_eq!(
            status.step("test").unwrap().log_url.as_deref(),
            Some("https://example.com/log")
        );
    }
}
