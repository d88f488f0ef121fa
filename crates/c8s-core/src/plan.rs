//! Plan Builder (component A): validates a `PipelineConfig`'s step graph
//! and derives a topologically layered `Schedule` that can answer "which
//! steps are ready, given what's already completed".

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{Error, Result};
use crate::pipeline::{PipelineConfig, Step, is_valid_step_name};

/// A validated, immutable execution plan for a `PipelineConfig`. Safe to
/// share across concurrent reconciles — it is never mutated after
/// construction.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// Steps in declaration order, filtered by branch-scoped conditionals.
    steps: Vec<Step>,
    /// Layer index assigned to each step name (0 = no dependencies).
    layers: BTreeMap<String, usize>,
    layer_count: usize,
}

impl Schedule {
    /// Build a schedule from a config, scoped to the branch a run is on.
    /// Steps whose `conditional.branch` doesn't match `branch` are dropped
    /// entirely at plan time (spec.md §4.A).
    pub fn build(config: &PipelineConfig, branch: &str) -> Result<Self> {
        validate_names(&config.steps)?;

        let steps: Vec<Step> = config
            .steps
            .iter()
            .filter(|s| branch_gate(s, branch))
            .cloned()
            .collect();

        validate_references(&steps)?;

        let layers = layer_steps(&steps)?;
        let layer_count = layers.values().copied().max().map(|m| m + 1).unwrap_or(0);

        Ok(Self {
            steps,
            layers,
            layer_count,
        })
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn layer_count(&self) -> usize {
        self.layer_count
    }

    pub fn layer_of(&self, step_name: &str) -> Option<usize> {
        self.layers.get(step_name).copied()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Every step whose `dependsOn` is a subset of `completed` and which is
    /// not itself already completed, in declaration order. A step with
    /// `conditional.onSuccess = true` (the default) additionally requires
    /// all its dependencies to have *succeeded*, not merely completed;
    /// `onSuccess = false` lets it fire regardless of dependency verdicts.
    pub fn ready_steps<'a>(
        &'a self,
        completed: &BTreeSet<String>,
        succeeded: &BTreeSet<String>,
    ) -> Vec<&'a Step> {
        self.steps
            .iter()
            .filter(|step| {
                if completed.contains(&step.name) {
                    return false;
                }
                let deps_completed = step.depends_on.iter().all(|d| completed.contains(d));
                if !deps_completed {
                    return false;
                }
                let on_success = step
                    .conditional
                    .as_ref()
                    .map(|c| c.on_success)
                    .unwrap_or(true);
                if on_success {
                    step.depends_on.iter().all(|d| succeeded.contains(d))
                } else {
                    true
                }
            })
            .collect()
    }
}

fn branch_gate(step: &Step, branch: &str) -> bool {
    match step.conditional.as_ref().and_then(|c| c.branch.as_ref()) {
        Some(glob) => crate::pipeline::glob_match(glob, branch),
        None => true,
    }
}

fn validate_names(steps: &[Step]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for step in steps {
        if !is_valid_step_name(&step.name) {
            return Err(Error::InvalidDependencyGraph(format!(
                "invalid step name {:?}",
                step.name
            )));
        }
        if !seen.insert(step.name.clone()) {
            return Err(Error::InvalidDependencyGraph(format!(
                "duplicate step name {:?}",
                step.name
            )));
        }
        if step.depends_on.contains(&step.name) {
            return Err(Error::InvalidDependencyGraph(format!(
                "step {:?} depends on itself",
                step.name
            )));
        }
    }
    Ok(())
}

fn validate_references(steps: &[Step]) -> Result<()> {
    let names: BTreeSet<&str> = steps.iter().map(|s| s.name.as_str()).collect();
    for step in steps {
        for dep in &step.depends_on {
            if !names.contains(dep.as_str()) {
                return Err(Error::InvalidDependencyGraph(format!(
                    "step {:?} depends on unknown step {:?}",
                    step.name, dep
                )));
            }
        }
    }
    Ok(())
}

/// Kahn-style layering: layer 0 is every zero-in-degree node in declaration
/// order; each subsequent layer removes the prior layer's edges and emits
/// the newly zero-in-degree nodes, again in declaration order. Any node
/// left unlayered once the frontier is empty means a cycle.
fn layer_steps(steps: &[Step]) -> Result<BTreeMap<String, usize>> {
    let mut in_degree: BTreeMap<&str, usize> = steps
        .iter()
        .map(|s| (s.name.as_str(), s.depends_on.len()))
        .collect();

    // dependents[x] = steps that depend on x, in declaration order.
    let mut dependents: BTreeMap<&str, Vec<&str>> =
        steps.iter().map(|s| (s.name.as_str(), Vec::new())).collect();
    for step in steps {
        for dep in &step.depends_on {
            dependents.entry(dep.as_str()).or_default().push(&step.name);
        }
    }

    let mut layers = BTreeMap::new();
    let mut frontier: VecDeque<&str> = steps
        .iter()
        .filter(|s| in_degree[s.name.as_str()] == 0)
        .map(|s| s.name.as_str())
        .collect();

    let mut layer_idx = 0usize;
    let mut placed = 0usize;

    while !frontier.is_empty() {
        let mut next = VecDeque::new();
        for name in frontier.iter() {
            layers.insert((*name).to_string(), layer_idx);
            placed += 1;
        }
        // Collect next frontier in declaration order across the whole
        // current layer, not per-node, to keep output deterministic.
        let mut next_set = BTreeSet::new();
        for name in frontier.iter() {
            if let Some(deps) = dependents.get(name) {
                for &d in deps {
                    let e = in_degree.get_mut(d).unwrap();
                    *e -= 1;
                    if *e == 0 {
                        next_set.insert(d);
                    }
                }
            }
        }
        for step in steps {
            if next_set.contains(step.name.as_str()) {
                next.push_back(step.name.as_str());
            }
        }
        frontier = next;
        layer_idx += 1;
    }

    if placed != steps.len() {
        return Err(Error::InvalidDependencyGraph(
            "cycle detected in step dependency graph".to_string(),
        ));
    }

    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Step;
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

    fn config(steps: Vec<Step>) -> PipelineConfig {
        PipelineConfig {
            repository: "https://example.com/repo.git".to_string(),
            branches: BTreeSet::from(["*".to_string()]),
            steps,
            timeout: "1h".to_string(),
            matrix: None,
            retry_policy: None,
        }
    }

    #[test]
    fn linear_chain_layers() {
        let cfg = config(vec![step("test", &[]), step("build", &["test"])]);
        let sched = Schedule::build(&cfg, "main").unwrap();
        assert_eq!(sched.layer_count(), 2);
        assert_eq!(sched.layer_of("test"), Some(0));
        assert_eq!(sched.layer_of("build"), Some(1));
    }

    #[test]
    fn parallel_siblings_same_layer() {
        let cfg = config(vec![step("lint", &[]), step("test", &[])]);
        let sched = Schedule::build(&cfg, "main").unwrap();
        assert_eq!(sched.layer_count(), 1);
        let ready = sched.ready_steps(&BTreeSet::new(), &BTreeSet::new());
        assert_eq!(ready.len(), 2);
    }

    #[test]
    fn cycle_is_rejected() {
        let cfg = config(vec![step("a", &["b"]), step("b", &["a"])]);
        let err = Schedule::build(&cfg, "main").unwrap_err();
        assert!(matches!(err, Error::InvalidDependencyGraph(_)));
    }

    #[test]
    fn dangling_reference_is_rejected() {
        let cfg = config(vec![step("build", &["missing"])]);
        assert!(Schedule::build(&cfg, "main").is_err());
    }

    #[test]
    fn self_edge_is_rejected() {
        let cfg = config(vec![step("build", &["build"])]);
        assert!(Schedule::build(&cfg, "main").is_err());
    }

    #[test]
    fn ready_steps_requires_success_by_default() {
        let cfg = config(vec![step("test", &[]), step("build", &["test"])]);
        let sched = Schedule::build(&cfg, "main").unwrap();

        let completed = BTreeSet::from(["test".to_string()]);
        let not_succeeded = BTreeSet::new();
        assert!(sched.ready_steps(&completed, &not_succeeded).is_empty());

        let succeeded = BTreeSet::from(["test".to_string()]);
        let ready = sched.ready_steps(&completed, &succeeded);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].name, "build");
    }

    #[test]
    fn on_success_false_ignores_dependency_verdict() {
        let mut cleanup = step("cleanup", &["test"]);
        cleanup.conditional = Some(crate::pipeline::Conditional {
            branch: None,
            on_success: false,
        });
        let cfg = config(vec![step("test", &[]), cleanup]);
        let sched = Schedule::build(&cfg, "main").unwrap();

        let completed = BTreeSet::from(["test".to_string()]);
        let succeeded = BTreeSet::new(); // test failed
        let ready = sched.ready_steps(&completed, &succeeded);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].name, "cleanup");
    }

    #[test]
    fn branch_conditional_excludes_step_at_plan_time() {
        let mut deploy = step("deploy", &[]);
        deploy.conditional = Some(crate::pipeline::Conditional {
            branch: Some("release/*".to_string()),
            on_success: true,
        });
        let cfg = config(vec![step("test", &[]), deploy]);

        let sched = Schedule::build(&cfg, "main").unwrap();
        assert_eq!(sched.total_steps(), 1);

        let sched = Schedule::build(&cfg, "release/1.0").unwrap();
        assert_eq!(sched.total_steps(), 2);
    }

    #[test]
    fn ready_steps_never_exceeds_the_spec_subset() {
        // ∀ schedule, completed: ready_steps(completed) ⊆
        // { s | depends_on(s) ⊆ completed ∧ s ∉ completed }
        let cfg = config(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a", "b"]),
        ]);
        let sched = Schedule::build(&cfg, "main").unwrap();
        let completed = BTreeSet::from(["a".to_string()]);
        let succeeded = completed.clone();
        for s in sched.ready_steps(&completed, &succeeded) {
            assert!(s.depends_on.iter().all(|d| completed.contains(d)));
            assert!(!completed.contains(&s.name));
        }
    }
}
