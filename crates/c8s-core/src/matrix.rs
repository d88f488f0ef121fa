//! Matrix Coordinator (component G), pure half: Cartesian-product cell
//! expansion and child-phase folding. Child-run creation and the periodic
//! aggregation loop are I/O and live in the controller crate; this module
//! only does the math both sides need.

use std::collections::BTreeMap;

use crate::pipeline::MatrixSpec;
use crate::run::RunPhase;

/// One point in the Cartesian product of a matrix's dimensions.
pub type Cell = BTreeMap<String, String>;

/// Expand a matrix spec into its surviving cells: the Cartesian product of
/// `dimensions`, minus any cell matched by an `exclude` entry. A cell
/// matches an exclusion when every key in the exclusion equals the cell's
/// value for that key (a partial match on fewer dimensions than the full
/// matrix still excludes).
pub fn expand_cells(spec: &MatrixSpec) -> Vec<Cell> {
    let mut cells: Vec<Cell> = vec![Cell::new()];

    for (dim, values) in &spec.dimensions {
        let mut next = Vec::with_capacity(cells.len() * values.len().max(1));
        for cell in &cells {
            for value in values {
                let mut c = cell.clone();
                c.insert(dim.clone(), value.clone());
                next.push(c);
            }
        }
        cells = next;
    }

    cells
        .into_iter()
        .filter(|cell| !spec.exclude.iter().any(|ex| cell_matches_exclusion(cell, ex)))
        .collect()
}

fn cell_matches_exclusion(cell: &Cell, exclusion: &BTreeMap<String, String>) -> bool {
    !exclusion.is_empty()
        && exclusion
            .iter()
            .all(|(k, v)| cell.get(k).is_some_and(|cv| cv == v))
}

/// §4.G step 3: fold child run phases into the parent's phase.
pub fn fold_phase(child_phases: impl IntoIterator<Item = RunPhase>) -> RunPhase {
    let mut any_failed = false;
    let mut any_running = false;
    let mut any_pending = false;
    let mut count = 0usize;
    let mut all_succeeded = true;

    for phase in child_phases {
        count += 1;
        match phase {
            RunPhase::Failed => any_failed = true,
            RunPhase::Running => any_running = true,
            RunPhase::Pending | RunPhase::Empty => any_pending = true,
            RunPhase::Succeeded => {}
            RunPhase::Cancelled => any_failed = true,
        }
        if phase != RunPhase::Succeeded {
            all_succeeded = false;
        }
    }

    if count == 0 {
        return RunPhase::Pending;
    }
    if any_failed {
        RunPhase::Failed
    } else if any_running {
        RunPhase::Running
    } else if any_pending {
        RunPhase::Pending
    } else if all_succeeded {
        RunPhase::Succeeded
    } else {
        RunPhase::Pending
    }
}

/// True once no child is pending or running — the point at which the
/// parent's `completionTime` should be set.
pub fn is_settled(child_phases: &[RunPhase]) -> bool {
    child_phases
        .iter()
        .all(|p| !matches!(p, RunPhase::Pending | RunPhase::Empty | RunPhase::Running))
}

/// Mean duration (seconds) of the succeeded children, used as the parent's
/// `resourceUsage.duration` metric.
pub fn mean_succeeded_duration(durations: &[(RunPhase, i64)]) -> Option<i64> {
    let succeeded: Vec<i64> = durations
        .iter()
        .filter(|(phase, _)| *phase == RunPhase::Succeeded)
        .map(|(_, d)| *d)
        .collect();
    if succeeded.is_empty() {
        return None;
    }
    Some(succeeded.iter().sum::<i64>() / succeeded.len() as i64)
}
