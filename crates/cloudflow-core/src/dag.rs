// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! The ready-set algorithm: which `PENDING` steps can be dispatched right
//! now, and which are unreachable given how their predecessors resolved,
//! walking both the `on_success` and `on_failure` edge kinds.

use std::collections::{HashMap, HashSet};

use cloudflow_domain::{StepDefinition, StepStatus, WorkflowDefinition};

/// The outcome of one ready-set evaluation pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReadySet {
    /// Steps that are `PENDING` and may be dispatched now.
    pub ready: Vec<String>,
    /// Steps that are `PENDING` but unreachable given how their
    /// predecessors resolved, and must be transitioned to `SKIPPED`.
    pub skipped: Vec<String>,
}

/// Every predecessor of `step_id`, paired with the edge kind it was
/// reached by (`true` = `on_success`, `false` = `on_failure`).
fn predecessors<'a>(
    def: &'a WorkflowDefinition,
    step_id: &str,
) -> impl Iterator<Item = (&'a StepDefinition, bool)> {
    def.steps.values().filter_map(move |p| {
        if p.on_success.iter().any(|s| s == step_id) {
            Some((p, true))
        } else if p.on_failure.iter().any(|s| s == step_id) {
            Some((p, false))
        } else {
            None
        }
    })
}

/// Evaluates every `PENDING` step against its predecessors' current status.
///
/// A step with no predecessors is ready immediately. A step with at least
/// one predecessor is ready once every predecessor has reached the status
/// the inbound edge requires (`COMPLETED` for `on_success`, `FAILED` for
/// `on_failure`) — and skipped, instead, the moment any predecessor
/// resolves to the *other* terminal outcome, since that predecessor will
/// never satisfy this step's edge.
pub fn evaluate(def: &WorkflowDefinition, statuses: &HashMap<String, StepStatus>) -> ReadySet {
    let mut out = ReadySet::default();

    for id in def.steps.keys() {
        if statuses.get(id) != Some(&StepStatus::Pending) {
            continue;
        }

        let mut preds = predecessors(def, id).peekable();
        if preds.peek().is_none() {
            out.ready.push(id.clone());
            continue;
        }

        let mut all_satisfied = true;
        let mut any_dead = false;
        for (pred, wants_success) in preds {
            let pred_status = statuses.get(&pred.id).copied().unwrap_or(StepStatus::Pending);
            match pred_status {
                StepStatus::Completed if wants_success => {}
                StepStatus::Failed if !wants_success => {}
                StepStatus::Completed | StepStatus::Failed => {
                    // Predecessor resolved to the edge this step does NOT
                    // wait on; this step can never become ready via this edge.
                    any_dead = true;
                }
                StepStatus::Skipped => any_dead = true,
                StepStatus::Pending | StepStatus::Running => all_satisfied = false,
            }
        }

        if any_dead {
            out.skipped.push(id.clone());
        } else if all_satisfied {
            out.ready.push(id.clone());
        }
    }

    out
}

/// The graph is stuck if no step is ready, none is running, and at least
/// one remains `PENDING`. Acyclicity is already enforced at
/// workflow-creation time (`WorkflowDefinition::validate`); this is the
/// belt-and-braces runtime check for anything that check missed.
pub fn is_stuck(statuses: &HashMap<String, StepStatus>, ready: &ReadySet) -> bool {
    if !ready.ready.is_empty() {
        return false;
    }
    let any_running = statuses.values().any(|s| *s == StepStatus::Running);
    let any_pending = statuses.values().any(|s| *s == StepStatus::Pending);
    !any_running && any_pending
}

/// True once every step has reached a terminal status.
pub fn is_complete(statuses: &HashMap<String, StepStatus>) -> bool {
    statuses.values().all(|s| s.is_terminal())
}

/// True if any step resolved to `FAILED` and that failure was never
/// handled by an `on_failure` edge (i.e. it has no successor at all, or
/// every `on_failure` successor was itself skipped/failed rather than
/// completed). Used to decide COMPLETED vs FAILED once the graph drains.
pub fn any_unhandled_failure(def: &WorkflowDefinition, statuses: &HashMap<String, StepStatus>) -> bool {
    for (id, status) in statuses {
        if *status != StepStatus::Failed {
            continue;
        }
        let Some(step) = def.get_step(id) else { continue };
        if step.on_failure.is_empty() {
            return true;
        }
        let handled = step.on_failure.iter().any(|succ| {
            statuses.get(succ).copied() == Some(StepStatus::Completed)
        });
        if !handled {
            return true;
        }
    }
    false
}

/// Steps with no incoming edge at all — the initial ready-set before any
/// step has run.
pub fn roots(def: &WorkflowDefinition) -> HashSet<&str> {
    let mut has_predecessor: HashSet<&str> = HashSet::new();
    for step in def.steps.values() {
        for succ in step.successors() {
            has_predecessor.insert(succ.as_str());
        }
    }
    def.steps
        .keys()
        .map(String::as_str)
        .filter(|id| !has_predecessor.contains(id))
        .collect()
}
