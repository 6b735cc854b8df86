//! Folds batch results into a coherent outcome.
//!
//! The synthesizer runs after every collected batch. It detects scope
//! conflicts between tasks that ran in the same batch, resolves them by
//! preferring the narrower task where possible, and otherwise flags
//! them for the caller; a conflicting result is never silently dropped.
//! When the plan has fully settled it assembles the final outcome:
//! per-task reports in plan order, the accumulated conflict list, and
//! the folded artifact.
//!
//! Folding the same settled plan again produces an identical outcome,
//! so re-synthesis after a crash or replay is safe.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::outcome::{Conflict, FinalOutcome, TaskReport};
use crate::core::plan::Plan;
use crate::core::task::{Task, TaskId, TaskSpec};
use crate::tlog_debug;

/// Name of the task raised by the self-review pass.
pub const REVIEW_TASK_NAME: &str = "self-review";

/// Phase the self-review task lands in.
pub const REVIEW_PHASE: &str = "review";

/// Result of folding one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialOutcome {
    /// Reports for the batch that just settled, in plan order.
    pub reports: Vec<TaskReport>,
    /// Conflicts detected within this batch.
    pub conflicts: Vec<Conflict>,
    /// Terminal tasks across the whole plan after this batch.
    pub settled: usize,
    /// Tasks still outstanding across the whole plan.
    pub remaining: usize,
}

/// What one synthesis step produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Synthesis {
    /// The plan still has work outstanding.
    Partial(PartialOutcome),
    /// Every task is terminal; this is the request's outcome.
    Final(FinalOutcome),
}

impl Synthesis {
    /// The final outcome, if synthesis reached it.
    pub fn into_final(self) -> Option<FinalOutcome> {
        match self {
            Synthesis::Final(outcome) => Some(outcome),
            Synthesis::Partial(_) => None,
        }
    }
}

/// Accumulates conflicts across batches and assembles outcomes.
#[derive(Debug, Default)]
pub struct Synthesizer {
    conflicts: Vec<Conflict>,
}

impl Synthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conflicts accumulated so far.
    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    /// Fold one settled batch and decide whether synthesis is done.
    ///
    /// Returns [`Synthesis::Final`] once every task in the plan is
    /// terminal, otherwise a [`Synthesis::Partial`] covering the batch.
    /// Callers merging follow-up tasks must do so before this call so
    /// an extended plan is not declared final early.
    pub fn synthesize(&mut self, plan: &Plan, batch: &[TaskId]) -> Synthesis {
        let partial = self.fold_batch(plan, batch);
        if plan.all_terminal() {
            Synthesis::Final(self.finalize(plan))
        } else {
            Synthesis::Partial(partial)
        }
    }

    /// Detect conflicts within a batch and report its results.
    ///
    /// Two tasks conflict when both succeeded in the same batch and the
    /// scopes they touched intersect. The task with the strictly
    /// smaller declared scope wins; equal widths are flagged instead.
    /// Each conflicting pair yields exactly one conflict entry.
    pub fn fold_batch(&mut self, plan: &Plan, batch: &[TaskId]) -> PartialOutcome {
        let tasks: Vec<&Task> = plan
            .ordered_ids()
            .into_iter()
            .filter(|id| batch.contains(id))
            .filter_map(|id| plan.get_task(&id))
            .collect();

        let mut new_conflicts = Vec::new();
        for (i, first) in tasks.iter().enumerate() {
            for second in tasks.iter().skip(i + 1) {
                if let Some(conflict) = detect_conflict(first, second) {
                    new_conflicts.push(conflict);
                }
            }
        }
        if !new_conflicts.is_empty() {
            tlog_debug!(
                "[synthesizer] Detected {} conflict(s) in batch of {}",
                new_conflicts.len(),
                batch.len()
            );
        }
        self.conflicts.extend(new_conflicts.clone());

        let counts = plan.counts();
        PartialOutcome {
            reports: tasks.iter().map(|task| TaskReport::from_task(task)).collect(),
            conflicts: new_conflicts,
            settled: counts.succeeded + counts.failed + counts.skipped,
            remaining: plan.unfinished_count(),
        }
    }

    /// Build the self-review round for a settled plan.
    ///
    /// Returns at most one task spec covering the contested surface:
    /// every scope touched by more than one succeeded task, plus the
    /// scopes of conflicts that stayed flagged. An empty result means
    /// nothing warrants review and the round is skipped.
    pub fn review_pass(&self, plan: &Plan, capability: &str) -> Vec<TaskSpec> {
        let mut touch_counts: HashMap<String, usize> = HashMap::new();
        for task in plan.all_tasks() {
            if !task.succeeded() || task.name == REVIEW_TASK_NAME {
                continue;
            }
            let scopes: HashSet<&str> = effective_scopes(task).into_iter().collect();
            for scope in scopes {
                *touch_counts.entry(scope.to_string()).or_insert(0) += 1;
            }
        }

        let mut contested: Vec<String> = touch_counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(scope, _)| scope)
            .collect();
        contested.extend(
            self.conflicts
                .iter()
                .filter(|c| c.is_unresolved())
                .flat_map(|c| c.scopes.iter().cloned()),
        );
        contested.sort();
        contested.dedup();

        if contested.is_empty() {
            return Vec::new();
        }
        tlog_debug!(
            "[synthesizer] Review pass covers {} contested scope(s)",
            contested.len()
        );
        vec![TaskSpec::new(
            REVIEW_TASK_NAME,
            &format!(
                "Re-examine scopes changed by more than one task: {}",
                contested.join(", ")
            ),
            capability,
        )
        .with_scope(contested)
        .in_phase(REVIEW_PHASE)]
    }

    /// Assemble the final outcome for a fully settled plan.
    ///
    /// Deterministic over the plan state and the accumulated conflicts:
    /// calling it twice yields equal outcomes.
    pub fn finalize(&self, plan: &Plan) -> FinalOutcome {
        let reports: Vec<TaskReport> = plan
            .ordered_ids()
            .iter()
            .filter_map(|id| plan.get_task(id))
            .map(TaskReport::from_task)
            .collect();
        let artifact = fold_artifact(&reports, &self.conflicts);
        FinalOutcome::new(reports, self.conflicts.clone(), artifact)
    }
}

/// Union of scopes actually touched by succeeded tasks, sorted.
///
/// This is the surface a post-hoc review pass should look at.
pub fn touched_scopes(plan: &Plan) -> Vec<String> {
    let mut scopes: Vec<String> = plan
        .all_tasks()
        .iter()
        .filter(|task| task.succeeded())
        .flat_map(|task| effective_scopes(task).into_iter().map(|s| s.to_string()))
        .collect();
    scopes.sort();
    scopes.dedup();
    scopes
}

// ============== Internal Helper Functions ==============

/// The scopes an attempt affected: what the worker reported touching,
/// falling back to the declared scope when it reported nothing.
fn effective_scopes(task: &Task) -> Vec<&str> {
    let touched: Vec<&str> = task
        .result
        .as_ref()
        .map(|record| record.touched.iter().map(|s| s.as_str()).collect())
        .unwrap_or_default();
    if touched.is_empty() {
        task.scope.iter().map(|s| s.as_str()).collect()
    } else {
        touched
    }
}

fn detect_conflict(first: &Task, second: &Task) -> Option<Conflict> {
    if !first.succeeded() || !second.succeeded() {
        return None;
    }
    let first_scopes = effective_scopes(first);
    let mut shared: Vec<String> = effective_scopes(second)
        .into_iter()
        .filter(|s| first_scopes.contains(s))
        .map(|s| s.to_string())
        .collect();
    if shared.is_empty() {
        return None;
    }
    shared.sort();

    if first.scope.len() < second.scope.len() {
        Some(Conflict::prefer_narrower(
            first.id, second.id, shared, first.id,
        ))
    } else if second.scope.len() < first.scope.len() {
        Some(Conflict::prefer_narrower(
            first.id, second.id, shared, second.id,
        ))
    } else {
        Some(Conflict::flagged(first.id, second.id, shared))
    }
}

/// Compose the folded artifact: succeeded sections in plan order, then
/// a trailing section naming any conflicts left unresolved.
fn fold_artifact(reports: &[TaskReport], conflicts: &[Conflict]) -> String {
    let mut sections = Vec::new();
    for report in reports {
        if let Some(artifact) = &report.artifact {
            sections.push(format!("## {}\n\n{}", report.name, artifact.trim_end()));
        }
    }

    let unresolved: Vec<&Conflict> = conflicts.iter().filter(|c| c.is_unresolved()).collect();
    if !unresolved.is_empty() {
        let mut lines = vec!["## Unresolved conflicts".to_string(), String::new()];
        for conflict in &unresolved {
            lines.push(format!(
                "- tasks {} and {} both touched: {}",
                conflict.first.short(),
                conflict.second.short(),
                conflict.scopes.join(", ")
            ));
        }
        sections.push(lines.join("\n").trim_end().to_string());
    }

    sections.join("\n\n")
}
