//! Readiness resolution over the plan graph.
//!
//! The resolver answers one question between dispatch waves: which
//! tasks may run now? A task is eligible when it is still `Pending`,
//! every dependency has `Succeeded`, and every earlier phase is fully
//! settled. Eligibility is computed without mutating the plan; the
//! dispatcher performs the actual status transitions for the tasks it
//! launches, so held-back tasks simply show up again in the next wave.
//!
//! Failure propagation is the mutating counterpart: once a task fails,
//! every transitive dependent that has not started is marked `Skipped`
//! so the plan can settle instead of waiting forever.

use crate::core::plan::Plan;
use crate::core::task::{TaskId, TaskStatus};
use crate::error::Result;
use crate::tlog_debug;

/// Compute the set of tasks eligible for dispatch, in plan order.
///
/// Deterministic for a given plan state and free of side effects.
/// Tasks whose dependencies failed are never eligible; they are
/// resolved by [`propagate_skips`] instead.
pub fn ready_set(plan: &Plan) -> Vec<TaskId> {
    let gate = plan.first_unsettled_phase();
    plan.ordered_ids()
        .into_iter()
        .filter(|id| is_eligible(plan, id, gate))
        .collect()
}

/// Skip every pending task downstream of a failure.
///
/// Walks the plan in dependency order so one pass cascades: a task
/// skipped because its dependency failed will itself cause its
/// dependents to be skipped. Returns the ids skipped by this call.
/// Calling again without new failures is a no-op.
pub fn propagate_skips(plan: &mut Plan) -> Result<Vec<TaskId>> {
    let order: Vec<TaskId> = plan
        .topological_order()?
        .iter()
        .map(|task| task.id)
        .collect();

    let mut skipped = Vec::new();
    for id in order {
        let is_pending = plan
            .get_task(&id)
            .map(|task| task.status == TaskStatus::Pending)
            .unwrap_or(false);
        if !is_pending {
            continue;
        }

        let blocked = plan.dependencies_of(&id).iter().find_map(|dep| {
            match &dep.status {
                TaskStatus::Failed { .. } => Some(format!("dependency '{}' failed", dep.name)),
                TaskStatus::Skipped { .. } => {
                    Some(format!("dependency '{}' was skipped", dep.name))
                }
                _ => None,
            }
        });

        if let Some(reason) = blocked {
            if let Some(task) = plan.get_task_mut(&id) {
                task.skip(&reason)?;
                skipped.push(id);
            }
        }
    }

    if !skipped.is_empty() {
        tlog_debug!(
            "[resolver] Propagated failures into {} skipped task(s)",
            skipped.len()
        );
    }
    Ok(skipped)
}

// ============== Internal Helper Functions ==============

fn is_eligible(plan: &Plan, id: &TaskId, gate: usize) -> bool {
    let Some(task) = plan.get_task(id) else {
        return false;
    };
    if task.status != TaskStatus::Pending {
        return false;
    }
    match plan.phase_of(id) {
        Some(phase) if phase <= gate => {}
        _ => return false,
    }
    plan.dependencies_of(id).iter().all(|dep| dep.succeeded())
}
