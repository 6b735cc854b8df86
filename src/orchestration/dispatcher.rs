//! Wave dispatch of ready tasks to worker instances.
//!
//! The dispatcher turns a ready set into a wave: the subset that
//! launches right now given the effort level's concurrency cap and, at
//! the levels that demand it, scope-overlap avoidance. Tasks held back
//! stay `Pending` and surface again in the next ready set.
//!
//! Each launched attempt gets a freshly constructed worker instance;
//! nothing is pooled across attempts.

use std::collections::HashSet;

use crate::core::plan::Plan;
use crate::core::task::{TaskId, TaskStatus};
use crate::error::Result;
use crate::orchestration::effort::EffortParams;
use crate::orchestration::pool::WorkerPool;
use crate::registry::CapabilityRegistry;
use crate::tlog;
use crate::worker::{CommandWorker, Invocation, Worker, WorkerId};

/// Launches waves of ready tasks.
pub struct Dispatcher {
    params: EffortParams,
}

impl Dispatcher {
    /// Create a dispatcher for one request's effort parameters.
    pub fn new(params: EffortParams) -> Self {
        Self { params }
    }

    /// The effort parameters this dispatcher enforces.
    pub fn params(&self) -> EffortParams {
        self.params
    }

    /// Choose which ready tasks launch now.
    ///
    /// Applies the concurrency cap against tasks already in flight,
    /// then scope-overlap avoidance when the effort level requires it:
    /// a task is held back if its declared scope intersects the scope
    /// of any in-flight task or of a task selected earlier in this
    /// wave. Selection order follows the ready set, so held-back tasks
    /// are simply deferred, never reordered past their peers.
    pub fn select_wave(&self, plan: &Plan, ready: &[TaskId]) -> Vec<TaskId> {
        let cap = self.params.max_concurrent;
        let active = in_flight_count(plan);

        let mut busy: HashSet<String> = if self.params.avoid_overlap {
            in_flight_scopes(plan)
        } else {
            HashSet::new()
        };

        let mut wave = Vec::new();
        for id in ready {
            if active + wave.len() >= cap {
                break;
            }
            let Some(task) = plan.get_task(id) else {
                continue;
            };
            if self.params.avoid_overlap {
                if task.scope.iter().any(|s| busy.contains(s)) {
                    continue;
                }
                busy.extend(task.scope.iter().cloned());
            }
            wave.push(*id);
        }
        wave
    }

    /// Launch one attempt for a task.
    ///
    /// Constructs a fresh worker from the task's capability spec and
    /// hands the invocation to the pool. The first attempt walks the
    /// task through `Ready` and `Dispatched`; a retry leaves the task
    /// `Running` and only rebinds it to the new worker instance.
    pub fn launch_attempt(
        &self,
        plan: &mut Plan,
        registry: &CapabilityRegistry,
        pool: &mut WorkerPool,
        task_id: &TaskId,
        attempt: u32,
    ) -> Result<WorkerId> {
        let capability = plan
            .get_task(task_id)
            .map(|task| task.capability.clone())
            .unwrap_or_default();
        let spec = registry.resolve(&capability)?;
        let worker = CommandWorker::from_kind(&spec.worker)?;
        let worker_id = worker.id();
        let context = spec.context.clone();

        let Some(task) = plan.get_task_mut(task_id) else {
            return Err(crate::error::Error::Validation(format!(
                "task {} is not in the plan",
                task_id.short()
            )));
        };
        let invocation = Invocation::new(task, context, attempt);
        if attempt <= 1 {
            task.mark_ready()?;
            task.begin_dispatch(worker_id)?;
        } else {
            task.worker_id = Some(worker_id);
        }

        pool.launch(*task_id, worker, invocation)?;
        Ok(worker_id)
    }

    /// Launch the selected wave from a ready set.
    ///
    /// Returns the ids actually launched, in launch order. The caller
    /// treats that set as the batch to collect.
    pub fn dispatch_wave(
        &self,
        plan: &mut Plan,
        registry: &CapabilityRegistry,
        pool: &mut WorkerPool,
        ready: &[TaskId],
    ) -> Result<Vec<TaskId>> {
        let wave = self.select_wave(plan, ready);
        for task_id in &wave {
            self.launch_attempt(plan, registry, pool, task_id, 1)?;
        }
        if !wave.is_empty() {
            tlog!(
                "[dispatcher] Launched wave of {} task(s) ({} ready, {} held back)",
                wave.len(),
                ready.len(),
                ready.len() - wave.len()
            );
        }
        Ok(wave)
    }
}

// ============== Internal Helper Functions ==============

fn in_flight_count(plan: &Plan) -> usize {
    plan.all_tasks()
        .iter()
        .filter(|task| is_in_flight(&task.status))
        .count()
}

fn in_flight_scopes(plan: &Plan) -> HashSet<String> {
    plan.all_tasks()
        .iter()
        .filter(|task| is_in_flight(&task.status))
        .flat_map(|task| task.scope.iter().cloned())
        .collect()
}

fn is_in_flight(status: &TaskStatus) -> bool {
    matches!(
        status,
        TaskStatus::Ready | TaskStatus::Dispatched | TaskStatus::Running
    )
}
