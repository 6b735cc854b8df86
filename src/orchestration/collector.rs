//! Batch collection with a completion barrier.
//!
//! After a wave launches, the collector owns the worker event stream
//! until every task in the batch reaches a terminal status. Results are
//! recorded on the plan the moment they arrive, so observers see
//! progress incrementally, but the barrier itself never releases early:
//! a slow task is waited out (bounded by the pool's per-task timeout),
//! never abandoned.
//!
//! The collector is also where retries happen. When the effort level
//! enables them, a failed or faulted attempt is relaunched once with a
//! fresh worker instance; the task stays `Running` across attempts and
//! only the final attempt's record is stored.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::plan::Plan;
use crate::core::task::{ResultRecord, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::coordinator::EngineEvent;
use crate::orchestration::dispatcher::Dispatcher;
use crate::orchestration::effort::EffortParams;
use crate::orchestration::pool::{WorkerEvent, WorkerPool};
use crate::registry::CapabilityRegistry;
use crate::{tlog, tlog_warn};

/// Collects worker events for one request, batch by batch.
pub struct Collector {
    /// Whether failed attempts get one relaunch.
    retry_failed: bool,
    /// Retries allowed per task beyond the first attempt.
    max_retries: u32,
    /// Attempts used per task, first attempt included.
    attempts: HashMap<TaskId, u32>,
}

impl Collector {
    /// Create a collector for one request's effort parameters.
    pub fn new(params: EffortParams, max_retries: u32) -> Self {
        Self {
            retry_failed: params.retry_failed,
            max_retries,
            attempts: HashMap::new(),
        }
    }

    /// Attempts used by a task so far, 0 if it never launched.
    pub fn attempts_for(&self, task_id: &TaskId) -> u32 {
        self.attempts.get(task_id).copied().unwrap_or(0)
    }

    /// Wait out one batch.
    ///
    /// Returns once every task in `batch` holds a terminal status, in
    /// the order they settled. Worker faults become `Failed` records
    /// with the fault's kind, so a timeout surfaces as
    /// `Failed { kind: Timeout }` while the rest of the batch still
    /// completes.
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] when the cancellation token fires;
    /// in-flight attempts are aborted and their processes killed.
    #[allow(clippy::too_many_arguments)]
    pub async fn collect_batch(
        &mut self,
        plan: &mut Plan,
        pool: &mut WorkerPool,
        rx: &mut mpsc::UnboundedReceiver<WorkerEvent>,
        dispatcher: &Dispatcher,
        registry: &CapabilityRegistry,
        batch: &[TaskId],
        cancel: &CancellationToken,
        events: &mpsc::Sender<EngineEvent>,
    ) -> Result<Vec<TaskId>> {
        for id in batch {
            self.attempts.entry(*id).or_insert(1);
        }

        let mut outstanding: HashSet<TaskId> = batch.iter().copied().collect();
        let mut settled = Vec::new();

        while !outstanding.is_empty() {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    pool.abort_all();
                    return Err(Error::Cancelled);
                }
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        return Err(Error::Worker(
                            "worker event channel closed mid-batch".to_string(),
                        ))
                    }
                },
            };

            match event {
                WorkerEvent::Started { task_id, worker_id } => {
                    if let Some(task) = plan.get_task_mut(&task_id) {
                        // A retry's Started arrives with the task already
                        // Running; only the first attempt transitions.
                        if task.status == TaskStatus::Dispatched {
                            task.begin_running()?;
                            let _ = events
                                .send(EngineEvent::TaskStarted {
                                    task_id,
                                    name: task.name.clone(),
                                    worker_id,
                                })
                                .await;
                        }
                    }
                }
                WorkerEvent::Finished { task_id, record, .. } => {
                    pool.release(&task_id);
                    if !outstanding.contains(&task_id) {
                        continue;
                    }
                    if !record.succeeded()
                        && self
                            .try_retry(plan, pool, dispatcher, registry, &task_id, events)
                            .await?
                    {
                        continue;
                    }
                    self.settle(plan, &task_id, record, &mut outstanding, &mut settled, events)
                        .await?;
                }
                WorkerEvent::Faulted {
                    task_id,
                    kind,
                    error,
                    ..
                } => {
                    pool.release(&task_id);
                    if !outstanding.contains(&task_id) {
                        continue;
                    }
                    if self
                        .try_retry(plan, pool, dispatcher, registry, &task_id, events)
                        .await?
                    {
                        continue;
                    }
                    let record = ResultRecord::failure(kind, &error);
                    self.settle(plan, &task_id, record, &mut outstanding, &mut settled, events)
                        .await?;
                }
            }
        }

        Ok(settled)
    }

    // ============== Internal Helper Functions ==============

    /// Relaunch a failed attempt when the retry budget allows.
    ///
    /// Returns true when a new attempt is in flight. A relaunch that
    /// itself fails to start burns no budget; the caller settles the
    /// task with the failure it already has.
    async fn try_retry(
        &mut self,
        plan: &mut Plan,
        pool: &mut WorkerPool,
        dispatcher: &Dispatcher,
        registry: &CapabilityRegistry,
        task_id: &TaskId,
        events: &mpsc::Sender<EngineEvent>,
    ) -> Result<bool> {
        if !self.retry_failed {
            return Ok(false);
        }
        let used = self.attempts.get(task_id).copied().unwrap_or(1);
        if used > self.max_retries {
            return Ok(false);
        }

        let next = used + 1;
        match dispatcher.launch_attempt(plan, registry, pool, task_id, next) {
            Ok(_) => {
                self.attempts.insert(*task_id, next);
                let name = plan
                    .get_task(task_id)
                    .map(|task| task.name.clone())
                    .unwrap_or_default();
                tlog!("[collector] Retrying task '{}' (attempt {})", name, next);
                let _ = events
                    .send(EngineEvent::TaskRetried {
                        task_id: *task_id,
                        name,
                        attempt: next,
                    })
                    .await;
                Ok(true)
            }
            Err(err) => {
                tlog_warn!(
                    "[collector] Could not relaunch task {}: {}",
                    task_id.short(),
                    err
                );
                Ok(false)
            }
        }
    }

    /// Record a final attempt and mark the task settled.
    async fn settle(
        &mut self,
        plan: &mut Plan,
        task_id: &TaskId,
        record: ResultRecord,
        outstanding: &mut HashSet<TaskId>,
        settled: &mut Vec<TaskId>,
        events: &mpsc::Sender<EngineEvent>,
    ) -> Result<()> {
        if let Some(task) = plan.get_task_mut(task_id) {
            task.record_result(record)?;
            let _ = events
                .send(EngineEvent::TaskFinished {
                    task_id: *task_id,
                    name: task.name.clone(),
                    status: task.status.clone(),
                })
                .await;
        }
        outstanding.remove(task_id);
        settled.push(*task_id);
        Ok(())
    }
}
