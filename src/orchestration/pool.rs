//! Worker pool for concurrent task execution.
//!
//! The `WorkerPool` tracks in-flight worker instances, enforces the
//! concurrency cap, and applies the per-task timeout. Every launch
//! binds one task attempt to one worker instance; outcomes come back
//! as [`WorkerEvent`]s on a channel so the collector can fold them in
//! as they arrive instead of polling.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::task::{FailureKind, ResultRecord, TaskId};
use crate::error::{Error, Result};
use crate::worker::{Invocation, Worker, WorkerId};

/// Events emitted by the worker pool as attempts progress.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A worker instance has been launched for a task attempt.
    Started {
        /// The task being attempted.
        task_id: TaskId,
        /// The worker instance bound to this attempt.
        worker_id: WorkerId,
    },
    /// A worker instance produced a result record.
    ///
    /// The record itself may report success or failure; the pool does
    /// not interpret it.
    Finished {
        /// The task that was attempted.
        task_id: TaskId,
        /// The worker instance that produced the record.
        worker_id: WorkerId,
        /// The record the worker produced.
        record: ResultRecord,
    },
    /// A worker instance broke down before producing a record.
    ///
    /// Covers spawn failures, unparseable output, and the per-task
    /// timeout.
    Faulted {
        /// The task that was attempted.
        task_id: TaskId,
        /// The worker instance that faulted.
        worker_id: WorkerId,
        /// Whether this was a timeout or an execution breakdown.
        kind: FailureKind,
        /// Error message describing the fault.
        error: String,
    },
}

impl WorkerEvent {
    /// The task this event belongs to.
    pub fn task_id(&self) -> TaskId {
        match self {
            WorkerEvent::Started { task_id, .. }
            | WorkerEvent::Finished { task_id, .. }
            | WorkerEvent::Faulted { task_id, .. } => *task_id,
        }
    }

    /// True for Finished and Faulted events.
    pub fn is_final(&self) -> bool {
        !matches!(self, WorkerEvent::Started { .. })
    }
}

/// An in-flight task attempt.
struct ActiveAttempt {
    worker_id: WorkerId,
    handle: JoinHandle<()>,
}

/// Manages concurrent worker instances.
///
/// The pool enforces `max_concurrent`, wraps each invocation in the
/// per-task timeout, and emits [`WorkerEvent`]s via the channel it was
/// created with. Dropping an attempt future kills its worker process,
/// so a timeout or cancellation never leaves a child running.
pub struct WorkerPool {
    /// In-flight attempts indexed by task id.
    active: HashMap<TaskId, ActiveAttempt>,
    /// Maximum number of concurrent worker instances.
    max_concurrent: usize,
    /// Wall-clock budget for a single attempt.
    task_timeout: Duration,
    /// Channel for emitting worker events. Unbounded so a full wave can
    /// launch before the collector starts draining.
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
    /// Cancellation for all in-flight attempts.
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Create a new pool.
    ///
    /// `max_concurrent` caps in-flight attempts, `task_timeout` bounds
    /// each attempt, and `cancel` aborts all attempts when triggered.
    pub fn new(
        max_concurrent: usize,
        task_timeout: Duration,
        event_tx: mpsc::UnboundedSender<WorkerEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            active: HashMap::new(),
            max_concurrent,
            task_timeout,
            event_tx,
            cancel,
        }
    }

    /// Launch a worker instance for one task attempt.
    ///
    /// Emits `Started` immediately, then `Finished` or `Faulted` from
    /// the spawned attempt. The worker is moved into the attempt and
    /// dropped when it completes, so each instance serves exactly one
    /// invocation.
    ///
    /// # Errors
    /// Returns [`Error::PoolSaturated`] when the pool is at capacity and
    /// [`Error::Validation`] when the task already has an attempt in
    /// flight.
    pub fn launch<W>(
        &mut self,
        task_id: TaskId,
        worker: W,
        invocation: Invocation,
    ) -> Result<WorkerId>
    where
        W: Worker + Send + 'static,
    {
        if !self.has_capacity() {
            return Err(Error::PoolSaturated {
                max: self.max_concurrent,
            });
        }
        if self.active.contains_key(&task_id) {
            return Err(Error::Validation(format!(
                "task {} already has a worker attempt in flight",
                task_id.short()
            )));
        }

        let worker_id = worker.id();
        let _ = self
            .event_tx
            .send(WorkerEvent::Started { task_id, worker_id });

        let tx = self.event_tx.clone();
        let timeout = self.task_timeout;
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = tokio::time::timeout(timeout, worker.invoke(invocation)) => outcome,
            };
            let event = match outcome {
                Ok(Ok(record)) => WorkerEvent::Finished {
                    task_id,
                    worker_id,
                    record,
                },
                Ok(Err(err)) => WorkerEvent::Faulted {
                    task_id,
                    worker_id,
                    kind: FailureKind::Execution,
                    error: err.to_string(),
                },
                Err(_) => WorkerEvent::Faulted {
                    task_id,
                    worker_id,
                    kind: FailureKind::Timeout,
                    error: format!("worker exceeded {}s budget", timeout.as_secs()),
                },
            };
            let _ = tx.send(event);
        });

        self.active.insert(task_id, ActiveAttempt { worker_id, handle });
        Ok(worker_id)
    }

    /// Release a task's attempt slot after its final event.
    ///
    /// Returns the worker instance that held the slot, or None if the
    /// task had no attempt in flight.
    pub fn release(&mut self, task_id: &TaskId) -> Option<WorkerId> {
        self.active.remove(task_id).map(|attempt| attempt.worker_id)
    }

    /// Abort every in-flight attempt and clear the pool.
    ///
    /// Attempt futures are dropped, which kills their worker processes.
    pub fn abort_all(&mut self) {
        for (_, attempt) in self.active.drain() {
            attempt.handle.abort();
        }
    }

    /// The worker instance currently attempting a task, if any.
    pub fn worker_for(&self, task_id: &TaskId) -> Option<WorkerId> {
        self.active.get(task_id).map(|attempt| attempt.worker_id)
    }

    /// Number of in-flight attempts.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Check if another attempt may be launched.
    pub fn has_capacity(&self) -> bool {
        self.active_count() < self.max_concurrent
    }

    /// The concurrency cap this pool enforces.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Tasks with an attempt in flight, in no particular order.
    pub fn active_tasks(&self) -> Vec<TaskId> {
        self.active.keys().copied().collect()
    }
}
