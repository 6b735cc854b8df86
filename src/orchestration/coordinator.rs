//! The per-request coordination loop.
//!
//! One coordinator drives one request end to end: classify its effort,
//! build the plan, then alternate dispatch waves and collection
//! barriers until every task is terminal. Each settled batch is folded
//! through the synthesizer, follow-up tasks raised by workers are
//! merged between batches, and at exhaustive effort one extra
//! self-review round may extend the plan after it first settles.
//!
//! The coordinator owns no execution state of its own beyond the
//! request in flight; everything it needs lives on the [`Plan`], so a
//! request is fully described by its plan at any point in the loop.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink};
use crate::config::Config;
use crate::core::outcome::{Conflict, FinalOutcome, OverallStatus, TaskReport};
use crate::core::plan::Plan;
use crate::core::task::{TaskId, TaskSpec, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::collector::Collector;
use crate::orchestration::dispatcher::Dispatcher;
use crate::orchestration::effort::{self, EffortLevel};
use crate::orchestration::planner::{self, Request};
use crate::orchestration::pool::WorkerPool;
use crate::orchestration::resolver;
use crate::orchestration::synthesizer::Synthesizer;
use crate::registry::CapabilityRegistry;
use crate::worker::WorkerId;
use crate::{tlog, tlog_warn};

/// Unique identifier for one coordinated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Progress events emitted while a request runs.
///
/// Delivery is best-effort: a full or closed channel drops the event
/// rather than stalling the loop, so observers must treat the stream as
/// advisory and read final state from the returned outcome.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    RequestStarted {
        request_id: RequestId,
        effort: EffortLevel,
        tasks: usize,
    },
    TaskStarted {
        task_id: TaskId,
        name: String,
        worker_id: WorkerId,
    },
    TaskRetried {
        task_id: TaskId,
        name: String,
        attempt: u32,
    },
    TaskFinished {
        task_id: TaskId,
        name: String,
        status: TaskStatus,
    },
    TaskSkipped {
        task_id: TaskId,
        name: String,
        reason: String,
    },
    BatchCompleted {
        settled: usize,
        remaining: usize,
    },
    ConflictDetected {
        conflict: Conflict,
    },
    FollowUpsMerged {
        count: usize,
    },
    ReviewRoundStarted {
        tasks: usize,
    },
    RequestCompleted {
        request_id: RequestId,
        status: OverallStatus,
    },
}

/// Drives requests from classification to final outcome.
pub struct Coordinator {
    registry: CapabilityRegistry,
    config: Config,
    audit: AuditSink,
    cancel: CancellationToken,
    events: mpsc::Sender<EngineEvent>,
}

impl Coordinator {
    /// A coordinator with auditing disabled and no event observer.
    pub fn new(registry: CapabilityRegistry, config: Config) -> Self {
        // Receiver dropped on purpose: sends become cheap no-ops.
        let (events, _) = mpsc::channel(1);
        Self {
            registry,
            config,
            audit: AuditSink::disabled(),
            cancel: CancellationToken::new(),
            events,
        }
    }

    /// Record one audit line per completed request on this sink.
    pub fn with_audit(mut self, audit: AuditSink) -> Self {
        self.audit = audit;
        self
    }

    /// Interrupt in-flight requests when this token fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Stream progress events to this channel.
    pub fn with_events(mut self, events: mpsc::Sender<EngineEvent>) -> Self {
        self.events = events;
        self
    }

    /// Flush and close the audit sink.
    pub fn close(self) {
        self.audit.close();
    }

    /// Run one request to completion.
    ///
    /// Individual task failures do not fail the request; they surface
    /// in the outcome's reports and overall status.
    ///
    /// # Errors
    ///
    /// Fails on an invalid request (unknown capability, duplicate or
    /// cyclic tasks), on [`Error::Cancelled`] when the cancellation
    /// token fires, and on engine-level faults such as a stalled plan.
    pub async fn run(&self, request: &Request) -> Result<FinalOutcome> {
        let request_id = RequestId::new();
        let started = Instant::now();

        let level = effort::classify(request);
        let params = level.params();
        let mut plan = planner::build(request, &self.registry, &self.config)?;

        tlog!(
            "[coordinator] Request {} classified {}: {} task(s) across {} phase(s)",
            request_id.short(),
            level,
            plan.task_count(),
            plan.phases().len()
        );
        self.emit(EngineEvent::RequestStarted {
            request_id,
            effort: level,
            tasks: plan.task_count(),
        })
        .await;

        let (worker_tx, mut worker_rx) = mpsc::unbounded_channel();
        let mut pool = WorkerPool::new(
            params.max_concurrent,
            self.config.task_timeout(),
            worker_tx,
            self.cancel.clone(),
        );
        let dispatcher = Dispatcher::new(params);
        let mut collector = Collector::new(params, self.config.max_retries);
        let mut synthesizer = Synthesizer::new();
        let mut reviewed = false;

        loop {
            self.propagate_skips(&mut plan).await?;

            if plan.all_terminal() {
                if params.self_review && !reviewed {
                    reviewed = true;
                    if self.schedule_review(&mut plan, &synthesizer).await? {
                        continue;
                    }
                }
                break;
            }

            let ready = resolver::ready_set(&plan);
            if ready.is_empty() {
                // Nothing in flight between batches, so an empty ready
                // set with work left means the plan cannot make progress.
                return Err(Error::Validation(format!(
                    "Plan stalled: {} task(s) remain but none are ready",
                    plan.unfinished_count()
                )));
            }

            let batch = dispatcher.dispatch_wave(&mut plan, &self.registry, &mut pool, &ready)?;
            let settled = collector
                .collect_batch(
                    &mut plan,
                    &mut pool,
                    &mut worker_rx,
                    &dispatcher,
                    &self.registry,
                    &batch,
                    &self.cancel,
                    &self.events,
                )
                .await?;

            self.warn_protected_touches(&plan, &settled);
            self.merge_follow_ups(&mut plan, &settled).await;

            if !params.bypass_synthesis {
                let partial = synthesizer.fold_batch(&plan, &settled);
                for conflict in &partial.conflicts {
                    self.emit(EngineEvent::ConflictDetected {
                        conflict: conflict.clone(),
                    })
                    .await;
                }
            }
            self.emit(EngineEvent::BatchCompleted {
                settled: settled.len(),
                remaining: plan.unfinished_count(),
            })
            .await;
        }

        let outcome = self.assemble(&plan, &synthesizer, params.bypass_synthesis);

        tlog!(
            "[coordinator] Request {} finished {:?}: {}/{} task(s) succeeded, {} conflict(s)",
            request_id.short(),
            outcome.status,
            outcome.succeeded_count(),
            outcome.task_count(),
            outcome.conflicts.len()
        );
        self.emit(EngineEvent::RequestCompleted {
            request_id,
            status: outcome.status,
        })
        .await;
        self.audit
            .record(AuditRecord::for_outcome(request_id, &outcome, started.elapsed()));

        Ok(outcome)
    }

    // ============== Internal Helper Functions ==============

    /// Best-effort event delivery.
    async fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event).await;
    }

    /// Cascade skips from settled failures and announce each one.
    async fn propagate_skips(&self, plan: &mut Plan) -> Result<()> {
        let skipped = resolver::propagate_skips(plan)?;
        for id in skipped {
            if let Some(task) = plan.get_task(&id) {
                let reason = match &task.status {
                    TaskStatus::Skipped { reason } => reason.clone(),
                    _ => String::new(),
                };
                self.emit(EngineEvent::TaskSkipped {
                    task_id: id,
                    name: task.name.clone(),
                    reason,
                })
                .await;
            }
        }
        Ok(())
    }

    /// Flag settled tasks that reported touching a protected scope.
    ///
    /// Declared scopes are rejected at plan build; touched scopes come
    /// back from an opaque worker after the fact, so the most the engine
    /// can do is call it out.
    fn warn_protected_touches(&self, plan: &Plan, settled: &[TaskId]) {
        let protected = self.config.effective_protected_scopes();
        for task in settled.iter().filter_map(|id| plan.get_task(id)) {
            let Some(record) = task.result.as_ref() else {
                continue;
            };
            for touched in &record.touched {
                if let Some(pattern) = planner::protected_scope_match(touched, &protected) {
                    tlog_warn!(
                        "[coordinator] Task '{}' touched protected scope '{}' (matches '{}')",
                        task.name,
                        touched,
                        pattern
                    );
                }
            }
        }
    }

    /// Merge follow-up specs raised by the batch that just settled.
    ///
    /// A rejected batch is logged and dropped; the request keeps running
    /// on the plan it already has.
    async fn merge_follow_ups(&self, plan: &mut Plan, settled: &[TaskId]) {
        let specs: Vec<TaskSpec> = settled
            .iter()
            .filter_map(|id| plan.get_task(id))
            .filter(|task| task.succeeded())
            .filter_map(|task| task.result.as_ref())
            .flat_map(|record| record.follow_ups.iter().cloned())
            .collect();
        if specs.is_empty() {
            return;
        }

        match planner::merge(plan, &specs, &self.registry, &self.config) {
            Ok(added) => {
                self.emit(EngineEvent::FollowUpsMerged { count: added.len() }).await;
            }
            Err(err) => {
                tlog_warn!("[coordinator] Rejected follow-up batch: {}", err);
            }
        }
    }

    /// Extend the plan with the self-review round, if anything is
    /// contested. Returns true when new tasks were added.
    async fn schedule_review(&self, plan: &mut Plan, synthesizer: &Synthesizer) -> Result<bool> {
        let capability = self.config.effective_review_capability();
        if !self.registry.contains(capability) {
            tlog_warn!(
                "[coordinator] Skipping self-review: no '{}' capability registered",
                capability
            );
            return Ok(false);
        }

        let specs = synthesizer.review_pass(plan, capability);
        if specs.is_empty() {
            return Ok(false);
        }
        match planner::merge(plan, &specs, &self.registry, &self.config) {
            Ok(added) => {
                tlog!("[coordinator] Scheduled self-review round");
                self.emit(EngineEvent::ReviewRoundStarted { tasks: added.len() }).await;
                Ok(true)
            }
            Err(err) => {
                tlog_warn!("[coordinator] Could not schedule self-review: {}", err);
                Ok(false)
            }
        }
    }

    /// Assemble the final outcome for a settled plan.
    fn assemble(&self, plan: &Plan, synthesizer: &Synthesizer, bypass: bool) -> FinalOutcome {
        if bypass && plan.task_count() == 1 {
            if let Some(task) = plan
                .ordered_ids()
                .first()
                .and_then(|id| plan.get_task(id))
            {
                return FinalOutcome::passthrough(TaskReport::from_task(task));
            }
        }
        synthesizer.finalize(plan)
    }
}
