//! Task data model for the coordination plan.
//!
//! Tasks are the atomic units of decomposed work handed to workers. Each
//! task tracks its capability requirement, declared scope, status, and
//! result.

use crate::worker::WorkerId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task within a plan. UUID v4 under the hood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Abbreviated form for log lines and progress output.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Why a task attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The worker reported failure or could not be executed.
    Execution,
    /// The attempt exceeded the per-task timeout.
    Timeout,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Execution => write!(f, "execution"),
            FailureKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// Task status in its lifecycle.
///
/// Status only moves forward: Pending → Ready → Dispatched → Running →
/// Succeeded or Failed, with Pending → Skipped as the only branch. Any
/// other transition is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Task created but not yet ready for dispatch.
    Pending,
    /// Dependencies satisfied and phase gate open.
    Ready,
    /// Handed to a worker instance, not yet running.
    Dispatched,
    /// A worker instance is executing the task.
    Running,
    /// Task completed successfully.
    Succeeded,
    /// Task failed with an error.
    Failed {
        /// What kind of failure ended the task.
        kind: FailureKind,
        /// Error message describing the failure.
        error: String,
    },
    /// Task will never run because a dependency failed.
    Skipped {
        /// Reason why the task was skipped.
        reason: String,
    },
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    /// True for Succeeded, Failed, or Skipped.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed { .. } | TaskStatus::Skipped { .. }
        )
    }

    fn can_advance(from: &TaskStatus, to: &TaskStatus) -> bool {
        matches!(
            (from, to),
            (TaskStatus::Pending, TaskStatus::Ready)
                | (TaskStatus::Pending, TaskStatus::Skipped { .. })
                | (TaskStatus::Ready, TaskStatus::Dispatched)
                | (TaskStatus::Dispatched, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Succeeded)
                | (TaskStatus::Running, TaskStatus::Failed { .. })
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Dispatched => write!(f, "dispatched"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed { kind, error } => write!(f, "failed ({}): {}", kind, error),
            TaskStatus::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

/// Result of one successful or failed task attempt.
///
/// `touched` lists the scope identifiers the worker actually affected,
/// which may be a subset of the task's declared scope. `follow_ups` are
/// newly discovered tasks the plan should absorb.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub status: ResultStatus,
    /// Free-form artifact payload produced by the worker.
    pub artifact: String,
    /// Scope identifiers actually affected by the attempt.
    #[serde(default)]
    pub touched: Vec<String>,
    /// Newly discovered tasks to merge into the plan.
    #[serde(default)]
    pub follow_ups: Vec<TaskSpec>,
}

/// Terminal status reported in a [`ResultRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ResultStatus {
    Succeeded,
    Failed { kind: FailureKind, error: String },
}

impl ResultRecord {
    /// Build a successful record.
    pub fn success(artifact: &str, touched: Vec<String>) -> Self {
        Self {
            status: ResultStatus::Succeeded,
            artifact: artifact.to_string(),
            touched,
            follow_ups: Vec::new(),
        }
    }

    /// Build a failed record.
    pub fn failure(kind: FailureKind, error: &str) -> Self {
        Self {
            status: ResultStatus::Failed {
                kind,
                error: error.to_string(),
            },
            artifact: String::new(),
            touched: Vec::new(),
            follow_ups: Vec::new(),
        }
    }

    /// Attach follow-up task specs to the record.
    pub fn with_follow_ups(mut self, follow_ups: Vec<TaskSpec>) -> Self {
        self.follow_ups = follow_ups;
        self
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, ResultStatus::Succeeded)
    }
}

/// Declarative shape of a task before it enters a plan.
///
/// Used both for request files and for follow-up tasks reported by
/// workers. Dependencies reference other tasks by name; names are unique
/// within a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub description: String,
    /// Empty means "use the configured default capability".
    #[serde(default)]
    pub capability: String,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub phase: Option<String>,
}

impl TaskSpec {
    pub fn new(name: &str, description: &str, capability: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            capability: capability.to_string(),
            scope: Vec::new(),
            depends_on: Vec::new(),
            phase: None,
        }
    }

    pub fn with_scope(mut self, scope: Vec<String>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn in_phase(mut self, phase: &str) -> Self {
        self.phase = Some(phase.to_string());
        self
    }
}

/// A single task in the coordination plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Name unique within the plan, used for dependency references.
    pub name: String,
    /// Detailed description of what the task should accomplish.
    pub description: String,
    /// Capability the worker must offer to execute this task.
    pub capability: String,
    /// Declared target scope, used only for overlap detection.
    pub scope: Vec<String>,
    /// Current execution status.
    pub status: TaskStatus,
    /// Worker instance currently or last bound to this task.
    pub worker_id: Option<WorkerId>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was handed to a worker.
    pub dispatched_at: Option<DateTime<Utc>>,
    /// When the worker began executing.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Result of the final attempt, set exactly once.
    pub result: Option<ResultRecord>,
}

impl Task {
    /// Create a new task with Pending status and a generated id.
    pub fn new(name: &str, description: &str, capability: &str, scope: Vec<String>) -> Self {
        Self {
            id: TaskId::new(),
            name: name.to_string(),
            description: description.to_string(),
            capability: capability.to_string(),
            scope,
            status: TaskStatus::Pending,
            worker_id: None,
            created_at: Utc::now(),
            dispatched_at: None,
            started_at: None,
            finished_at: None,
            result: None,
        }
    }

    /// Build a task from a spec. Dependency wiring happens in the plan.
    pub fn from_spec(spec: &TaskSpec) -> Self {
        Self::new(
            &spec.name,
            &spec.description,
            &spec.capability,
            spec.scope.clone(),
        )
    }

    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !TaskStatus::can_advance(&self.status, &next) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Dependencies satisfied and phase gate open.
    pub fn mark_ready(&mut self) -> Result<()> {
        self.transition(TaskStatus::Ready)
    }

    /// Bind the task to a worker instance and record dispatch time.
    pub fn begin_dispatch(&mut self, worker_id: WorkerId) -> Result<()> {
        self.transition(TaskStatus::Dispatched)?;
        self.worker_id = Some(worker_id);
        self.dispatched_at = Some(Utc::now());
        Ok(())
    }

    /// The worker reported it has begun executing.
    pub fn begin_running(&mut self) -> Result<()> {
        self.transition(TaskStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record the final attempt's result and move to the matching
    /// terminal state. The result may be recorded only once.
    pub fn record_result(&mut self, record: ResultRecord) -> Result<()> {
        if self.result.is_some() {
            return Err(Error::Validation(format!(
                "result already recorded for task {}",
                self.id.short()
            )));
        }
        let next = match &record.status {
            ResultStatus::Succeeded => TaskStatus::Succeeded,
            ResultStatus::Failed { kind, error } => TaskStatus::Failed {
                kind: *kind,
                error: error.clone(),
            },
        };
        self.transition(next)?;
        self.result = Some(record);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the task Skipped because a dependency failed.
    pub fn skip(&mut self, reason: &str) -> Result<()> {
        self.transition(TaskStatus::Skipped {
            reason: reason.to_string(),
        })?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, TaskStatus::Succeeded)
    }
}
