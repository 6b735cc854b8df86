//! Outcome records produced by synthesis.
//!
//! A finished request folds down to a [`FinalOutcome`]: one report per
//! task, the conflicts detected between same-batch results, and an
//! overall status for the request.

use serde::{Deserialize, Serialize};

use crate::core::task::{Task, TaskId, TaskStatus};

/// How a detected scope conflict was settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum ConflictResolution {
    /// The task with the narrower declared scope wins.
    PreferNarrower {
        /// Id of the winning task.
        winner: TaskId,
    },
    /// Scopes were equally specific; surfaced for external disambiguation.
    Flagged,
}

impl ConflictResolution {
    /// Check whether the conflict is still unresolved.
    pub fn is_flagged(&self) -> bool {
        matches!(self, Self::Flagged)
    }

    /// Get the winning task id if one was picked.
    pub fn winner(&self) -> Option<TaskId> {
        match self {
            Self::PreferNarrower { winner } => Some(*winner),
            Self::Flagged => None,
        }
    }
}

/// Two tasks from the same batch whose touched scopes intersect.
///
/// Neither output is dropped: both artifacts stay in the outcome and the
/// resolution only records which one takes precedence, or that no
/// precedence could be established.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// First of the two conflicting tasks.
    pub first: TaskId,
    /// Second of the two conflicting tasks.
    pub second: TaskId,
    /// The scope identifiers both tasks touched.
    pub scopes: Vec<String>,
    /// How the conflict was settled.
    pub resolution: ConflictResolution,
}

impl Conflict {
    /// Create a conflict settled in favour of the narrower-scoped task.
    pub fn prefer_narrower(first: TaskId, second: TaskId, scopes: Vec<String>, winner: TaskId) -> Self {
        Self {
            first,
            second,
            scopes,
            resolution: ConflictResolution::PreferNarrower { winner },
        }
    }

    /// Create a conflict that could not be settled automatically.
    pub fn flagged(first: TaskId, second: TaskId, scopes: Vec<String>) -> Self {
        Self {
            first,
            second,
            scopes,
            resolution: ConflictResolution::Flagged,
        }
    }

    /// Check whether the given task is one of the two parties.
    pub fn involves(&self, id: &TaskId) -> bool {
        self.first == *id || self.second == *id
    }

    /// Get the winning task id if one was picked.
    pub fn winner(&self) -> Option<TaskId> {
        self.resolution.winner()
    }

    /// Check whether the conflict still needs external disambiguation.
    pub fn is_unresolved(&self) -> bool {
        self.resolution.is_flagged()
    }
}

/// Per-task summary carried in the final outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub name: String,
    pub capability: String,
    pub status: TaskStatus,
    /// Artifact payload, present only for succeeded tasks.
    pub artifact: Option<String>,
    /// Scope identifiers the worker reported touching.
    pub touched: Vec<String>,
}

impl TaskReport {
    /// Build a report from a task's current state.
    pub fn from_task(task: &Task) -> Self {
        let (artifact, touched) = match &task.result {
            Some(record) if record.succeeded() => {
                (Some(record.artifact.clone()), record.touched.clone())
            }
            Some(record) => (None, record.touched.clone()),
            None => (None, Vec::new()),
        };
        Self {
            id: task.id,
            name: task.name.clone(),
            capability: task.capability.clone(),
            status: task.status.clone(),
            artifact,
            touched,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, TaskStatus::Succeeded)
    }

    pub fn failed(&self) -> bool {
        matches!(self.status, TaskStatus::Failed { .. })
    }

    pub fn skipped(&self) -> bool {
        matches!(self.status, TaskStatus::Skipped { .. })
    }

    /// Get the failure message if the task failed.
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            TaskStatus::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Overall status of a finished request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Every task succeeded.
    Succeeded,
    /// At least one task failed or was skipped, but not every task failed.
    PartiallyFailed,
    /// Every task failed outright.
    Failed,
}

impl OverallStatus {
    /// Derive the overall status from per-task reports.
    ///
    /// An empty report list counts as success. A skipped task degrades
    /// the outcome to `PartiallyFailed` rather than `Failed`: it was
    /// never attempted, so the request did not fail wholesale.
    pub fn for_reports(reports: &[TaskReport]) -> Self {
        let total = reports.len();
        let succeeded = reports.iter().filter(|r| r.succeeded()).count();
        let failed = reports.iter().filter(|r| r.failed()).count();

        if succeeded == total {
            Self::Succeeded
        } else if failed == total {
            Self::Failed
        } else {
            Self::PartiallyFailed
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::PartiallyFailed => write!(f, "partially failed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Structured record a finished request resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalOutcome {
    /// One report per task in the plan, in plan order.
    pub reports: Vec<TaskReport>,
    /// Every conflict detected during synthesis, resolved or not.
    pub conflicts: Vec<Conflict>,
    /// The merged artifact document.
    pub artifact: String,
    /// Overall status derived from the reports.
    pub status: OverallStatus,
}

impl FinalOutcome {
    /// Build an outcome from reports and conflicts, deriving the status.
    pub fn new(reports: Vec<TaskReport>, conflicts: Vec<Conflict>, artifact: String) -> Self {
        let status = OverallStatus::for_reports(&reports);
        Self {
            reports,
            conflicts,
            artifact,
            status,
        }
    }

    /// Build an outcome that passes a single task's result through
    /// unchanged, with no synthesis applied.
    pub fn passthrough(report: TaskReport) -> Self {
        let artifact = report.artifact.clone().unwrap_or_default();
        let status = OverallStatus::for_reports(std::slice::from_ref(&report));
        Self {
            reports: vec![report],
            conflicts: Vec::new(),
            artifact,
            status,
        }
    }

    /// Find the report for a given task.
    pub fn report_for(&self, id: &TaskId) -> Option<&TaskReport> {
        self.reports.iter().find(|r| r.id == *id)
    }

    /// Conflicts that still need external disambiguation.
    pub fn unresolved_conflicts(&self) -> Vec<&Conflict> {
        self.conflicts.iter().filter(|c| c.is_unresolved()).collect()
    }

    pub fn task_count(&self) -> usize {
        self.reports.len()
    }

    pub fn succeeded_count(&self) -> usize {
        self.reports.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.reports.iter().filter(|r| r.failed()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.reports.iter().filter(|r| r.skipped()).count()
    }
}
