//! Core domain models for task coordination.
//!
//! This module contains the fundamental data structures used throughout
//! the engine: tasks, the phased execution plan, and outcome records.

pub mod outcome;
pub mod plan;
pub mod task;

pub use outcome::{Conflict, ConflictResolution, FinalOutcome, OverallStatus, TaskReport};
pub use plan::{Phase, Plan, PlanCounts};
pub use task::{FailureKind, ResultRecord, ResultStatus, Task, TaskId, TaskSpec, TaskStatus};
