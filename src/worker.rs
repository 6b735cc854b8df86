//! Worker invocation boundary.
//!
//! A worker executes exactly one task attempt. The engine only sees the
//! [`Worker::invoke`] call: it hands over an [`Invocation`] and receives
//! a [`ResultRecord`], with whatever the worker does in between (file
//! edits, network calls) opaque to the coordinator.
//!
//! The production implementation is [`CommandWorker`], which spawns an
//! external command, writes the invocation as JSON to its stdin, and
//! parses a JSON report from its stdout:
//!
//! ```json
//! {"status":{"state":"succeeded"},"artifact":"...","touched":["src/a.rs"]}
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use uuid::Uuid;

use crate::core::task::{FailureKind, ResultRecord, Task, TaskId};
use crate::error::{Error, Result};
use crate::registry::{ContextBundle, WorkerKind};
use crate::tlog_debug;

/// Unique identifier for one worker instance.
///
/// A fresh id is minted per attempt; retries never reuse an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    /// Create a new unique worker identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Everything a worker needs for one attempt at one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub task_id: TaskId,
    pub task_name: String,
    pub capability: String,
    pub description: String,
    /// Context pieces the capability requires.
    pub context: ContextBundle,
    /// Declared target scope for the task.
    pub scope: Vec<String>,
    /// Attempt number, starting at 1.
    pub attempt: u32,
}

impl Invocation {
    /// Build an invocation for a task attempt.
    pub fn new(task: &Task, context: ContextBundle, attempt: u32) -> Self {
        Self {
            task_id: task.id,
            task_name: task.name.clone(),
            capability: task.capability.clone(),
            description: task.description.clone(),
            context,
            scope: task.scope.clone(),
            attempt,
        }
    }
}

/// A worker instance bound to one task attempt.
///
/// One instance serves exactly one `invoke` call; the dispatcher
/// constructs a fresh instance per attempt. `invoke` returns `Ok` with a
/// failed [`ResultRecord`] when the work itself failed, and `Err` only
/// when the invocation machinery broke (spawn failure, unreadable
/// report).
pub trait Worker: Send + Sync {
    /// Stable identifier for logging and task binding.
    fn id(&self) -> WorkerId;

    /// Execute one attempt.
    fn invoke(&self, invocation: Invocation) -> impl Future<Output = Result<ResultRecord>> + Send;
}

/// Worker that runs an external command per invocation.
///
/// The invocation is serialized as JSON on the child's stdin; the child
/// is expected to print a JSON report on stdout before exiting. The
/// child is killed if the attempt future is dropped, so a timed-out
/// attempt does not leave a stray process behind.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    id: WorkerId,
    program: PathBuf,
    args: Vec<String>,
}

impl CommandWorker {
    /// Create a worker for a registry worker kind.
    ///
    /// # Errors
    ///
    /// Returns `Error::WorkerNotAvailable` if the program cannot be
    /// found on the PATH.
    pub fn from_kind(kind: &WorkerKind) -> Result<Self> {
        match kind {
            WorkerKind::Command { program, args } => {
                let resolved = which::which(program)
                    .map_err(|_| Error::WorkerNotAvailable(program.clone()))?;
                Ok(Self {
                    id: WorkerId::new(),
                    program: resolved,
                    args: args.clone(),
                })
            }
        }
    }

    /// Create a worker with an explicit program path, skipping PATH
    /// lookup. Useful for tests and non-standard installs.
    pub fn with_program(program: PathBuf, args: Vec<String>) -> Self {
        Self {
            id: WorkerId::new(),
            program,
            args,
        }
    }

    /// Get the program path.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Get the extra arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Parse a worker report from captured stdout.
    ///
    /// The report is the whole output when the worker prints nothing
    /// else; otherwise the last line that parses as a report wins, so
    /// workers may log freely before printing it.
    pub fn parse_report(stdout: &str) -> Result<ResultRecord> {
        let trimmed = stdout.trim();
        if let Ok(record) = serde_json::from_str::<ResultRecord>(trimmed) {
            return Ok(record);
        }

        trimmed
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str::<ResultRecord>(line.trim()).ok())
            .ok_or_else(|| {
                Error::Worker(format!(
                    "worker produced no parseable report: {:?}",
                    truncate(trimmed, 200)
                ))
            })
    }
}

impl Worker for CommandWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    async fn invoke(&self, invocation: Invocation) -> Result<ResultRecord> {
        let payload = serde_json::to_vec(&invocation)?;
        tlog_debug!(
            "[worker {}] Invoking {} for task {}",
            self.id.short(),
            self.program.display(),
            invocation.task_id.short()
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                format!("worker exited with {}", output.status)
            } else {
                stderr.trim().to_string()
            };
            return Ok(ResultRecord::failure(FailureKind::Execution, &message));
        }

        Self::parse_report(&stdout)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
