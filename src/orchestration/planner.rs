//! Request parsing and plan construction.
//!
//! A request arrives as a description plus declarative task specs, either
//! from a TOML request file or assembled in code. The planner validates
//! the specs against the capability registry and wires them into a
//! [`Plan`]. Follow-up specs raised by workers mid-request go through the
//! same path via [`merge`], staged on a clone so a rejected batch leaves
//! the live plan untouched.

use crate::config::Config;
use crate::core::plan::Plan;
use crate::core::task::{Task, TaskId, TaskSpec};
use crate::error::{Error, Result};
use crate::orchestration::effort::EffortLevel;
use crate::registry::CapabilityRegistry;
use crate::tlog;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Phase assigned to request tasks that do not name one.
pub const DEFAULT_PHASE: &str = "main";

/// Phase assigned to merged follow-up tasks that do not name one.
pub const FOLLOW_UP_PHASE: &str = "follow-up";

/// One coordination request.
///
/// An empty task list means the description itself is the work: the
/// planner synthesizes a single task carrying the configured default
/// capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// What the request as a whole is trying to achieve.
    pub description: String,
    /// Explicit effort override. Absent means the engine classifies the
    /// request from its shape.
    #[serde(default)]
    pub effort: Option<EffortLevel>,
    /// Declared tasks, in declaration order.
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

impl Request {
    /// A bare request carrying only a description.
    pub fn from_description(description: &str) -> Self {
        Self {
            description: description.to_string(),
            effort: None,
            tasks: Vec::new(),
        }
    }

    /// Parse a request from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a request from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Build a plan from a request.
///
/// Tasks land in their declared phases, with phase order fixed by first
/// mention. Dependencies reference sibling tasks by name and may point
/// forward in the declaration.
///
/// # Errors
///
/// Returns [`Error::UnknownCapability`] for a capability the registry
/// does not serve, [`Error::Validation`] for empty, duplicate, or
/// unknown task names or a protected declared scope, and
/// [`Error::CyclicDependency`] when the declared edges do not form a
/// DAG.
pub fn build(request: &Request, registry: &CapabilityRegistry, config: &Config) -> Result<Plan> {
    let specs: Vec<TaskSpec> = if request.tasks.is_empty() {
        vec![TaskSpec::new(
            "request",
            &request.description,
            config.effective_default_capability(),
        )]
    } else {
        request.tasks.clone()
    };

    let mut plan = Plan::new();
    append_specs(&mut plan, &specs, registry, config, DEFAULT_PHASE)?;

    tlog!(
        "[planner] Built plan: {} task(s) across {} phase(s)",
        plan.task_count(),
        plan.phases().len()
    );
    Ok(plan)
}

/// Merge follow-up specs into a live plan.
///
/// Specs naming an existing phase append to it; specs naming a new phase
/// open a trailing one; specs naming none land in [`FOLLOW_UP_PHASE`].
/// The batch is staged on a clone of the plan and swapped in only once
/// every spec validates, so a rejected batch changes nothing.
pub fn merge(
    plan: &mut Plan,
    follow_ups: &[TaskSpec],
    registry: &CapabilityRegistry,
    config: &Config,
) -> Result<Vec<TaskId>> {
    if follow_ups.is_empty() {
        return Ok(Vec::new());
    }

    let mut staged = plan.clone();
    let added = append_specs(&mut staged, follow_ups, registry, config, FOLLOW_UP_PHASE)?;
    *plan = staged;

    tlog!(
        "[planner] Merged {} follow-up task(s) into plan",
        added.len()
    );
    Ok(added)
}

/// Add a batch of specs to a plan: tasks first, dependency edges second,
/// so an edge may reference any task in the batch regardless of
/// declaration order.
fn append_specs(
    plan: &mut Plan,
    specs: &[TaskSpec],
    registry: &CapabilityRegistry,
    config: &Config,
    default_phase: &str,
) -> Result<Vec<TaskId>> {
    let protected = config.effective_protected_scopes();
    let mut added = Vec::with_capacity(specs.len());

    for spec in specs {
        if spec.name.trim().is_empty() {
            return Err(Error::Validation(
                "Task name must not be empty".to_string(),
            ));
        }

        let mut task = Task::from_spec(spec);
        if task.capability.is_empty() {
            task.capability = config.effective_default_capability().to_string();
        }
        if !registry.contains(&task.capability) {
            return Err(Error::UnknownCapability {
                name: task.capability.clone(),
            });
        }
        for scope in &task.scope {
            if let Some(pattern) = protected_scope_match(scope, &protected) {
                return Err(Error::Validation(format!(
                    "Task '{}' targets protected scope '{}' (matches '{}')",
                    task.name, scope, pattern
                )));
            }
        }

        let phase = plan.ensure_phase(spec.phase.as_deref().unwrap_or(default_phase));
        added.push(plan.add_task(task, phase)?);
    }

    for (spec, id) in specs.iter().zip(&added) {
        for dep_name in &spec.depends_on {
            let dep_id = plan.id_by_name(dep_name).ok_or_else(|| {
                Error::Validation(format!(
                    "Task '{}' depends on unknown task '{}'",
                    spec.name, dep_name
                ))
            })?;
            plan.add_dependency(&dep_id, id)?;
        }
    }

    Ok(added)
}

/// Check a scope identifier against protected glob patterns.
///
/// Matches both the full identifier and its final path component, so
/// `.env` also catches `backend/.env`. Returns the matching pattern.
pub(crate) fn protected_scope_match(scope: &str, patterns: &[String]) -> Option<String> {
    let path = scope.trim_start_matches("./");
    let basename = path.rsplit('/').next().unwrap_or(path);
    for raw in patterns {
        let Ok(pattern) = glob::Pattern::new(raw) else {
            continue;
        };
        if pattern.matches(path) || pattern.matches(basename) {
            return Some(raw.clone());
        }
    }
    None
}
