//! The per-request plan: ordered phases over a task dependency DAG.
//!
//! Phases are advisory groupings for reporting, with one scheduling rule:
//! a task may not become ready while any earlier phase still has
//! non-terminal tasks. Dependency edges live in a petgraph DiGraph and
//! are validated against cycles on every mutation.

use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// One named phase and the tasks declared in it, in declaration order.
#[derive(Debug, Clone)]
pub struct Phase {
    pub name: String,
    pub tasks: Vec<TaskId>,
}

impl Phase {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tasks: Vec::new(),
        }
    }
}

/// Status counts across a plan, used for outcome and audit summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlanCounts {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// The task dependency graph for one request.
///
/// Owned exclusively by the coordinator for the request's lifetime;
/// components borrow it per call.
#[derive(Clone)]
pub struct Plan {
    /// The underlying directed graph. An edge A -> B means B depends on A.
    graph: DiGraph<Task, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
    /// Task names are unique within a plan and used for dependency
    /// references in specs.
    names: HashMap<String, TaskId>,
    phases: Vec<Phase>,
    phase_of: HashMap<TaskId, usize>,
}

impl Plan {
    /// Create a new empty plan.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
            names: HashMap::new(),
            phases: Vec::new(),
            phase_of: HashMap::new(),
        }
    }

    /// Find a phase by name.
    pub fn phase_index(&self, name: &str) -> Option<usize> {
        self.phases.iter().position(|p| p.name == name)
    }

    /// Find a phase by name, appending a new trailing phase if missing.
    pub fn ensure_phase(&mut self, name: &str) -> usize {
        if let Some(index) = self.phase_index(name) {
            return index;
        }
        self.phases.push(Phase::new(name));
        self.phases.len() - 1
    }

    /// Add a task to the given phase.
    ///
    /// # Errors
    /// Returns an error if the phase does not exist, the task id is
    /// already present, or the task name is already taken.
    pub fn add_task(&mut self, task: Task, phase: usize) -> Result<TaskId> {
        if phase >= self.phases.len() {
            return Err(Error::Validation(format!(
                "Phase index {} out of bounds ({} phases)",
                phase,
                self.phases.len()
            )));
        }
        if self.task_index.contains_key(&task.id) {
            return Err(Error::Validation(format!(
                "Task {} already in plan",
                task.id
            )));
        }
        if self.names.contains_key(&task.name) {
            return Err(Error::Validation(format!(
                "Task name '{}' already in plan",
                task.name
            )));
        }

        let id = task.id;
        let name = task.name.clone();
        let index = self.graph.add_node(task);
        self.task_index.insert(id, index);
        self.names.insert(name, id);
        self.phases[phase].tasks.push(id);
        self.phase_of.insert(id, phase);
        Ok(id)
    }

    /// Add a dependency between two tasks.
    ///
    /// The dependency indicates that `from` must succeed before `to` can
    /// be dispatched. Rejects the edge if it would create a cycle.
    pub fn add_dependency(&mut self, from: &TaskId, to: &TaskId) -> Result<()> {
        let from_index = self
            .task_index
            .get(from)
            .ok_or_else(|| Error::Validation(format!("Task {} not found in plan", from)))?;

        let to_index = self
            .task_index
            .get(to)
            .ok_or_else(|| Error::Validation(format!("Task {} not found in plan", to)))?;

        // Temporarily add the edge to check for cycles
        let edge = self.graph.add_edge(*from_index, *to_index, ());

        if is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            let name_of = |id: &TaskId| {
                self.get_task(id)
                    .map(|t| t.name.clone())
                    .unwrap_or_else(|| id.to_string())
            };
            return Err(Error::CyclicDependency {
                from: name_of(from),
                to: name_of(to),
            });
        }

        Ok(())
    }

    /// Get a reference to a task by its ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Get a mutable reference to a task by its ID.
    pub fn get_task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph.node_weight_mut(index)
        } else {
            None
        }
    }

    /// Look up a task id by its unique name.
    pub fn id_by_name(&self, name: &str) -> Option<TaskId> {
        self.names.get(name).copied()
    }

    /// Get the number of tasks in the plan.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of dependency edges in the plan.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check if a dependency edge exists between two tasks.
    pub fn has_dependency(&self, from: &TaskId, to: &TaskId) -> bool {
        if let (Some(&from_idx), Some(&to_idx)) =
            (self.task_index.get(from), self.task_index.get(to))
        {
            self.graph.find_edge(from_idx, to_idx).is_some()
        } else {
            false
        }
    }

    /// Get all tasks the given task depends on (predecessors).
    pub fn dependencies_of(&self, id: &TaskId) -> Vec<&Task> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph
                .neighbors_directed(index, petgraph::Direction::Incoming)
                .filter_map(|neighbor| self.graph.node_weight(neighbor))
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Get all tasks that depend on the given task (successors).
    pub fn dependents_of(&self, id: &TaskId) -> Vec<&Task> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph
                .neighbors_directed(index, petgraph::Direction::Outgoing)
                .filter_map(|neighbor| self.graph.node_weight(neighbor))
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Get all tasks in the plan (graph order).
    pub fn all_tasks(&self) -> Vec<&Task> {
        self.graph.node_weights().collect()
    }

    /// Check if the plan has no tasks.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Check if the plan contains a task.
    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    /// The declared phases, in order.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// The phase a task was declared in.
    pub fn phase_of(&self, id: &TaskId) -> Option<usize> {
        self.phase_of.get(id).copied()
    }

    /// Task ids in plan order: phases in order, declaration order within
    /// each phase. This is the reporting order for outcomes.
    pub fn ordered_ids(&self) -> Vec<TaskId> {
        self.phases
            .iter()
            .flat_map(|phase| phase.tasks.iter().copied())
            .collect()
    }

    // ========== Scheduling Queries ==========

    /// Index of the first phase containing a non-terminal task, or the
    /// phase count when every task is terminal. The phase gate is open
    /// for a task iff its phase index is <= this value.
    pub fn first_unsettled_phase(&self) -> usize {
        for (index, phase) in self.phases.iter().enumerate() {
            let settled = phase.tasks.iter().all(|id| {
                self.get_task(id)
                    .map(|task| task.is_terminal())
                    .unwrap_or(true)
            });
            if !settled {
                return index;
            }
        }
        self.phases.len()
    }

    /// Check if every task in the plan is terminal.
    pub fn all_terminal(&self) -> bool {
        self.graph.node_weights().all(|task| task.is_terminal())
    }

    /// Number of non-terminal tasks.
    pub fn unfinished_count(&self) -> usize {
        self.graph
            .node_weights()
            .filter(|task| !task.is_terminal())
            .count()
    }

    /// Count terminal outcomes across the plan.
    pub fn counts(&self) -> PlanCounts {
        let mut counts = PlanCounts {
            total: self.task_count(),
            ..Default::default()
        };
        for task in self.graph.node_weights() {
            match &task.status {
                crate::core::task::TaskStatus::Succeeded => counts.succeeded += 1,
                crate::core::task::TaskStatus::Failed { .. } => counts.failed += 1,
                crate::core::task::TaskStatus::Skipped { .. } => counts.skipped += 1,
                _ => {}
            }
        }
        counts
    }

    /// Get tasks in topological order (respecting dependencies).
    ///
    /// # Errors
    /// Returns an error if the graph contains a cycle (should never
    /// happen since add_dependency validates against cycles).
    pub fn topological_order(&self) -> Result<Vec<&Task>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let task_name = self
                .graph
                .node_weight(cycle.node_id())
                .map(|t| t.name.as_str())
                .unwrap_or("unknown");
            Error::Validation(format!("Cycle detected at task: {}", task_name))
        })?;

        Ok(sorted
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index))
            .collect())
    }
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .field("phases", &self.phases.len())
            .finish()
    }
}
