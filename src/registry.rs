//! Capability registry mapping capability names to worker requirements.
//!
//! The registry is loaded once at process start: builtin capabilities
//! first, then an optional `registry.toml` overlay that can override
//! builtins or add new entries. Plan building resolves every task's
//! capability against the registry and rejects unknown names before
//! anything is dispatched.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tlog_debug;

/// Named context pieces a worker needs assembled before invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextBundle(pub Vec<String>);

impl ContextBundle {
    /// Build a bundle from piece names.
    pub fn of(pieces: &[&str]) -> Self {
        Self(pieces.iter().map(|p| p.to_string()).collect())
    }

    pub fn contains(&self, piece: &str) -> bool {
        self.0.iter().any(|p| p == piece)
    }

    pub fn pieces(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What kind of worker serves a capability.
///
/// A tagged value rather than a trait object: the dispatcher matches on
/// the kind when it constructs the worker for an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WorkerKind {
    /// Spawn an external command for each invocation.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl WorkerKind {
    /// Create a command kind with no extra arguments.
    pub fn command(program: &str) -> Self {
        Self::Command {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    /// The program this kind launches.
    pub fn program(&self) -> &str {
        match self {
            Self::Command { program, .. } => program,
        }
    }
}

/// Registry entry for one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    /// Short human-readable description for listings.
    #[serde(default)]
    pub description: String,
    /// Context pieces the worker needs.
    #[serde(default)]
    pub context: ContextBundle,
    /// Worker kind that serves this capability.
    pub worker: WorkerKind,
}

impl CapabilitySpec {
    pub fn new(description: &str, context: ContextBundle, worker: WorkerKind) -> Self {
        Self {
            description: description.to_string(),
            context,
            worker,
        }
    }
}

/// On-disk shape of `registry.toml`.
#[derive(Debug, Default, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    capabilities: HashMap<String, RegistryEntry>,
}

/// One `[capabilities.<name>]` table. The worker kind is optional and
/// falls back to the configured worker command.
#[derive(Debug, Deserialize)]
struct RegistryEntry {
    #[serde(default)]
    description: String,
    #[serde(default)]
    context: ContextBundle,
    worker: Option<WorkerKind>,
}

/// Mapping from capability name to the spec that serves it.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, CapabilitySpec>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn empty() -> Self {
        Self {
            capabilities: HashMap::new(),
        }
    }

    /// Create the builtin registry, with every capability served by the
    /// given worker command.
    pub fn builtin(worker_command: &str) -> Self {
        let worker = || WorkerKind::command(worker_command);
        let mut capabilities = HashMap::new();

        capabilities.insert(
            "implement".to_string(),
            CapabilitySpec::new(
                "Write or modify code within the task scope",
                ContextBundle::of(&["scope_files", "dependency_artifacts", "conventions"]),
                worker(),
            ),
        );
        capabilities.insert(
            "analyze".to_string(),
            CapabilitySpec::new(
                "Report on structure and behaviour without modifying anything",
                ContextBundle::of(&["scope_files", "repo_tree"]),
                worker(),
            ),
        );
        capabilities.insert(
            "review".to_string(),
            CapabilitySpec::new(
                "Critique finished work and raise follow-up tasks",
                ContextBundle::of(&["scope_files", "diff", "conventions"]),
                worker(),
            ),
        );
        capabilities.insert(
            "test-design".to_string(),
            CapabilitySpec::new(
                "Design test cases covering the task scope",
                ContextBundle::of(&["scope_files", "dependency_artifacts"]),
                worker(),
            ),
        );
        capabilities.insert(
            "security-scan".to_string(),
            CapabilitySpec::new(
                "Scan the scope for secrets and insecure patterns",
                ContextBundle::of(&["scope_files", "secret_patterns"]),
                worker(),
            ),
        );
        capabilities.insert(
            "doc-update".to_string(),
            CapabilitySpec::new(
                "Refresh documentation affected by recent changes",
                ContextBundle::of(&["scope_files", "doc_index", "diff"]),
                worker(),
            ),
        );

        Self { capabilities }
    }

    /// Load the registry: builtins plus an optional overlay file.
    ///
    /// Overlay entries replace builtins with the same name. An overlay
    /// entry without a `worker` table is served by `worker_command`.
    pub fn load(path: &Path, worker_command: &str) -> Result<Self> {
        let mut registry = Self::builtin(worker_command);

        if !path.exists() {
            return Ok(registry);
        }

        let content = std::fs::read_to_string(path)?;
        let file: RegistryFile = toml::from_str(&content)?;
        for (name, entry) in file.capabilities {
            let worker = entry
                .worker
                .unwrap_or_else(|| WorkerKind::command(worker_command));
            tlog_debug!("[registry] Overlay capability: {}", name);
            registry.capabilities.insert(
                name,
                CapabilitySpec {
                    description: entry.description,
                    context: entry.context,
                    worker,
                },
            );
        }

        Ok(registry)
    }

    /// Resolve a capability name to its spec.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownCapability` if the name is not registered.
    pub fn resolve(&self, name: &str) -> Result<&CapabilitySpec> {
        self.capabilities
            .get(name)
            .ok_or_else(|| Error::UnknownCapability {
                name: name.to_string(),
            })
    }

    /// Check whether a capability is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Register or replace a capability.
    pub fn insert(&mut self, name: &str, spec: CapabilitySpec) {
        self.capabilities.insert(name.to_string(), spec);
    }

    /// All registered names, sorted for stable listings.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.capabilities.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}
