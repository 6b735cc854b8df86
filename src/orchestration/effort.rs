//! Effort classification for incoming requests.
//!
//! Each request is classified once, before planning, into an
//! [`EffortLevel`] that parameterizes the rest of the engine: dispatch
//! width, scope-overlap avoidance, retries, and whether synthesis runs
//! a self-review pass. Classification is a pure function of the request
//! shape and never fails.
//!
//! ## Signals
//!
//! - **Cross-cutting language** ("redesign", "migration", "across all
//!   modules") pushes a request to `Exhaustive`.
//! - **Quick-fix language** ("typo", "rename", "hotfix") on a single
//!   small task drops it to `Instant`.
//! - Otherwise task and scope counts decide between `Light` and `Deep`.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::orchestration::planner::Request;

/// Task count at which a request is treated as `Deep`.
const DEEP_TASK_THRESHOLD: usize = 4;

/// Distinct scope count at which a request is treated as `Deep`.
const DEEP_SCOPE_THRESHOLD: usize = 6;

/// Language indicating architecture-level or cross-cutting change.
static CROSS_CUTTING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(architectur\w*|redesign\w*|restructur\w*|overhaul\w*|rewrit\w*|migrat\w*|cross-cutting|end-to-end|every module|all modules|security audit)\b",
    )
    .unwrap()
});

/// Language indicating a single obvious fix.
static QUICK_FIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(typo|rename|bump|hotfix|trivial|one-liner?|single line|quick fix)\b")
        .unwrap()
});

/// How much parallelism and verification a request deserves.
///
/// Chosen once per request and immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffortLevel {
    /// One obvious fix: one task at a time, synthesis bypassed.
    Instant,
    /// Small request: narrow dispatch, no retries.
    Light,
    /// Substantial request: full-width dispatch, overlap avoidance,
    /// one retry for failed tasks.
    Deep,
    /// Everything `Deep` does plus a mandatory self-review pass after
    /// the final batch.
    Exhaustive,
}

/// Engine parameters derived from an effort level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffortParams {
    /// Maximum tasks dispatched concurrently.
    pub max_concurrent: usize,
    /// Hold back ready tasks whose scope overlaps an in-flight task.
    pub avoid_overlap: bool,
    /// Re-dispatch a failed task once with a fresh worker.
    pub retry_failed: bool,
    /// Run the synthesis self-review pass after the final batch.
    pub self_review: bool,
    /// Skip synthesis and pass the single result through unchanged.
    pub bypass_synthesis: bool,
}

impl EffortLevel {
    /// The parameters this level imposes on the engine.
    pub fn params(&self) -> EffortParams {
        match self {
            Self::Instant => EffortParams {
                max_concurrent: 1,
                avoid_overlap: false,
                retry_failed: false,
                self_review: false,
                bypass_synthesis: true,
            },
            Self::Light => EffortParams {
                max_concurrent: 2,
                avoid_overlap: false,
                retry_failed: false,
                self_review: false,
                bypass_synthesis: false,
            },
            Self::Deep => EffortParams {
                max_concurrent: usize::MAX,
                avoid_overlap: true,
                retry_failed: true,
                self_review: false,
                bypass_synthesis: false,
            },
            Self::Exhaustive => EffortParams {
                max_concurrent: usize::MAX,
                avoid_overlap: true,
                retry_failed: true,
                self_review: true,
                bypass_synthesis: false,
            },
        }
    }
}

impl std::fmt::Display for EffortLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instant => write!(f, "instant"),
            Self::Light => write!(f, "light"),
            Self::Deep => write!(f, "deep"),
            Self::Exhaustive => write!(f, "exhaustive"),
        }
    }
}

impl std::str::FromStr for EffortLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "instant" => Ok(Self::Instant),
            "light" => Ok(Self::Light),
            "deep" => Ok(Self::Deep),
            "exhaustive" => Ok(Self::Exhaustive),
            other => Err(format!(
                "unknown effort level {:?} (expected instant, light, deep, or exhaustive)",
                other
            )),
        }
    }
}

/// Classify a request into an effort level.
///
/// Deterministic and total: the same request always classifies the same
/// way, and no request shape fails to classify. An explicit level on
/// the request wins over classification.
pub fn classify(request: &Request) -> EffortLevel {
    if let Some(level) = request.effort {
        return level;
    }

    let text = request.description.to_lowercase();
    if CROSS_CUTTING_RE.is_match(&text) {
        return EffortLevel::Exhaustive;
    }

    let task_count = request.tasks.len();
    let scope_count = distinct_scope_count(request);

    if task_count <= 1 && scope_count <= 1 && QUICK_FIX_RE.is_match(&text) {
        return EffortLevel::Instant;
    }

    if task_count >= DEEP_TASK_THRESHOLD || scope_count >= DEEP_SCOPE_THRESHOLD {
        return EffortLevel::Deep;
    }

    EffortLevel::Light
}

// ============== Internal Helper Functions ==============

/// Count distinct scope identifiers across all tasks.
fn distinct_scope_count(request: &Request) -> usize {
    let mut scopes: Vec<&str> = request
        .tasks
        .iter()
        .flat_map(|t| t.scope.iter().map(|s| s.as_str()))
        .collect();
    scopes.sort_unstable();
    scopes.dedup();
    scopes.len()
}
