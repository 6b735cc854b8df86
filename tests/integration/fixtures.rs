//! Test fixtures for integration tests.
//!
//! Workers are `sh -c` scripts that read the invocation JSON from
//! stdin and print a report JSON to stdout, matching the command
//! worker protocol. Helpers here build those scripts, the registries
//! that serve them, and small request shapes.

use std::path::Path;

use tandem::config::Config;
use tandem::core::task::TaskSpec;
use tandem::orchestration::{EffortLevel, Request};
use tandem::registry::{CapabilityRegistry, CapabilitySpec, ContextBundle, WorkerKind};

/// A report JSON body for a succeeded attempt.
pub fn success_json(artifact: &str, touched: &[&str]) -> String {
    serde_json::json!({
        "status": { "state": "succeeded" },
        "artifact": artifact,
        "touched": touched,
    })
    .to_string()
}

/// Script that succeeds immediately with the given report.
pub fn success_script(artifact: &str, touched: &[&str]) -> String {
    format!(
        "cat >/dev/null; printf '%s' '{}'",
        success_json(artifact, touched)
    )
}

/// Script that fails with a non-zero exit and stderr noise.
pub fn fail_script() -> String {
    "cat >/dev/null; echo boom >&2; exit 7".to_string()
}

/// Script that never finishes within any sane test timeout.
pub fn slow_script() -> String {
    "cat >/dev/null; sleep 60".to_string()
}

/// Script that fails on the first run and succeeds once `marker` exists.
pub fn fail_once_script(marker: &Path, artifact: &str) -> String {
    format!(
        "cat >/dev/null; if [ -f {m} ]; then printf '%s' '{json}'; \
         else touch {m}; echo first-attempt >&2; exit 7; fi",
        m = marker.display(),
        json = success_json(artifact, &[])
    )
}

/// Script that succeeds with follow-up task specs attached.
pub fn follow_up_script(artifact: &str, follow_ups: serde_json::Value) -> String {
    let json = serde_json::json!({
        "status": { "state": "succeeded" },
        "artifact": artifact,
        "touched": [],
        "follow_ups": follow_ups,
    });
    format!("cat >/dev/null; printf '%s' '{}'", json)
}

/// Script that drops a ready marker, then waits until `expected` markers
/// exist in `dir` before succeeding. Proves the whole wave was in
/// flight at once; a serialized dispatch times the loop out instead.
pub fn rendezvous_script(dir: &Path, name: &str, expected: usize, artifact: &str) -> String {
    format!(
        "cat >/dev/null; touch {dir}/{name}.ready; i=0; \
         while [ \"$(ls {dir}/*.ready 2>/dev/null | wc -l)\" -lt {expected} ]; do \
         i=$((i+1)); [ \"$i\" -gt 100 ] && exit 1; sleep 0.1; done; \
         printf '%s' '{json}'",
        dir = dir.display(),
        name = name,
        expected = expected,
        json = success_json(artifact, &[])
    )
}

/// Script that appends start/end lines around a short sleep, so a test
/// can reconstruct whether two tasks overlapped in time.
pub fn trace_script(log: &Path, name: &str) -> String {
    format!(
        "cat >/dev/null; echo start-{name} >> {log}; sleep 0.3; \
         echo end-{name} >> {log}; printf '%s' '{json}'",
        log = log.display(),
        name = name,
        json = success_json(name, &[])
    )
}

/// Wrap a script in a command capability spec.
pub fn capability(script: &str) -> CapabilitySpec {
    CapabilitySpec::new(
        "test capability",
        ContextBundle::of(&["scope_files"]),
        WorkerKind::Command {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        },
    )
}

/// Build a registry serving one script per capability name.
pub fn registry(capabilities: &[(&str, &str)]) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::empty();
    for (name, script) in capabilities {
        registry.insert(name, capability(script));
    }
    registry
}

/// Engine config with a short per-task timeout, suitable for tests.
pub fn config() -> Config {
    Config {
        timeout_secs: 30,
        audit_enabled: false,
        ..Default::default()
    }
}

/// A task spec with a generated description.
pub fn task(name: &str, capability: &str) -> TaskSpec {
    TaskSpec::new(name, &format!("{} task", name), capability)
}

/// A request with an explicit effort level.
pub fn request(effort: EffortLevel, tasks: Vec<TaskSpec>) -> Request {
    Request {
        description: "integration test request".to_string(),
        effort: Some(effort),
        tasks,
    }
}
