//! Full request-to-outcome execution tests.
//!
//! These tests run the coordinator end to end across the effort
//! levels, from bare descriptions up to multi-phase request files.

use tandem::audit::AuditRecord;
use tandem::audit::AuditSink;
use tandem::core::outcome::OverallStatus;
use tandem::error::Error;
use tandem::orchestration::{Coordinator, EffortLevel, Request};
use tempfile::TempDir;

use crate::fixtures::{config, fail_script, registry, request, success_script, task};

/// Test: Bare description request
/// Given a request carrying only a description
/// When it runs
/// Then one synthesized task executes under the default capability
#[tokio::test]
async fn test_bare_description_runs_single_task() {
    let script = success_script("work done", &[]);
    let coordinator = Coordinator::new(registry(&[("implement", &script)]), config());

    let request = Request::from_description("Add a validation helper to the config loader");
    let outcome = coordinator.run(&request).await.unwrap();

    assert_eq!(outcome.status, OverallStatus::Succeeded);
    assert_eq!(outcome.reports.len(), 1);
    assert_eq!(outcome.reports[0].name, "request");
    assert!(outcome.artifact.contains("work done"));
}

/// Test: Instant passthrough
/// Given a single quick-fix task classified as instant effort
/// When it runs
/// Then the worker's artifact is returned unwrapped, with no synthesis
#[tokio::test]
async fn test_instant_request_passes_artifact_through() {
    let script = success_script("fixed the typo", &[]);
    let coordinator = Coordinator::new(registry(&[("implement", &script)]), config());

    let request = Request::from_description("Fix the typo in the greeting string");
    let outcome = coordinator.run(&request).await.unwrap();

    assert_eq!(outcome.status, OverallStatus::Succeeded);
    // No section header wrapping: the result is the artifact itself.
    assert_eq!(outcome.artifact, "fixed the typo");
    assert!(outcome.conflicts.is_empty());
}

/// Test: Request TOML file end to end
/// Given a request file declaring tasks, phases, and dependencies
/// When it runs
/// Then all tasks complete and the artifact folds in plan order
#[tokio::test]
async fn test_request_file_multi_phase() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("request.toml");
    std::fs::write(
        &path,
        r#"
description = "Ship the feature"
effort = "light"

[[tasks]]
name = "schema"
description = "Add the tables"
capability = "implement"
phase = "build"

[[tasks]]
name = "api"
description = "Expose the endpoints"
capability = "implement"
depends_on = ["schema"]
phase = "build"

[[tasks]]
name = "verify"
description = "Check the result"
capability = "implement"
phase = "verify"
"#,
    )
    .unwrap();

    let script = success_script("done", &[]);
    let coordinator = Coordinator::new(registry(&[("implement", &script)]), config());

    let request = Request::load(&path).unwrap();
    let outcome = coordinator.run(&request).await.unwrap();

    assert_eq!(outcome.status, OverallStatus::Succeeded);
    let names: Vec<&str> = outcome.reports.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["schema", "api", "verify"]);

    let schema_at = outcome.artifact.find("## schema").unwrap();
    let verify_at = outcome.artifact.find("## verify").unwrap();
    assert!(schema_at < verify_at);
}

/// Test: Unknown capability is fatal
/// Given a request naming a capability the registry does not serve
/// When it runs
/// Then the request fails before anything dispatches
#[tokio::test]
async fn test_unknown_capability_is_fatal() {
    let script = success_script("ok", &[]);
    let coordinator = Coordinator::new(registry(&[("implement", &script)]), config());

    let req = request(EffortLevel::Light, vec![task("t", "terraform")]);
    let result = coordinator.run(&req).await;

    match result {
        Err(Error::UnknownCapability { name }) => assert_eq!(name, "terraform"),
        other => panic!("expected UnknownCapability, got {:?}", other),
    }
}

/// Test: A plan that can never progress errors out
/// Given an early-phase task depending on a later-phase task
/// When the request runs
/// Then the engine reports a stalled plan instead of spinning
#[tokio::test]
async fn test_forward_phase_dependency_stalls_plan() {
    let script = success_script("unreached", &[]);
    let coordinator = Coordinator::new(registry(&[("implement", &script)]), config());

    // "early" waits on "late", but "late" sits behind the phase gate
    // that "early" holds open. Neither can ever become ready.
    let req = request(
        EffortLevel::Light,
        vec![
            task("early", "implement")
                .in_phase("one")
                .with_depends_on(vec!["late".to_string()]),
            task("late", "implement").in_phase("two"),
        ],
    );
    let result = coordinator.run(&req).await;

    match result {
        Err(Error::Validation(msg)) => assert!(msg.contains("Plan stalled")),
        other => panic!("expected stalled-plan error, got {:?}", other),
    }
}

/// Test: Protected scopes are rejected before dispatch
/// Given a request task declaring a lock file as its scope
/// When the request runs
/// Then plan building fails and no worker launches
#[tokio::test]
async fn test_protected_scope_rejected_before_dispatch() {
    let script = success_script("unreached", &[]);
    let coordinator = Coordinator::new(registry(&[("implement", &script)]), config());

    let req = request(
        EffortLevel::Light,
        vec![task("lockfile", "implement").with_scope(vec!["Cargo.lock".to_string()])],
    );
    let result = coordinator.run(&req).await;

    match result {
        Err(Error::Validation(msg)) => {
            assert!(msg.contains("protected"));
            assert!(msg.contains("Cargo.lock"));
        }
        other => panic!("expected protected-scope rejection, got {:?}", other),
    }
}

/// Test: All tasks failing yields a failed outcome
/// Given a request whose every task fails
/// When it runs
/// Then the overall status is failed, not partial
#[tokio::test]
async fn test_all_failures_yield_failed_status() {
    let script = fail_script();
    let coordinator = Coordinator::new(registry(&[("implement", &script)]), config());

    let req = request(
        EffortLevel::Light,
        vec![task("a", "implement"), task("b", "implement")],
    );
    let outcome = coordinator.run(&req).await.unwrap();

    assert_eq!(outcome.status, OverallStatus::Failed);
    assert_eq!(outcome.failed_count(), 2);
    assert!(outcome.artifact.is_empty());
}

/// Test: Audit trail
/// Given a coordinator with an audit sink attached
/// When two requests run
/// Then the audit file holds one JSON line per request
#[tokio::test]
async fn test_audit_records_one_line_per_request() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("audit.jsonl");

    let script = success_script("ok", &[]);
    let coordinator = Coordinator::new(registry(&[("implement", &script)]), config())
        .with_audit(AuditSink::open(&path));

    for name in ["first", "second"] {
        let req = request(EffortLevel::Light, vec![task(name, "implement")]);
        coordinator.run(&req).await.unwrap();
    }
    coordinator.close();

    let content = std::fs::read_to_string(&path).unwrap();
    let records: Vec<AuditRecord> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.status, OverallStatus::Succeeded);
        assert_eq!(record.tasks_total, 1);
        assert_eq!(record.tasks_succeeded, 1);
    }
}

/// Test: Outcome serializes to JSON
/// Given a completed request
/// When the outcome is serialized
/// Then it round-trips through serde_json
#[tokio::test]
async fn test_outcome_round_trips_as_json() {
    let script = success_script("ok", &["src/a.rs"]);
    let coordinator = Coordinator::new(registry(&[("implement", &script)]), config());

    let req = request(EffortLevel::Light, vec![task("t", "implement")]);
    let outcome = coordinator.run(&req).await.unwrap();

    let json = serde_json::to_string_pretty(&outcome).unwrap();
    let parsed: tandem::core::outcome::FinalOutcome = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, outcome);
}
