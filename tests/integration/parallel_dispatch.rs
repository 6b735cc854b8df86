//! Wave construction and ordering guarantees.
//!
//! These tests verify that independent tasks genuinely run together,
//! that dependencies and phases gate dispatch, and that scope overlap
//! avoidance serializes tasks at deep effort.

use tandem::core::outcome::OverallStatus;
use tandem::orchestration::EffortLevel;
use tandem::orchestration::Coordinator;
use tempfile::TempDir;

use crate::fixtures::{
    config, registry, rendezvous_script, request, success_script, task, trace_script,
};

/// Test: One wave for independent tasks
/// Given 3 independent tasks with disjoint scopes at deep effort
/// When the request runs
/// Then all 3 workers are in flight at the same time
#[tokio::test]
async fn test_independent_tasks_share_one_wave() {
    let dir = TempDir::new().unwrap();

    // Each worker blocks until all 3 ready markers exist; a serialized
    // dispatch would deadlock the first worker into its loop timeout.
    let caps: Vec<(String, String)> = ["a", "b", "c"]
        .iter()
        .map(|name| {
            (
                format!("cap-{}", name),
                rendezvous_script(dir.path(), name, 3, name),
            )
        })
        .collect();
    let cap_refs: Vec<(&str, &str)> = caps
        .iter()
        .map(|(n, s)| (n.as_str(), s.as_str()))
        .collect();
    let coordinator = Coordinator::new(registry(&cap_refs), config());

    let req = request(
        EffortLevel::Deep,
        vec![
            task("a", "cap-a").with_scope(vec!["src/a.rs".to_string()]),
            task("b", "cap-b").with_scope(vec!["src/b.rs".to_string()]),
            task("c", "cap-c").with_scope(vec!["src/c.rs".to_string()]),
        ],
    );
    let outcome = coordinator.run(&req).await.unwrap();

    assert_eq!(outcome.status, OverallStatus::Succeeded);
    assert_eq!(outcome.succeeded_count(), 3);
}

/// Test: Dependencies gate dispatch
/// Given b depends on a
/// When the request runs
/// Then b's worker starts only after a's has finished
#[tokio::test]
async fn test_dependent_task_waits_for_dependency() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("trace.log");

    let first = trace_script(&log, "a");
    let second = trace_script(&log, "b");
    let coordinator = Coordinator::new(
        registry(&[("first", &first), ("second", &second)]),
        config(),
    );

    let req = request(
        EffortLevel::Deep,
        vec![
            task("a", "first").with_scope(vec!["src/a.rs".to_string()]),
            task("b", "second")
                .with_scope(vec!["src/b.rs".to_string()])
                .with_depends_on(vec!["a".to_string()]),
        ],
    );
    let outcome = coordinator.run(&req).await.unwrap();
    assert_eq!(outcome.status, OverallStatus::Succeeded);

    let trace = std::fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = trace.lines().collect();
    assert_eq!(lines, vec!["start-a", "end-a", "start-b", "end-b"]);
}

/// Test: Scope overlap avoidance serializes at deep effort
/// Given two tasks declaring the same scope at deep effort
/// When the request runs
/// Then their execution windows do not overlap
#[tokio::test]
async fn test_overlapping_scopes_serialized_at_deep() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("trace.log");

    let one = trace_script(&log, "one");
    let two = trace_script(&log, "two");
    let coordinator =
        Coordinator::new(registry(&[("one", &one), ("two", &two)]), config());

    let req = request(
        EffortLevel::Deep,
        vec![
            task("one", "one").with_scope(vec!["src/shared.rs".to_string()]),
            task("two", "two").with_scope(vec!["src/shared.rs".to_string()]),
        ],
    );
    let outcome = coordinator.run(&req).await.unwrap();
    assert_eq!(outcome.succeeded_count(), 2);

    // Every start must be directly followed by its own end.
    let trace = std::fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = trace.lines().collect();
    assert_eq!(lines.len(), 4);
    for pair in lines.chunks(2) {
        let name = pair[0].strip_prefix("start-").unwrap();
        assert_eq!(pair[1], format!("end-{}", name));
    }
}

/// Test: Phases execute in declaration order
/// Given tasks split across two phases with no explicit dependencies
/// When the request runs
/// Then no second-phase worker starts before the first phase settles
#[tokio::test]
async fn test_phase_gating_orders_execution() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("trace.log");

    let build = trace_script(&log, "build");
    let verify = trace_script(&log, "verify");
    let coordinator = Coordinator::new(
        registry(&[("build", &build), ("verify", &verify)]),
        config(),
    );

    let req = request(
        EffortLevel::Light,
        vec![
            task("compile", "build").in_phase("build"),
            task("check", "verify").in_phase("verify"),
        ],
    );
    let outcome = coordinator.run(&req).await.unwrap();
    assert_eq!(outcome.status, OverallStatus::Succeeded);

    let trace = std::fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = trace.lines().collect();
    assert_eq!(lines, vec!["start-build", "end-build", "start-verify", "end-verify"]);
}

/// Test: Follow-up tasks run after the batch that raised them
/// Given a worker that raises a follow-up task in its report
/// When the request runs
/// Then the follow-up executes and lands in the outcome
#[tokio::test]
async fn test_follow_up_joins_the_plan() {
    let spawner = crate::fixtures::follow_up_script(
        "seeded",
        serde_json::json!([
            { "name": "cleanup", "description": "tidy up", "capability": "implement" }
        ]),
    );
    let implement = success_script("cleaned", &[]);
    let coordinator = Coordinator::new(
        registry(&[("spawner", &spawner), ("implement", &implement)]),
        config(),
    );

    let req = request(EffortLevel::Light, vec![task("seed", "spawner")]);
    let outcome = coordinator.run(&req).await.unwrap();

    assert_eq!(outcome.status, OverallStatus::Succeeded);
    assert_eq!(outcome.reports.len(), 2);
    assert!(outcome.artifact.contains("cleaned"));
}
