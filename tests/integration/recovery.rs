//! Timeouts, retries, skip cascades, and cancellation.

use std::time::Duration;

use tandem::config::Config;
use tandem::core::outcome::OverallStatus;
use tandem::core::task::{FailureKind, TaskStatus};
use tandem::error::Error;
use tandem::orchestration::{Coordinator, EffortLevel};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::fixtures::{
    config, fail_once_script, fail_script, follow_up_script, registry, request, slow_script,
    success_script, task,
};

/// Test: Timeout fails the task, not the batch
/// Given a slow task and a fast task in one wave
/// When the slow task exceeds the per-task timeout
/// Then it fails with a timeout kind while the fast task succeeds
#[tokio::test]
async fn test_timeout_fails_task_while_batch_completes() {
    let slow = slow_script();
    let fast = success_script("quick", &[]);
    let short_timeout = Config {
        timeout_secs: 1,
        ..config()
    };
    let coordinator = Coordinator::new(
        registry(&[("slow", &slow), ("fast", &fast)]),
        short_timeout,
    );

    let req = request(
        EffortLevel::Light,
        vec![task("sluggish", "slow"), task("zippy", "fast")],
    );
    let outcome = coordinator.run(&req).await.unwrap();

    assert_eq!(outcome.status, OverallStatus::PartiallyFailed);
    let sluggish = outcome
        .reports
        .iter()
        .find(|r| r.name == "sluggish")
        .unwrap();
    match &sluggish.status {
        TaskStatus::Failed { kind, .. } => assert_eq!(*kind, FailureKind::Timeout),
        other => panic!("expected timeout failure, got {:?}", other),
    }
    let zippy = outcome.reports.iter().find(|r| r.name == "zippy").unwrap();
    assert_eq!(zippy.status, TaskStatus::Succeeded);
}

/// Test: Retry recovers a flaky task at deep effort
/// Given a worker that fails its first attempt and succeeds after
/// When the request runs at deep effort
/// Then the task ends succeeded with the second attempt's artifact
#[tokio::test]
async fn test_deep_effort_retries_flaky_task() {
    let dir = TempDir::new().unwrap();
    let script = fail_once_script(&dir.path().join("tried"), "second try");
    let coordinator = Coordinator::new(registry(&[("implement", &script)]), config());

    let req = request(
        EffortLevel::Deep,
        vec![task("flaky", "implement").with_scope(vec!["src/a.rs".to_string()])],
    );
    let outcome = coordinator.run(&req).await.unwrap();

    assert_eq!(outcome.status, OverallStatus::Succeeded);
    assert!(outcome.artifact.contains("second try"));
}

/// Test: Retry budget is bounded
/// Given a worker that always fails at deep effort
/// When the request runs
/// Then the task fails after its retry instead of looping forever
#[tokio::test]
async fn test_persistent_failure_exhausts_retry_budget() {
    let script = fail_script();
    let coordinator = Coordinator::new(registry(&[("implement", &script)]), config());

    let req = request(EffortLevel::Deep, vec![task("doomed", "implement")]);
    let outcome = coordinator.run(&req).await.unwrap();

    assert_eq!(outcome.status, OverallStatus::Failed);
    match &outcome.reports[0].status {
        TaskStatus::Failed { kind, error } => {
            assert_eq!(*kind, FailureKind::Execution);
            assert!(error.contains("boom"));
        }
        other => panic!("expected failed, got {:?}", other),
    }
}

/// Test: Light effort never retries
/// Given a worker that would succeed on a second attempt
/// When the request runs at light effort
/// Then the first failure is final
#[tokio::test]
async fn test_light_effort_does_not_retry() {
    let dir = TempDir::new().unwrap();
    let script = fail_once_script(&dir.path().join("tried"), "unreached");
    let coordinator = Coordinator::new(registry(&[("implement", &script)]), config());

    let req = request(EffortLevel::Light, vec![task("flaky", "implement")]);
    let outcome = coordinator.run(&req).await.unwrap();

    assert_eq!(outcome.status, OverallStatus::Failed);
}

/// Test: Failure cascades to dependents as skips
/// Given a dependency chain a -> b -> c where a fails
/// When the request runs
/// Then b and c are skipped with reasons while independent work proceeds
#[tokio::test]
async fn test_failure_skips_transitive_dependents() {
    let bad = fail_script();
    let good = success_script("fine", &[]);
    let coordinator = Coordinator::new(registry(&[("bad", &bad), ("good", &good)]), config());

    let req = request(
        EffortLevel::Light,
        vec![
            task("a", "bad"),
            task("b", "good").with_depends_on(vec!["a".to_string()]),
            task("c", "good").with_depends_on(vec!["b".to_string()]),
            task("standalone", "good"),
        ],
    );
    let outcome = coordinator.run(&req).await.unwrap();

    assert_eq!(outcome.status, OverallStatus::PartiallyFailed);
    assert_eq!(outcome.failed_count(), 1);
    assert_eq!(outcome.skipped_count(), 2);
    assert_eq!(outcome.succeeded_count(), 1);

    let b = outcome.reports.iter().find(|r| r.name == "b").unwrap();
    match &b.status {
        TaskStatus::Skipped { reason } => assert!(reason.contains("'a' failed")),
        other => panic!("expected skipped, got {:?}", other),
    }
    let c = outcome.reports.iter().find(|r| r.name == "c").unwrap();
    match &c.status {
        TaskStatus::Skipped { reason } => assert!(reason.contains("'b'")),
        other => panic!("expected skipped, got {:?}", other),
    }
}

/// Test: Cancellation interrupts a running request
/// Given a request blocked on a slow worker
/// When the cancellation token fires
/// Then the request returns cancelled promptly
#[tokio::test]
async fn test_cancellation_interrupts_request() {
    let slow = slow_script();
    let cancel = CancellationToken::new();
    let coordinator = Coordinator::new(registry(&[("implement", &slow)]), config())
        .with_cancellation(cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let req = request(EffortLevel::Light, vec![task("stuck", "implement")]);
    let started = std::time::Instant::now();
    let result = coordinator.run(&req).await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(10));
}

/// Test: A bad follow-up batch does not sink the request
/// Given a worker raising follow-ups that depend on each other
/// When the request runs
/// Then the batch is rejected and the request still completes
#[tokio::test]
async fn test_cyclic_follow_ups_rejected_request_completes() {
    let spawner = follow_up_script(
        "seeded",
        serde_json::json!([
            { "name": "x", "description": "x", "capability": "spawnless", "depends_on": ["y"] },
            { "name": "y", "description": "y", "capability": "spawnless", "depends_on": ["x"] }
        ]),
    );
    let plain = success_script("unused", &[]);
    let coordinator = Coordinator::new(
        registry(&[("spawner", &spawner), ("spawnless", &plain)]),
        config(),
    );

    let req = request(EffortLevel::Light, vec![task("seed", "spawner")]);
    let outcome = coordinator.run(&req).await.unwrap();

    assert_eq!(outcome.status, OverallStatus::Succeeded);
    assert_eq!(outcome.reports.len(), 1);
    assert_eq!(outcome.reports[0].name, "seed");
}
