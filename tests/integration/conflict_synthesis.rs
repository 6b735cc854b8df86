//! Scope conflict detection and result folding.
//!
//! Conflicts only arise between tasks that succeeded in the same
//! batch, so these tests pick effort levels and declared scopes that
//! keep the colliding tasks in one wave.

use tandem::core::outcome::OverallStatus;
use tandem::orchestration::{Coordinator, EffortLevel};

use crate::fixtures::{config, registry, request, success_script, task};

/// Test: Overlapping touched scopes flag a conflict
/// Given two same-batch tasks with disjoint declared scopes that both
/// report touching the same file
/// When the request runs
/// Then exactly one conflict names both tasks and the shared scope
#[tokio::test]
async fn test_touched_overlap_produces_one_conflict() {
    let script = success_script("changed it", &["src/shared.rs"]);
    let coordinator = Coordinator::new(registry(&[("implement", &script)]), config());

    let req = request(
        EffortLevel::Deep,
        vec![
            task("a", "implement").with_scope(vec!["src/a.rs".to_string()]),
            task("b", "implement").with_scope(vec!["src/b.rs".to_string()]),
        ],
    );
    let outcome = coordinator.run(&req).await.unwrap();

    assert_eq!(outcome.status, OverallStatus::Succeeded);
    assert_eq!(outcome.conflicts.len(), 1);

    let conflict = &outcome.conflicts[0];
    assert_eq!(conflict.scopes, vec!["src/shared.rs".to_string()]);
    let a = outcome.reports.iter().find(|r| r.name == "a").unwrap();
    let b = outcome.reports.iter().find(|r| r.name == "b").unwrap();
    assert!(conflict.involves(&a.id));
    assert!(conflict.involves(&b.id));
    // Equal declared widths: flagged, not silently resolved.
    assert!(conflict.is_unresolved());
}

/// Test: Narrower declared scope wins
/// Given two conflicting tasks where one declared strictly less scope
/// When the request runs
/// Then the conflict resolves in favor of the narrower task
#[tokio::test]
async fn test_narrower_task_wins_resolution() {
    let script = success_script("edited", &["src/shared.rs"]);
    let coordinator = Coordinator::new(registry(&[("implement", &script)]), config());

    // Light effort: no overlap avoidance, so both land in one wave.
    let req = request(
        EffortLevel::Light,
        vec![
            task("narrow", "implement").with_scope(vec!["src/shared.rs".to_string()]),
            task("wide", "implement").with_scope(vec![
                "src/shared.rs".to_string(),
                "src/other.rs".to_string(),
            ]),
        ],
    );
    let outcome = coordinator.run(&req).await.unwrap();

    assert_eq!(outcome.conflicts.len(), 1);
    let narrow = outcome.reports.iter().find(|r| r.name == "narrow").unwrap();
    assert_eq!(outcome.conflicts[0].resolution.winner(), Some(narrow.id));
    assert!(!outcome.conflicts[0].is_unresolved());
}

/// Test: Conflicting artifacts both survive
/// Given a flagged conflict between two succeeded tasks
/// When the outcome folds
/// Then both artifacts appear, plus an unresolved-conflicts section
#[tokio::test]
async fn test_conflicting_artifacts_never_dropped() {
    let touch_a = success_script("version from a", &["src/shared.rs"]);
    let touch_b = success_script("version from b", &["src/shared.rs"]);
    let coordinator = Coordinator::new(
        registry(&[("cap-a", &touch_a), ("cap-b", &touch_b)]),
        config(),
    );

    let req = request(
        EffortLevel::Light,
        vec![
            task("a", "cap-a").with_scope(vec!["src/x.rs".to_string()]),
            task("b", "cap-b").with_scope(vec!["src/y.rs".to_string()]),
        ],
    );
    let outcome = coordinator.run(&req).await.unwrap();

    assert!(outcome.artifact.contains("version from a"));
    assert!(outcome.artifact.contains("version from b"));
    assert!(outcome.artifact.contains("Unresolved conflicts"));
    assert!(outcome.artifact.contains("src/shared.rs"));
}

/// Test: Disjoint work has no conflicts
/// Given tasks touching entirely different files
/// When the request runs
/// Then the outcome carries no conflicts and no conflict section
#[tokio::test]
async fn test_disjoint_scopes_have_no_conflicts() {
    let touch_a = success_script("a", &["src/a.rs"]);
    let touch_b = success_script("b", &["src/b.rs"]);
    let coordinator = Coordinator::new(
        registry(&[("cap-a", &touch_a), ("cap-b", &touch_b)]),
        config(),
    );

    let req = request(
        EffortLevel::Light,
        vec![task("a", "cap-a"), task("b", "cap-b")],
    );
    let outcome = coordinator.run(&req).await.unwrap();

    assert!(outcome.conflicts.is_empty());
    assert!(!outcome.artifact.contains("Unresolved conflicts"));
}

/// Test: Exhaustive effort reviews contested scopes
/// Given a flagged conflict at exhaustive effort
/// When the plan first settles
/// Then one self-review task runs over the contested scope
#[tokio::test]
async fn test_exhaustive_adds_self_review_round() {
    let toucher = success_script("done", &["src/shared.rs"]);
    let reviewer = success_script("looks consistent", &[]);
    let coordinator = Coordinator::new(
        registry(&[("implement", &toucher), ("review", &reviewer)]),
        config(),
    );

    let req = request(
        EffortLevel::Exhaustive,
        vec![
            task("a", "implement").with_scope(vec!["src/a.rs".to_string()]),
            task("b", "implement").with_scope(vec!["src/b.rs".to_string()]),
        ],
    );
    let outcome = coordinator.run(&req).await.unwrap();

    let review = outcome
        .reports
        .iter()
        .find(|r| r.name == "self-review")
        .expect("self-review should have been scheduled");
    assert_eq!(review.artifact.as_deref(), Some("looks consistent"));
    assert_eq!(outcome.status, OverallStatus::Succeeded);
}

/// Test: Exhaustive effort skips review when nothing is contested
/// Given disjoint tasks at exhaustive effort
/// When the plan settles
/// Then no self-review task is added
#[tokio::test]
async fn test_exhaustive_skips_review_without_contention() {
    let touch_a = success_script("a", &["src/a.rs"]);
    let touch_b = success_script("b", &["src/b.rs"]);
    let reviewer = success_script("unused", &[]);
    let coordinator = Coordinator::new(
        registry(&[("cap-a", &touch_a), ("cap-b", &touch_b), ("review", &reviewer)]),
        config(),
    );

    let req = request(
        EffortLevel::Exhaustive,
        vec![
            task("a", "cap-a").with_scope(vec!["src/a.rs".to_string()]),
            task("b", "cap-b").with_scope(vec!["src/b.rs".to_string()]),
        ],
    );
    let outcome = coordinator.run(&req).await.unwrap();

    assert_eq!(outcome.reports.len(), 2);
    assert!(!outcome.reports.iter().any(|r| r.name == "self-review"));
}
