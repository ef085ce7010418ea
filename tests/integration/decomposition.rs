//! Decomposition integration tests.
//!
//! These tests verify that a raw request document is validated, created
//! in dependency order and split into execution layers.

use std::collections::HashMap;

use serde_json::json;
use taskloom::config::SchedulerConfig;
use taskloom::core::TaskId;
use taskloom::decompose::{build_layers, IssueKind, Severity};
use taskloom::orchestration::MemoryTaskStore;
use taskloom::Error;

use crate::fixtures::{id_of, request, request_with_groups, task, task_of, workers, Harness};

fn harness() -> Harness {
    Harness::new(workers(2), SchedulerConfig::default())
}

/// Test: Creation order respects dependencies
/// Given an acyclic task set listed in arbitrary order
/// When it is decomposed
/// Then every dependency is created strictly before its dependents
#[tokio::test]
async fn test_dependencies_created_before_dependents() {
    let h = harness();
    let raw = request(vec![
        task("deploy", &["api", "ui", "migrate"]),
        task("ui", &["design"]),
        task("api", &["schema", "auth"]),
        task("migrate", &["schema"]),
        task("auth", &[]),
        task("schema", &[]),
        task("design", &[]),
    ]);

    let result = h.decompose(&raw).await.unwrap();
    let position: HashMap<TaskId, usize> = result
        .plan
        .tasks()
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id, i))
        .collect();
    assert_eq!(position.len(), 7);
    for t in result.plan.tasks() {
        for dep in &t.dependencies {
            assert!(
                position[dep] < position[&t.id],
                "{} was created before one of its dependencies",
                t.key
            );
        }
    }
    assert_eq!(h.store.len().await, 7);
}

/// Test: Cycle rejection
/// Given A -> B -> C -> A
/// When it is decomposed
/// Then a circular-dependency error is returned and nothing is created
#[tokio::test]
async fn test_cycle_rejected_with_zero_tasks_created() {
    let h = harness();
    let raw = request(vec![task("A", &["C"]), task("B", &["A"]), task("C", &["B"])]);

    let err = h.decompose(&raw).await.unwrap_err();
    assert!(matches!(err, Error::Dependency { .. }));
    let cycle = err
        .issues()
        .iter()
        .find(|i| i.kind == IssueKind::Cycle)
        .expect("cycle issue");
    assert!(cycle.message.contains("Circular dependency"));
    for key in ["A", "B", "C"] {
        assert!(cycle.message.contains(key));
    }
    assert!(h.store.is_empty().await);
}

/// Test: Duplicate ids
/// Given two tasks sharing an id
/// When it is decomposed
/// Then a validation error names the id and nothing is created
#[tokio::test]
async fn test_duplicate_id_named_and_nothing_created() {
    let h = harness();
    let raw = request(vec![task("api", &[]), task("api", &[]), task("ui", &[])]);

    let err = h.decompose(&raw).await.unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    let dupes: Vec<_> = err
        .issues()
        .iter()
        .filter(|i| i.kind == IssueKind::DuplicateId)
        .collect();
    assert_eq!(dupes.len(), 1);
    assert!(dupes[0].message.contains("api"));
    assert!(h.store.is_empty().await);
}

/// Test: Schema problems are collected, not short-circuited
#[tokio::test]
async fn test_all_schema_errors_reported() {
    let h = harness();
    let raw = json!({
        "projectType": "spaceship",
        "complexity": "moderate",
        "estimatedDuration": -1,
        "tasks": [{"id": "a", "description": "", "type": "impl", "estimatedMinutes": 5}],
        "requiredAgents": ["backend"],
    });

    let err = h.decompose(&raw).await.unwrap_err();
    let schema = err
        .issues()
        .iter()
        .filter(|i| i.kind == IssueKind::Schema)
        .count();
    assert!(schema >= 3, "expected every schema problem, got {}", schema);
    assert!(h.store.is_empty().await);
}

/// Test: Layer placement
/// Given a root task and a task depending only on a layer-2 task
/// When layers are built
/// Then the root sits in layer 0 and the dependent in layer 3 or later
#[tokio::test]
async fn test_layer_placement() {
    let h = harness();
    let raw = request(vec![
        task("root", &[]),
        task("one", &["root"]),
        task("two", &["one"]),
        task("three", &["two"]),
        task("loner", &[]),
    ]);
    let result = h.decompose(&raw).await.unwrap();
    let layers = build_layers(result.plan.tasks()).unwrap();
    let depth_of = |key: &str| {
        let id = id_of(&result, key);
        layers
            .iter()
            .find(|l| l.tasks.contains(&id))
            .map(|l| l.depth)
            .unwrap()
    };

    assert_eq!(depth_of("root"), 0);
    assert_eq!(depth_of("loner"), 0);
    assert_eq!(depth_of("two"), 2);
    assert!(depth_of("three") >= 3);
    assert_eq!(layers, result.plan.layers());
}

/// Test: Store rejection propagates to dependents only
#[tokio::test]
async fn test_store_rejection_fails_dependent_chain() {
    let h = harness().with_store(MemoryTaskStore::with_rejections(["schema"]));
    let raw = request(vec![
        task("schema", &[]),
        task("api", &["schema"]),
        task("ui", &[]),
    ]);

    let result = h.decompose(&raw).await.unwrap();
    assert_eq!(result.plan.tasks().len(), 1);
    assert_eq!(task_of(&result, "ui").key, "ui");

    let failed: Vec<&str> = result.failures.iter().map(|f| f.key.as_str()).collect();
    assert_eq!(failed, vec!["schema", "api"]);
    assert_eq!(result.failures[1].reason, "dependency `schema` was not created");
}

/// Test: Parallel groups
/// Given independent tasks named in one parallel group
/// When it is decomposed
/// Then they share a layer and come out as one group
#[tokio::test]
async fn test_parallel_group_dispatched_together() {
    let h = harness();
    let raw = request_with_groups(
        vec![
            task("setup", &[]),
            task("a", &["setup"]),
            task("b", &["setup"]),
            task("c", &["setup"]),
        ],
        &[&["a", "b", "c"]],
    );

    let result = h.decompose(&raw).await.unwrap();
    assert!(result
        .warnings
        .iter()
        .all(|w| w.kind != IssueKind::ParallelGroup));

    let layer = &result.plan.layers()[1];
    let groups = result.plan.groups(layer);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name, "group-0");
    assert_eq!(groups[0].tasks.len(), 3);
    assert!(!groups[0].solo);
    assert!(task_of(&result, "a").can_run_in_parallel);
    assert!(!task_of(&result, "setup").can_run_in_parallel);
}

/// Test: Dependent members of one group
/// Given a group whose members depend on each other
/// When it is decomposed
/// Then decomposition succeeds with a warning
#[tokio::test]
async fn test_parallel_group_with_internal_dependency_warns() {
    let h = harness();
    let raw = request_with_groups(
        vec![task("a", &[]), task("b", &["a"])],
        &[&["a", "b"]],
    );

    let result = h.decompose(&raw).await.unwrap();
    let warning = result
        .warnings
        .iter()
        .find(|w| w.kind == IssueKind::ParallelGroup)
        .expect("parallel group warning");
    assert_eq!(warning.severity, Severity::Warning);
    assert_eq!(result.plan.layers().len(), 2);
}
