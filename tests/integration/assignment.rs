//! Assignment integration tests.
//!
//! These tests verify scoring across strategies and the layer-by-layer
//! assignment pass, including the global concurrency ceiling.

use std::collections::{HashMap, HashSet};

use taskloom::config::SchedulerConfig;
use taskloom::core::{Task, TaskSpec, Worker, WorkerId};
use taskloom::orchestration::{
    OverlapMatcher, ScoringEngine, StaticDirectory, Strategy, REASON_CAP_REACHED,
};

use crate::fixtures::{request, request_with_groups, task, workers, Harness};

fn capped(max_concurrent_tasks: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_concurrent_tasks,
        ..SchedulerConfig::default()
    }
}

/// Test: Optimal scoring
/// Given a full-match idle worker and a partial-match loaded worker
/// When the optimal strategy scores both
/// Then the full match scores higher
#[tokio::test]
async fn test_optimal_prefers_full_match_and_zero_load() {
    let task = Task::from_spec(TaskSpec {
        key: "api".into(),
        description: "Build the API".into(),
        task_type: "implementation".into(),
        dependencies: vec![],
        required_capabilities: vec!["rust".into(), "sql".into(), "http".into()],
        priority: Default::default(),
        estimated_minutes: 30,
        parallel_group: None,
        can_run_in_parallel: false,
    });
    let full = Worker::new("full", "backend").with_capabilities(["rust", "sql", "http"]);
    let partial = Worker::new("partial", "backend").with_capabilities(["rust"]);
    let workloads: HashMap<WorkerId, usize> = [(partial.id.clone(), 2)].into_iter().collect();
    let engine = ScoringEngine::new(&SchedulerConfig::default());

    // Either order of candidates gives the same winner.
    for candidates in [
        vec![full.clone(), partial.clone()],
        vec![partial.clone(), full.clone()],
    ] {
        let picked = engine
            .select(&task, &candidates, &workloads, &HashSet::new(), Some(&OverlapMatcher))
            .await
            .unwrap();
        assert_eq!(picked.worker_id, full.id);
        assert_eq!(picked.strategy, Strategy::Optimal);
    }

    let alone = engine
        .select(&task, &[partial.clone()], &workloads, &HashSet::new(), Some(&OverlapMatcher))
        .await
        .unwrap();
    let best = engine
        .select(&task, &[full.clone()], &workloads, &HashSet::new(), Some(&OverlapMatcher))
        .await
        .unwrap();
    assert!(best.score > alone.score);
}

/// Test: Linear chain under a concurrency cap
/// Given 5 tasks in a strict chain, 2 workers and a cap of 2
/// When the plan is assigned
/// Then there are 5 single-task layers and all 5 tasks are assigned
#[tokio::test]
async fn test_chain_of_five_all_assigned() {
    let h = Harness::new(workers(2), capped(2));
    let raw = request(vec![
        task("t1", &[]),
        task("t2", &["t1"]),
        task("t3", &["t2"]),
        task("t4", &["t3"]),
        task("t5", &["t4"]),
    ]);
    let decomposition = h.decompose(&raw).await.unwrap();
    let plan = &decomposition.plan;

    assert_eq!(plan.layers().len(), 5);
    assert!(plan.layers().iter().all(|l| l.tasks.len() == 1));

    let mut scheduler = h.scheduler();
    let report = h.orchestrator().assign(&mut scheduler, plan).await.unwrap();
    assert_eq!(report.assignments.len(), 5);
    assert!(report.unassigned.is_empty());
    assert_eq!(scheduler.live_count(), 5);
    assert!(scheduler.is_consistent());
}

/// Test: Parallel group under a concurrency cap
/// Given 4 independent tasks in one group, 3 workers and a cap of 2
/// When the plan is assigned
/// Then exactly 2 are assigned and 2 are unassigned at the cap
#[tokio::test]
async fn test_parallel_group_hits_concurrency_cap() {
    let h = Harness::new(workers(3), capped(2));
    let raw = request_with_groups(
        vec![task("a", &[]), task("b", &[]), task("c", &[]), task("d", &[])],
        &[&["a", "b", "c", "d"]],
    );
    let decomposition = h.decompose(&raw).await.unwrap();

    let mut scheduler = h.scheduler();
    let report = h
        .orchestrator()
        .assign(&mut scheduler, &decomposition.plan)
        .await
        .unwrap();

    assert_eq!(report.assignments.len(), 2);
    assert_eq!(report.unassigned.len(), 2);
    for unassigned in &report.unassigned {
        assert_eq!(unassigned.reason, REASON_CAP_REACHED);
    }
    assert!(report.errors.is_empty());
}

/// Test: Every strategy spreads load within a pass
#[tokio::test]
async fn test_strategies_respect_caps() {
    for strategy in Strategy::VALUES {
        let config = SchedulerConfig {
            strategy,
            max_concurrent_tasks: 10,
            ..SchedulerConfig::default()
        };
        let h = Harness::new(workers(2), config);
        let raw = request((0..4).map(|i| task(&format!("t{}", i), &[])).collect());
        let decomposition = h.decompose(&raw).await.unwrap();

        let mut scheduler = h.scheduler();
        let report = h
            .orchestrator()
            .assign(&mut scheduler, &decomposition.plan)
            .await
            .unwrap();

        assert_eq!(report.assignments.len(), 4, "{} left tasks behind", strategy);
        for w in ["w1", "w2"] {
            assert_eq!(
                scheduler.workload_of(&WorkerId::from(w)),
                2,
                "{} overloaded {}",
                strategy,
                w
            );
        }
    }
}

/// Test: Missing templates are spawned before the pass
#[tokio::test]
async fn test_required_agent_spawned_and_used() {
    let h = Harness {
        directory: std::sync::Arc::new(
            StaticDirectory::new(vec![]).with_template("backend", ["rust"]),
        ),
        ..Harness::new(vec![], SchedulerConfig::default())
    };
    let raw = request(vec![task("api", &[])]);
    let decomposition = h.decompose(&raw).await.unwrap();

    let orchestrator = h
        .orchestrator()
        .with_required_agents(decomposition.required_agents.clone());
    let mut scheduler = h.scheduler();
    let report = orchestrator
        .assign(&mut scheduler, &decomposition.plan)
        .await
        .unwrap();

    assert_eq!(report.assignments.len(), 1);
    assert_eq!(report.assignments[0].worker_id.as_str(), "backend-1");
}
