//! Recovery integration tests.
//!
//! These tests verify bounded reassignment after task failures and the
//! handling of a worker that drops out mid-run.

use taskloom::config::SchedulerConfig;
use taskloom::core::WorkerId;
use taskloom::Error;

use crate::fixtures::{request, task, task_of, workers, Harness};

/// Test: Reassignment budget
/// Given a task that fails 4 times in a row on 2 workers
/// When each failure is handed to recovery
/// Then exactly 3 records exist and the 4th attempt is rejected
#[tokio::test]
async fn test_fourth_failure_exhausts_reassignments() {
    let h = Harness::new(workers(2), SchedulerConfig::default());
    let decomposition = h.decompose(&request(vec![task("api", &[])])).await.unwrap();
    let api = task_of(&decomposition, "api").clone();

    let mut scheduler = h.scheduler();
    h.orchestrator()
        .assign(&mut scheduler, &decomposition.plan)
        .await
        .unwrap();
    let recovery = h.recovery();

    for attempt in 1..=3 {
        let before = scheduler.worker_of(&api.id).cloned().unwrap();
        let moved = recovery
            .handle_task_failure(&mut scheduler, &api, "exit code 1")
            .await
            .unwrap();
        assert_ne!(moved.worker_id, before, "attempt {} stayed put", attempt);
        assert_eq!(scheduler.reassignment_count(&api.id), attempt);
    }

    let err = recovery
        .handle_task_failure(&mut scheduler, &api, "exit code 1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ReassignmentExhausted { attempts: 3, .. }
    ));

    let history = scheduler.history(&api.id);
    assert_eq!(history.len(), 3);
    let attempts: Vec<usize> = history.iter().map(|r| r.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert!(history.iter().all(|r| r.reason == "exit code 1"));
    assert!(scheduler.is_failed(&api.id));
    assert!(scheduler.assignment(&api.id).is_none());
}

/// Test: Worker failure
/// Given two tasks on one worker and a healthy spare
/// When that worker fails
/// Then both tasks move to the spare and the worker stays out of rotation
#[tokio::test]
async fn test_worker_failure_moves_all_tasks() {
    let config = SchedulerConfig {
        max_tasks_per_worker: 2,
        ..SchedulerConfig::default()
    };
    let h = Harness::new(workers(1), config);
    let decomposition = h
        .decompose(&request(vec![task("a", &[]), task("b", &[])]))
        .await
        .unwrap();

    let mut scheduler = h.scheduler();
    let report = h
        .orchestrator()
        .assign(&mut scheduler, &decomposition.plan)
        .await
        .unwrap();
    assert_eq!(report.assignments.len(), 2);

    let w1 = WorkerId::from("w1");
    let spare = workers(2).pop().unwrap();
    h.directory.add_worker(spare.clone()).await;

    let outcomes = h
        .recovery()
        .handle_worker_failure(&mut scheduler, &w1, "heartbeat lost")
        .await;

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.is_reassigned()));
    assert_eq!(scheduler.workload_of(&w1), 0);
    assert_eq!(scheduler.workload_of(&spare.id), 2);
    assert!(scheduler.is_ineligible(&w1));
    assert_eq!(scheduler.total_reassignments(), 2);
    assert!(scheduler.is_consistent());
}

/// Test: No substitute
/// Given a single worker holding a task
/// When that worker fails
/// Then the task is failed with an assignment error
#[tokio::test]
async fn test_worker_failure_without_substitute_fails_task() {
    let h = Harness::new(workers(1), SchedulerConfig::default());
    let decomposition = h.decompose(&request(vec![task("a", &[])])).await.unwrap();
    let a = task_of(&decomposition, "a").id;

    let mut scheduler = h.scheduler();
    h.orchestrator()
        .assign(&mut scheduler, &decomposition.plan)
        .await
        .unwrap();

    let outcomes = h
        .recovery()
        .handle_worker_failure(&mut scheduler, &WorkerId::from("w1"), "crashed")
        .await;

    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0].result, Err(Error::Assignment { .. })));
    assert!(scheduler.is_failed(&a));
    assert_eq!(scheduler.live_count(), 0);
    assert!(scheduler.history(&a).is_empty());
}
