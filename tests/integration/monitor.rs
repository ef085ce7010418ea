//! Execution monitor integration tests.
//!
//! These tests drive a whole run through signals: decomposition, the first
//! assignment pass, then completions and failures reported from outside.

use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;

use taskloom::config::SchedulerConfig;
use taskloom::core::{TaskId, WorkerId, WorkerStatus};
use taskloom::decompose::Decomposition;
use taskloom::orchestration::{EventSink, ExecutionMonitor, MonitorSignal, SchedulerEvent};

use crate::fixtures::{request, request_with_groups, task, workers, Harness};

fn done(task_id: TaskId) -> MonitorSignal {
    MonitorSignal::TaskCompleted {
        task_id,
        worker_id: None,
    }
}

async fn feed(signals: Vec<MonitorSignal>) -> mpsc::Receiver<MonitorSignal> {
    let (tx, rx) = mpsc::channel(signals.len().max(1));
    for signal in signals {
        tx.send(signal).await.unwrap();
    }
    rx
}

/// Test: Diamond runs to completion
/// Given setup -> {api, ui} -> deploy with api and ui grouped
/// When every task reports completion in dependency order
/// Then the run succeeds with nothing left over
#[tokio::test]
async fn test_diamond_runs_to_completion() {
    let h = Harness::new(workers(2), SchedulerConfig::default());
    let raw = request_with_groups(
        vec![
            task("setup", &[]),
            task("api", &["setup"]),
            task("ui", &["setup"]),
            task("deploy", &["api", "ui"]),
        ],
        &[&["api", "ui"]],
    );
    let (monitor, ids) = h.monitor(&raw).await;

    let rx = feed(vec![
        done(ids["setup"]),
        done(ids["ui"]),
        done(ids["api"]),
        done(ids["deploy"]),
    ])
    .await;
    let summary = monitor.run(rx).await;

    assert!(summary.is_success());
    assert_eq!(summary.completed.len(), 4);
    assert_eq!(summary.sequential_estimate, Duration::from_secs(4 * 15 * 60));
    assert!(summary.speedup >= 0.0);
    assert_eq!(summary.reassignments, 0);
}

/// Test: Deferred tasks start once capacity frees up
/// Given 4 independent tasks, 3 workers and a cap of 2
/// When the two running tasks complete
/// Then the two deferred tasks are assigned, started and can complete
#[tokio::test]
async fn test_cap_deferred_tasks_run_later() {
    let config = SchedulerConfig {
        max_concurrent_tasks: 2,
        ..SchedulerConfig::default()
    };
    let h = Harness::new(workers(3), config);
    let raw = request(vec![task("a", &[]), task("b", &[]), task("c", &[]), task("d", &[])]);
    let (monitor, ids) = h.monitor(&raw).await;

    let first: HashSet<TaskId> = monitor
        .scheduler()
        .assignments()
        .iter()
        .map(|a| a.task_id)
        .collect();
    assert_eq!(first.len(), 2);
    let rest: Vec<TaskId> = ids.values().copied().filter(|id| !first.contains(id)).collect();

    let mut signals: Vec<MonitorSignal> = first.iter().copied().map(done).collect();
    signals.extend(rest.iter().copied().map(done));
    let summary = monitor.run(feed(signals).await).await;

    assert!(summary.is_success(), "left behind: {:?}", summary.pending);
    assert_eq!(summary.completed.len(), 4);
}

/// Test: Failure cascade
/// Given a chain schema -> api -> deploy on a single worker
/// When schema fails and no substitute worker exists
/// Then every dependent fails and names its failed dependency
#[tokio::test]
async fn test_failure_cascades_down_the_chain() {
    let h = Harness::new(workers(1), SchedulerConfig::default());
    let raw = request(vec![
        task("schema", &[]),
        task("api", &["schema"]),
        task("deploy", &["api"]),
        task("docs", &[]),
    ]);
    let (monitor, ids) = h.monitor(&raw).await;

    let rx = feed(vec![
        MonitorSignal::TaskFailed {
            task_id: ids["schema"],
            worker_id: Some(WorkerId::from("w1")),
            reason: "migration failed".into(),
        },
        done(ids["docs"]),
    ])
    .await;
    let summary = monitor.run(rx).await;

    assert_eq!(summary.completed, vec![ids["docs"]]);
    let reasons: Vec<(&str, &str)> = summary
        .failed
        .iter()
        .map(|f| (f.key.as_str(), f.reason.as_str()))
        .collect();
    assert_eq!(reasons.len(), 3);
    assert!(reasons.contains(&("api", "dependency `schema` failed")));
    assert!(reasons.contains(&("deploy", "dependency `api` failed")));
    assert!(!summary.is_success());
}

/// Test: Worker going offline mid-run
#[tokio::test]
async fn test_offline_worker_tasks_finish_elsewhere() {
    let h = Harness::new(workers(2), SchedulerConfig::default());
    let raw = request(vec![task("a", &[]), task("b", &[])]);
    let (monitor, ids) = h.monitor(&raw).await;
    let holder = monitor.scheduler().worker_of(&ids["a"]).cloned().unwrap();

    let rx = feed(vec![
        MonitorSignal::WorkerStatusChanged {
            worker_id: holder.clone(),
            status: WorkerStatus::Offline,
        },
        // Late report from the worker that went away.
        MonitorSignal::TaskCompleted {
            task_id: ids["a"],
            worker_id: Some(holder),
        },
        done(ids["a"]),
        done(ids["b"]),
    ])
    .await;
    let summary = monitor.run(rx).await;

    assert!(summary.is_success());
    assert!(summary.reassignments >= 1);
}

/// Test: Timeout keeps partial progress
#[tokio::test(start_paused = true)]
async fn test_timeout_reports_partial_progress() {
    let h = Harness::new(workers(1), SchedulerConfig::default());
    let raw = request(vec![task("a", &[]), task("b", &["a"])]);
    let (monitor, ids) = h.monitor(&raw).await;

    let (tx, rx) = mpsc::channel(2);
    tx.send(done(ids["a"])).await.unwrap();
    let summary = monitor.with_timeout(Duration::from_secs(60)).run(rx).await;

    assert!(summary.timed_out);
    assert!(!summary.cancelled);
    assert_eq!(summary.completed, vec![ids["a"]]);
    assert_eq!(summary.in_progress, vec![ids["b"]]);
    drop(tx);
}

/// Test: Lifecycle events
/// Given a monitor wired to an event channel
/// When a single task completes
/// Then start, completion and the final event are emitted in order
#[tokio::test]
async fn test_lifecycle_events_emitted() {
    let h = Harness::new(workers(1), SchedulerConfig::default());
    let Decomposition { plan, id_map, .. } = h
        .decompose(&request(vec![task("a", &[])]))
        .await
        .unwrap();
    let a = id_map["a"];

    let (sink, mut events) = EventSink::channel(32);
    let orchestrator = h.orchestrator().with_events(sink.clone());
    let mut scheduler = h.scheduler();
    orchestrator.assign(&mut scheduler, &plan).await.unwrap();
    let recovery = h.recovery().with_events(sink);
    let monitor = ExecutionMonitor::new(plan, scheduler, orchestrator, recovery);

    let summary = monitor.run(feed(vec![done(a)]).await).await;
    assert!(summary.is_success());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let position = |wanted: &SchedulerEvent| seen.iter().position(|e| e == wanted);

    assert!(matches!(seen[0], SchedulerEvent::TaskAssigned { .. }));
    let started = seen
        .iter()
        .position(|e| matches!(e, SchedulerEvent::TaskStarted { .. }))
        .unwrap();
    let completed = position(&SchedulerEvent::TaskCompleted { task_id: a }).unwrap();
    let finished = position(&SchedulerEvent::AllTasksComplete).unwrap();
    assert!(started < completed && completed < finished);
}
