//! Execution monitor.
//!
//! The monitor owns the plan and the scheduler for the duration of a run
//! and drives each task through `pending -> running -> completed|failed`.
//! It is a single `select!` loop over three sources: the signal channel,
//! the hard deadline and a cancellation token. Every signal is followed by
//! a sweep that fails orphaned tasks, retries unassigned ones and starts
//! whatever became ready.
//!
//! The monitor only keeps books. Stopping it on timeout or cancellation
//! does not recall work already handed to external workers.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::{TaskId, TaskStatus, WorkerId, WorkerStatus};
use crate::decompose::ExecutionPlan;
use crate::orchestration::events::SchedulerEvent;
use crate::orchestration::orchestrator::{Orchestrator, Placement};
use crate::orchestration::recovery::RecoveryManager;
use crate::orchestration::scheduler::Scheduler;
use crate::{tlog, tlog_debug, tlog_error, tlog_warn};

/// Outcome reports from outside the engine.
///
/// `worker_id` names the worker the report came from. A report from a
/// worker that no longer holds the task is stale and ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum MonitorSignal {
    TaskCompleted {
        task_id: TaskId,
        #[serde(default)]
        worker_id: Option<WorkerId>,
    },
    TaskFailed {
        task_id: TaskId,
        #[serde(default)]
        worker_id: Option<WorkerId>,
        reason: String,
    },
    WorkerStatusChanged {
        worker_id: WorkerId,
        status: WorkerStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedTask {
    pub task_id: TaskId,
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub completed: Vec<TaskId>,
    pub failed: Vec<FailedTask>,
    pub in_progress: Vec<TaskId>,
    pub pending: Vec<TaskId>,
    pub timed_out: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
    /// Sum of all task estimates.
    pub sequential_estimate: Duration,
    /// `sequential_estimate / elapsed`, or 0 when no time elapsed.
    pub speedup: f64,
    pub reassignments: usize,
}

impl ExecutionSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.in_progress.is_empty() && self.pending.is_empty()
    }
}

pub struct ExecutionMonitor {
    plan: ExecutionPlan,
    scheduler: Scheduler,
    orchestrator: Orchestrator,
    recovery: RecoveryManager,
    /// Task ids by layer, dependencies first.
    order: Vec<TaskId>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl ExecutionMonitor {
    pub fn new(
        plan: ExecutionPlan,
        scheduler: Scheduler,
        orchestrator: Orchestrator,
        recovery: RecoveryManager,
    ) -> Self {
        let order = plan
            .layers()
            .iter()
            .flat_map(|layer| layer.tasks.iter().copied())
            .collect();
        let timeout = scheduler.config().monitor_timeout();
        Self {
            plan,
            scheduler,
            orchestrator,
            recovery,
            order,
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Token that stops [`ExecutionMonitor::run`] when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub async fn run(mut self, mut signals: mpsc::Receiver<MonitorSignal>) -> ExecutionSummary {
        let started = Instant::now();
        let cancel = self.cancel.clone();
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut timed_out = false;
        let mut cancelled = false;

        tlog!(
            "Monitoring {} tasks (timeout {:?})",
            self.plan.tasks().len(),
            self.timeout
        );
        self.sweep().await;

        loop {
            if self.all_terminal() {
                tlog!("All tasks reached a terminal state");
                self.orchestrator
                    .events()
                    .emit(SchedulerEvent::AllTasksComplete);
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tlog_warn!("Execution monitor cancelled");
                    cancelled = true;
                    break;
                }
                _ = &mut deadline => {
                    tlog_warn!("Execution monitor timed out after {:?}", self.timeout);
                    timed_out = true;
                    break;
                }
                signal = signals.recv() => match signal {
                    Some(signal) => {
                        self.handle(signal).await;
                        self.sweep().await;
                    }
                    None => {
                        tlog_warn!("Signal channel closed with work outstanding");
                        break;
                    }
                },
            }
        }

        self.summary(started.elapsed(), timed_out, cancelled)
    }

    async fn handle(&mut self, signal: MonitorSignal) {
        tlog_debug!("Signal: {:?}", signal);
        match signal {
            MonitorSignal::TaskCompleted { task_id, worker_id } => {
                if !self.accepts(&task_id, worker_id.as_ref()) {
                    return;
                }
                if let Some(task) = self.plan.task_mut(&task_id) {
                    task.complete();
                    tlog!("Task {} completed", task.key);
                }
                self.scheduler.release(&task_id);
                self.orchestrator
                    .events()
                    .emit(SchedulerEvent::TaskCompleted { task_id });
            }
            MonitorSignal::TaskFailed {
                task_id,
                worker_id,
                reason,
            } => {
                if !self.accepts(&task_id, worker_id.as_ref()) {
                    return;
                }
                let Some(task) = self.plan.task(&task_id) else {
                    return;
                };
                let outcome = self
                    .recovery
                    .handle_task_failure(&mut self.scheduler, task, &reason)
                    .await;
                match outcome {
                    Ok(_) => self.requeue(&task_id),
                    Err(e) => self.fail(&task_id, &format!("{}: {}", reason, e)),
                }
            }
            MonitorSignal::WorkerStatusChanged { worker_id, status } => {
                if status.is_available() {
                    tlog_debug!("Worker {} is {}", worker_id, status);
                    return;
                }
                let reason = format!("worker {} is {}", worker_id, status);
                let outcomes = self
                    .recovery
                    .handle_worker_failure(&mut self.scheduler, &worker_id, &reason)
                    .await;
                for outcome in outcomes {
                    match outcome.result {
                        Ok(_) => self.requeue(&outcome.task_id),
                        Err(e) => self.fail(&outcome.task_id, &e.to_string()),
                    }
                }
            }
        }
    }

    /// Whether a completion or failure report applies to a running task.
    fn accepts(&self, task_id: &TaskId, worker_id: Option<&WorkerId>) -> bool {
        let Some(task) = self.plan.task(task_id) else {
            tlog_warn!("Ignoring signal for unknown task {}", task_id);
            return false;
        };
        if task.status != TaskStatus::Running {
            tlog_warn!(
                "Ignoring signal for task {} in state {}",
                task.key,
                task.status
            );
            return false;
        }
        if let Some(reporter) = worker_id {
            if self.scheduler.worker_of(task_id) != Some(reporter) {
                tlog_debug!(
                    "Ignoring stale signal for task {} from {}",
                    task.key,
                    reporter
                );
                return false;
            }
        }
        true
    }

    fn requeue(&mut self, task_id: &TaskId) {
        if let Some(task) = self.plan.task_mut(task_id) {
            if task.status == TaskStatus::Running {
                task.requeue();
            }
        }
    }

    fn fail(&mut self, task_id: &TaskId, reason: &str) {
        self.scheduler.mark_failed(*task_id);
        if let Some(task) = self.plan.task_mut(task_id) {
            tlog_error!("Task {} failed permanently: {}", task.key, reason);
            task.fail(reason);
        }
        self.orchestrator.events().emit(SchedulerEvent::TaskFailed {
            task_id: *task_id,
            reason: reason.to_string(),
        });
    }

    async fn sweep(&mut self) {
        let order = self.order.clone();
        self.cascade_failures(&order);
        self.retry_unassigned(&order).await;
        self.start_ready(&order);
    }

    /// Fail pending tasks whose dependency failed. Layer order lets a
    /// failure travel down a whole chain in one pass.
    fn cascade_failures(&mut self, order: &[TaskId]) {
        for id in order {
            let Some(task) = self.plan.task(id) else {
                continue;
            };
            if task.status != TaskStatus::Pending {
                continue;
            }
            let failed_dep = task.dependencies.iter().find_map(|dep| {
                self.plan
                    .task(dep)
                    .filter(|d| matches!(d.status, TaskStatus::Failed { .. }))
                    .map(|d| d.key.clone())
            });
            if let Some(key) = failed_dep {
                self.fail(id, &format!("dependency `{}` failed", key));
            }
        }
    }

    async fn retry_unassigned(&mut self, order: &[TaskId]) {
        for id in order {
            let Some(task) = self.plan.task(id) else {
                continue;
            };
            if task.status != TaskStatus::Pending
                || self.scheduler.assignment(id).is_some()
                || self.scheduler.is_failed(id)
            {
                continue;
            }
            match self
                .orchestrator
                .assign_task(&mut self.scheduler, task, self.plan.graph())
                .await
            {
                Ok(Placement::Assigned(a)) => {
                    tlog_debug!("Late assignment of {} to {}", task.key, a.worker_id)
                }
                Ok(_) => tlog_debug!("Task {} still unassigned", task.key),
                Err(e) => tlog_error!("Assignment of task {} failed: {}", task.key, e),
            }
        }
    }

    fn start_ready(&mut self, order: &[TaskId]) {
        for id in order {
            let Some(task) = self.plan.task(id) else {
                continue;
            };
            let ready = task.status == TaskStatus::Pending
                && task.dependencies.iter().all(|dep| {
                    self.plan
                        .task(dep)
                        .is_some_and(|d| d.status == TaskStatus::Completed)
                });
            let Some(worker_id) = self.scheduler.worker_of(id).cloned() else {
                continue;
            };
            if !ready {
                continue;
            }
            if let Some(task) = self.plan.task_mut(id) {
                task.start();
                tlog!("Task {} started on {}", task.key, worker_id);
            }
            self.orchestrator.events().emit(SchedulerEvent::TaskStarted {
                task_id: *id,
                worker_id,
            });
        }
    }

    fn all_terminal(&self) -> bool {
        self.plan.tasks().iter().all(|t| t.is_finished())
    }

    fn summary(&self, elapsed: Duration, timed_out: bool, cancelled: bool) -> ExecutionSummary {
        let mut summary = ExecutionSummary {
            completed: Vec::new(),
            failed: Vec::new(),
            in_progress: Vec::new(),
            pending: Vec::new(),
            timed_out,
            cancelled,
            elapsed,
            sequential_estimate: Duration::from_secs(self.plan.sequential_minutes() * 60),
            speedup: 0.0,
            reassignments: self.scheduler.total_reassignments(),
        };
        if !elapsed.is_zero() {
            summary.speedup = summary.sequential_estimate.as_secs_f64() / elapsed.as_secs_f64();
        }

        for task in self.plan.tasks() {
            match &task.status {
                TaskStatus::Pending => summary.pending.push(task.id),
                TaskStatus::Running => summary.in_progress.push(task.id),
                TaskStatus::Completed => summary.completed.push(task.id),
                TaskStatus::Failed { reason } => summary.failed.push(FailedTask {
                    task_id: task.id,
                    key: task.key.clone(),
                    reason: reason.clone(),
                }),
            }
        }

        tlog!(
            "Run finished: {} completed, {} failed, {} running, {} pending",
            summary.completed.len(),
            summary.failed.len(),
            summary.in_progress.len(),
            summary.pending.len()
        );
        summary
    }
}
