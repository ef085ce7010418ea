//! Failure handling and bounded reassignment.
//!
//! Every reassignment appends a [`ReassignmentRecord`] to the scheduler's
//! history. A task whose history has reached `max_reassignments` is failed
//! for good instead of being moved again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::core::{Task, TaskId, WorkerId};
use crate::error::{Error, Result};
use crate::orchestration::events::{EventSink, SchedulerEvent};
use crate::orchestration::scheduler::{Assignment, Scheduler};
use crate::orchestration::scoring::{ScoringEngine, Strategy};
use crate::orchestration::{AgentDirectory, CapabilityMatcher, TaskStore};
use crate::util::with_timeout;
use crate::{tlog, tlog_error, tlog_warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReassignmentRecord {
    pub task_id: TaskId,
    pub from_worker: WorkerId,
    pub to_worker: WorkerId,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    /// 1-based.
    pub attempt: usize,
}

/// What happened to one task held by a failed worker.
#[derive(Debug)]
pub struct ReassignmentOutcome {
    pub task_id: TaskId,
    pub result: Result<Assignment>,
}

impl ReassignmentOutcome {
    pub fn is_reassigned(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct RecoveryManager {
    directory: Arc<dyn AgentDirectory>,
    store: Arc<dyn TaskStore>,
    matcher: Option<Arc<dyn CapabilityMatcher>>,
    engine: ScoringEngine,
    events: EventSink,
    max_reassignments: usize,
    store_timeout: Duration,
}

impl RecoveryManager {
    /// Reassignments always score with the optimal strategy.
    pub fn new(
        directory: Arc<dyn AgentDirectory>,
        store: Arc<dyn TaskStore>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            directory,
            store,
            matcher: None,
            engine: ScoringEngine::new(config).with_strategy(Strategy::Optimal),
            events: EventSink::disabled(),
            max_reassignments: config.max_reassignments,
            store_timeout: config.store_timeout(),
        }
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn CapabilityMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Take a worker out of rotation and move every task it holds.
    pub async fn handle_worker_failure(
        &self,
        scheduler: &mut Scheduler,
        worker_id: &WorkerId,
        reason: &str,
    ) -> Vec<ReassignmentOutcome> {
        tlog_warn!("Worker {} failed: {}", worker_id, reason);
        scheduler.mark_ineligible(worker_id);

        let mut outcomes = Vec::new();
        for task_id in scheduler.tasks_of(worker_id) {
            let result = match self.lookup(&task_id).await {
                Ok(task) => {
                    self.reassign(scheduler, &task, reason, &HashSet::new())
                        .await
                }
                Err(e) => {
                    scheduler.mark_failed(task_id);
                    Err(e)
                }
            };
            outcomes.push(ReassignmentOutcome { task_id, result });
        }
        outcomes
    }

    /// Move a task away from the worker that just failed it.
    pub async fn handle_task_failure(
        &self,
        scheduler: &mut Scheduler,
        task: &Task,
        reason: &str,
    ) -> Result<Assignment> {
        let exclude: HashSet<WorkerId> =
            scheduler.worker_of(&task.id).cloned().into_iter().collect();
        self.reassign(scheduler, task, reason, &exclude).await
    }

    /// Move a task to the best remaining worker.
    ///
    /// Fails the task permanently when its retry budget is spent or when no
    /// substitute exists.
    pub async fn reassign(
        &self,
        scheduler: &mut Scheduler,
        task: &Task,
        reason: &str,
        exclude: &HashSet<WorkerId>,
    ) -> Result<Assignment> {
        let attempts = scheduler.reassignment_count(&task.id);
        if attempts >= self.max_reassignments {
            tlog_error!(
                "Task {} exhausted its {} reassignments; failing it",
                task.key,
                attempts
            );
            scheduler.mark_failed(task.id);
            return Err(Error::ReassignmentExhausted {
                task: task.id,
                attempts,
            });
        }

        let from = scheduler.worker_of(&task.id).cloned().ok_or_else(|| {
            Error::Internal(format!("Task {} has no live assignment to move", task.key))
        })?;

        let candidates: Vec<_> = self
            .directory
            .list_available()
            .await
            .into_iter()
            .filter(|w| !exclude.contains(&w.id))
            .collect();
        let picked = self
            .engine
            .select(
                task,
                &candidates,
                &scheduler.workloads(),
                scheduler.ineligible(),
                self.matcher.as_deref(),
            )
            .await;

        let Some(candidate) = picked else {
            tlog_error!("No substitute worker for task {}; failing it", task.key);
            scheduler.mark_failed(task.id);
            return Err(Error::Assignment {
                task: task.id,
                attempted: candidates.into_iter().map(|w| w.id).collect(),
            });
        };

        let assignment = Assignment::new(task.id, candidate);
        let record = ReassignmentRecord {
            task_id: task.id,
            from_worker: from.clone(),
            to_worker: assignment.worker_id.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
            attempt: attempts + 1,
        };
        scheduler.rebind(assignment.clone(), record)?;

        tlog!(
            "Reassigned task {} from {} to {} (attempt {})",
            task.key,
            from,
            assignment.worker_id,
            attempts + 1
        );
        self.events.emit(SchedulerEvent::TaskReassigned {
            task_id: task.id,
            from,
            to: assignment.worker_id.clone(),
            attempt: attempts + 1,
        });
        Ok(assignment)
    }

    async fn lookup(&self, task_id: &TaskId) -> Result<Task> {
        with_timeout(self.store_timeout, async {
            self.store
                .get_task(task_id)
                .await
                .ok_or_else(|| Error::TaskStore(format!("task {} not found", task_id.short())))
        })
        .await
    }
}
