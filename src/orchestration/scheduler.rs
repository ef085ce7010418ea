//! Scheduling bookkeeping.
//!
//! The [`Scheduler`] is the single owner of every piece of mutable
//! assignment state: who holds which task, how loaded each worker is, the
//! reassignment history, and which workers and tasks are out of the game.
//! All mutation goes through `&mut Scheduler`, so the workload maps can
//! never disagree with the live assignments.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::config::SchedulerConfig;
use crate::core::{TaskGraph, TaskId, WorkerId};
use crate::error::{Error, Result};
use crate::orchestration::recovery::ReassignmentRecord;
use crate::orchestration::scoring::{ScoreBreakdown, ScoredCandidate, Strategy};
use crate::tlog_debug;

/// A task bound to a worker.
///
/// Assignments are never edited in place. A reassignment replaces the
/// live assignment with a new one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub strategy: Strategy,
    pub assigned_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(task_id: TaskId, candidate: ScoredCandidate) -> Self {
        Self {
            task_id,
            worker_id: candidate.worker_id,
            score: candidate.score,
            breakdown: candidate.breakdown,
            strategy: candidate.strategy,
            assigned_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
    task_worker: HashMap<TaskId, WorkerId>,
    worker_tasks: HashMap<WorkerId, BTreeSet<TaskId>>,
    live: HashMap<TaskId, Assignment>,
    history: HashMap<TaskId, Vec<ReassignmentRecord>>,
    ineligible: HashSet<WorkerId>,
    failed: HashSet<TaskId>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Record a new live assignment.
    ///
    /// Fails if the task already has one; use [`Scheduler::rebind`] to move
    /// a task.
    pub fn bind(&mut self, assignment: Assignment) -> Result<()> {
        if self.live.contains_key(&assignment.task_id) {
            return Err(Error::Internal(format!(
                "Task {} already has a live assignment",
                assignment.task_id.short()
            )));
        }
        tlog_debug!(
            "Bound task {} to {}",
            assignment.task_id.short(),
            assignment.worker_id
        );
        self.task_worker
            .insert(assignment.task_id, assignment.worker_id.clone());
        self.worker_tasks
            .entry(assignment.worker_id.clone())
            .or_default()
            .insert(assignment.task_id);
        self.live.insert(assignment.task_id, assignment);
        Ok(())
    }

    /// Drop a task's live assignment, if it has one.
    pub fn release(&mut self, task_id: &TaskId) -> Option<Assignment> {
        let assignment = self.live.remove(task_id)?;
        self.task_worker.remove(task_id);
        if let Some(tasks) = self.worker_tasks.get_mut(&assignment.worker_id) {
            tasks.remove(task_id);
            if tasks.is_empty() {
                self.worker_tasks.remove(&assignment.worker_id);
            }
        }
        tlog_debug!(
            "Released task {} from {}",
            task_id.short(),
            assignment.worker_id
        );
        Some(assignment)
    }

    /// Replace a task's live assignment and append the matching history
    /// record, as one step.
    pub fn rebind(
        &mut self,
        assignment: Assignment,
        record: ReassignmentRecord,
    ) -> Result<Assignment> {
        if record.task_id != assignment.task_id {
            return Err(Error::Internal(format!(
                "Reassignment record for {} does not match task {}",
                record.task_id.short(),
                assignment.task_id.short()
            )));
        }
        let previous = self.release(&assignment.task_id).ok_or_else(|| {
            Error::Internal(format!(
                "Task {} has no live assignment to move",
                assignment.task_id.short()
            ))
        })?;
        self.bind(assignment)?;
        self.history.entry(record.task_id).or_default().push(record);
        Ok(previous)
    }

    pub fn assignment(&self, task_id: &TaskId) -> Option<&Assignment> {
        self.live.get(task_id)
    }

    /// Live assignments, ordered by task id.
    pub fn assignments(&self) -> Vec<&Assignment> {
        let mut all: Vec<&Assignment> = self.live.values().collect();
        all.sort_by_key(|a| a.task_id);
        all
    }

    pub fn worker_of(&self, task_id: &TaskId) -> Option<&WorkerId> {
        self.task_worker.get(task_id)
    }

    /// Tasks a worker holds, in ascending task order.
    pub fn tasks_of(&self, worker_id: &WorkerId) -> Vec<TaskId> {
        self.worker_tasks
            .get(worker_id)
            .map(|tasks| tasks.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn workload_of(&self, worker_id: &WorkerId) -> usize {
        self.worker_tasks.get(worker_id).map_or(0, BTreeSet::len)
    }

    pub fn workloads(&self) -> HashMap<WorkerId, usize> {
        self.worker_tasks
            .iter()
            .map(|(w, tasks)| (w.clone(), tasks.len()))
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Live tasks that could run at the same time as `task_id`.
    ///
    /// A live ancestor or descendant of the task can never overlap with it
    /// and does not count.
    pub fn in_flight_excluding_ancestors(
        &self,
        task_id: &TaskId,
        graph: &TaskGraph<TaskId>,
    ) -> usize {
        let ancestors = graph.ancestors(task_id);
        self.live
            .keys()
            .filter(|&other| other != task_id)
            .filter(|&other| !ancestors.contains(other) && !graph.depends_on(other, task_id))
            .count()
    }

    pub fn mark_ineligible(&mut self, worker_id: &WorkerId) {
        self.ineligible.insert(worker_id.clone());
    }

    pub fn is_ineligible(&self, worker_id: &WorkerId) -> bool {
        self.ineligible.contains(worker_id)
    }

    pub fn ineligible(&self) -> &HashSet<WorkerId> {
        &self.ineligible
    }

    /// Take a task out of scheduling for good.
    pub fn mark_failed(&mut self, task_id: TaskId) {
        self.release(&task_id);
        self.failed.insert(task_id);
    }

    pub fn is_failed(&self, task_id: &TaskId) -> bool {
        self.failed.contains(task_id)
    }

    pub fn history(&self, task_id: &TaskId) -> &[ReassignmentRecord] {
        self.history.get(task_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn reassignment_count(&self, task_id: &TaskId) -> usize {
        self.history.get(task_id).map_or(0, Vec::len)
    }

    pub fn total_reassignments(&self) -> usize {
        self.history.values().map(Vec::len).sum()
    }

    /// Check that the workload maps match the live assignments.
    pub fn is_consistent(&self) -> bool {
        let from_workers: usize = self.worker_tasks.values().map(BTreeSet::len).sum();
        from_workers == self.live.len()
            && self.task_worker.len() == self.live.len()
            && self.live.values().all(|a| {
                self.task_worker.get(&a.task_id) == Some(&a.worker_id)
                    && self
                        .worker_tasks
                        .get(&a.worker_id)
                        .is_some_and(|tasks| tasks.contains(&a.task_id))
            })
    }
}
