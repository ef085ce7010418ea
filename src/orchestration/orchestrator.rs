//! Layer-by-layer assignment of an execution plan.

use serde::Serialize;
use std::sync::Arc;

use crate::core::{Task, TaskGraph, TaskId, WorkerId};
use crate::decompose::ExecutionPlan;
use crate::error::{Error, Result};
use crate::orchestration::events::{EventSink, SchedulerEvent};
use crate::orchestration::scheduler::{Assignment, Scheduler};
use crate::orchestration::scoring::ScoringEngine;
use crate::orchestration::{AgentDirectory, CapabilityMatcher};
use crate::{tlog, tlog_debug, tlog_warn};

pub const REASON_CAP_REACHED: &str = "concurrency cap reached";
pub const REASON_NO_ELIGIBLE_WORKER: &str = "no eligible worker";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnassignedTask {
    pub task_id: TaskId,
    pub reason: String,
}

/// No candidate could take a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentError {
    pub task: TaskId,
    /// Every worker that was considered.
    pub attempted: Vec<WorkerId>,
}

impl From<AssignmentError> for Error {
    fn from(e: AssignmentError) -> Self {
        Error::Assignment {
            task: e.task,
            attempted: e.attempted,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AssignmentReport {
    pub assignments: Vec<Assignment>,
    pub unassigned: Vec<UnassignedTask>,
    pub errors: Vec<AssignmentError>,
}

/// Outcome of placing a single task.
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    Assigned(Assignment),
    /// Too many overlapping tasks are already in flight.
    CapReached,
    NoEligibleWorker(AssignmentError),
}

pub struct Orchestrator {
    directory: Arc<dyn AgentDirectory>,
    matcher: Option<Arc<dyn CapabilityMatcher>>,
    engine: ScoringEngine,
    events: EventSink,
    required_agents: Vec<String>,
}

impl Orchestrator {
    pub fn new(directory: Arc<dyn AgentDirectory>, engine: ScoringEngine) -> Self {
        Self {
            directory,
            matcher: None,
            engine,
            events: EventSink::disabled(),
            required_agents: Vec::new(),
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

    /// Templates that must have at least one available worker before a pass.
    pub fn with_required_agents(mut self, templates: Vec<String>) -> Self {
        self.required_agents = templates;
        self
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn engine(&self) -> &ScoringEngine {
        &self.engine
    }

    /// Assign every unassigned task of the plan, layer by layer.
    ///
    /// Tasks that cannot be placed end up in the report's `unassigned`
    /// list; the pass itself only fails on broken bookkeeping.
    pub async fn assign(
        &self,
        scheduler: &mut Scheduler,
        plan: &ExecutionPlan,
    ) -> Result<AssignmentReport> {
        self.ensure_required_workers(&self.required_agents).await;

        let mut report = AssignmentReport::default();
        for layer in plan.layers() {
            for group in plan.groups(layer) {
                tlog_debug!(
                    "Assigning group {} of layer {} ({} tasks)",
                    group.name,
                    layer.depth,
                    group.tasks.len()
                );
                for id in &group.tasks {
                    let Some(task) = plan.task(id) else {
                        continue;
                    };
                    if scheduler.assignment(id).is_some() || scheduler.is_failed(id) {
                        continue;
                    }
                    match self.assign_task(scheduler, task, plan.graph()).await? {
                        Placement::Assigned(assignment) => report.assignments.push(assignment),
                        Placement::CapReached => report.unassigned.push(UnassignedTask {
                            task_id: *id,
                            reason: REASON_CAP_REACHED.to_string(),
                        }),
                        Placement::NoEligibleWorker(error) => {
                            report.unassigned.push(UnassignedTask {
                                task_id: *id,
                                reason: REASON_NO_ELIGIBLE_WORKER.to_string(),
                            });
                            report.errors.push(error);
                        }
                    }
                }
            }
        }

        tlog!(
            "Assignment pass: {} assigned, {} unassigned",
            report.assignments.len(),
            report.unassigned.len()
        );
        self.events.emit(SchedulerEvent::BatchComplete {
            assigned: report.assignments.len(),
            unassigned: report.unassigned.len(),
        });
        Ok(report)
    }

    /// Place one task, updating the scheduler on success.
    pub async fn assign_task(
        &self,
        scheduler: &mut Scheduler,
        task: &Task,
        graph: &TaskGraph<TaskId>,
    ) -> Result<Placement> {
        let in_flight = scheduler.in_flight_excluding_ancestors(&task.id, graph);
        if in_flight >= scheduler.config().max_concurrent_tasks {
            tlog_debug!(
                "Deferring task {}: {} overlapping tasks in flight",
                task.key,
                in_flight
            );
            return Ok(Placement::CapReached);
        }

        let candidates = self.directory.list_available().await;
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
            tlog_warn!(
                "No eligible worker for task {} among {} candidates",
                task.key,
                candidates.len()
            );
            return Ok(Placement::NoEligibleWorker(AssignmentError {
                task: task.id,
                attempted: candidates.into_iter().map(|w| w.id).collect(),
            }));
        };

        let assignment = Assignment::new(task.id, candidate);
        scheduler.bind(assignment.clone())?;
        self.events.emit(SchedulerEvent::TaskAssigned {
            task_id: task.id,
            worker_id: assignment.worker_id.clone(),
            score: assignment.score,
        });
        Ok(Placement::Assigned(assignment))
    }

    /// Spawn a worker for each template that has no available worker.
    ///
    /// Spawn failures are logged and reported as events; they never abort
    /// the caller. Returns the workers that were spawned.
    pub async fn ensure_required_workers(&self, templates: &[String]) -> Vec<WorkerId> {
        let mut spawned = Vec::new();
        if templates.is_empty() {
            return spawned;
        }

        let available = self.directory.list_available().await;
        for template in templates {
            if available.iter().any(|w| w.matches_template(template)) {
                continue;
            }
            self.events.emit(SchedulerEvent::SpawnRequested {
                template: template.clone(),
            });
            match self.directory.spawn(template).await {
                Ok(worker) => {
                    tlog!("Spawned {} from template {}", worker.id, template);
                    self.events.emit(SchedulerEvent::SpawnSucceeded {
                        template: template.clone(),
                        worker_id: worker.id.clone(),
                    });
                    spawned.push(worker.id);
                }
                Err(e) => {
                    tlog_warn!("Failed to spawn worker from template {}: {}", template, e);
                    self.events.emit(SchedulerEvent::SpawnFailed {
                        template: template.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        spawned
    }
}
