//! Execution layers and parallel groups.
//!
//! A task's layer is its dependency depth. Processing layers in increasing
//! order never dispatches a task before its dependencies have been
//! dispatched; waiting for them to complete is the monitor's job.

use serde::Serialize;
use std::collections::HashMap;

use crate::core::{Task, TaskGraph, TaskId};
use crate::decompose::validator::{IssueKind, ValidationIssue};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionLayer {
    pub depth: usize,
    pub tasks: Vec<TaskId>,
}

/// Tasks of one layer meant to be dispatched together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParallelGroup {
    pub name: String,
    pub tasks: Vec<TaskId>,
    /// A single task scheduled on its own.
    pub solo: bool,
}

impl ParallelGroup {
    fn solo(task: &Task) -> Self {
        Self {
            name: format!("solo-{}", task.key),
            tasks: vec![task.id],
            solo: true,
        }
    }
}

fn task_graph(tasks: &[Task]) -> Result<TaskGraph<TaskId>> {
    let mut graph = TaskGraph::new();
    for task in tasks {
        graph.add_node(task.id);
    }
    for task in tasks {
        for dep in &task.dependencies {
            if !graph.contains(dep) {
                return Err(Error::Dependency {
                    issues: vec![ValidationIssue::error(
                        IssueKind::MissingDependency,
                        format!(
                            "Task {} depends on {} which is not part of the plan",
                            task.key, dep
                        ),
                    )
                    .for_task(&task.key)],
                });
            }
            graph.add_dependency(&task.id, dep)?;
        }
    }
    if let Some(cycle) = graph.find_cycle() {
        let path: Vec<String> = cycle.iter().map(|id| id.short()).collect();
        return Err(Error::Dependency {
            issues: vec![ValidationIssue::error(
                IssueKind::Cycle,
                format!("Circular dependency detected: {}", path.join(" -> ")),
            )],
        });
    }
    Ok(graph)
}

fn layers_from(tasks: &[Task], graph: &TaskGraph<TaskId>) -> Result<Vec<ExecutionLayer>> {
    let depths = graph.depths()?;
    let max = depths.values().copied().max();
    let mut layers: Vec<ExecutionLayer> = match max {
        Some(max) => (0..=max)
            .map(|depth| ExecutionLayer {
                depth,
                tasks: Vec::new(),
            })
            .collect(),
        None => Vec::new(),
    };
    for task in tasks {
        layers[depths[&task.id]].tasks.push(task.id);
    }
    Ok(layers)
}

/// Partition tasks into layers by dependency depth.
///
/// Fails with [`Error::Dependency`] if a task depends on something
/// outside `tasks` or the tasks form a cycle.
pub fn build_layers(tasks: &[Task]) -> Result<Vec<ExecutionLayer>> {
    let graph = task_graph(tasks)?;
    layers_from(tasks, &graph)
}

/// Split a layer into parallel groups.
///
/// Named groups keep the order in which they first appear. Ungrouped
/// tasks, and group members that depend on another member of their group,
/// become solo groups.
pub fn partition_groups(
    layer: &ExecutionLayer,
    tasks: &HashMap<TaskId, &Task>,
    graph: &TaskGraph<TaskId>,
) -> Vec<ParallelGroup> {
    let mut groups: Vec<ParallelGroup> = Vec::new();
    let mut named: HashMap<&str, usize> = HashMap::new();

    for id in &layer.tasks {
        let Some(task) = tasks.get(id) else {
            continue;
        };
        let name = match (&task.parallel_group, task.can_run_in_parallel) {
            (Some(name), true) => name.as_str(),
            _ => {
                groups.push(ParallelGroup::solo(task));
                continue;
            }
        };

        match named.get(name) {
            Some(&i) => {
                let conflict = groups[i]
                    .tasks
                    .iter()
                    .any(|m| graph.depends_on(id, m) || graph.depends_on(m, id));
                if conflict {
                    groups.push(ParallelGroup::solo(task));
                } else {
                    groups[i].tasks.push(*id);
                }
            }
            None => {
                named.insert(name, groups.len());
                groups.push(ParallelGroup {
                    name: name.to_string(),
                    tasks: vec![*id],
                    solo: false,
                });
            }
        }
    }

    groups
}

/// Tasks, their graph and their layers, ready for assignment.
#[derive(Debug)]
pub struct ExecutionPlan {
    tasks: Vec<Task>,
    positions: HashMap<TaskId, usize>,
    graph: TaskGraph<TaskId>,
    layers: Vec<ExecutionLayer>,
}

impl ExecutionPlan {
    pub fn new(tasks: Vec<Task>) -> Result<Self> {
        let graph = task_graph(&tasks)?;
        let layers = layers_from(&tasks, &graph)?;
        let positions = tasks.iter().enumerate().map(|(i, t)| (t.id, i)).collect();
        Ok(Self {
            tasks,
            positions,
            graph,
            layers,
        })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.positions.get(id).map(|&i| &self.tasks[i])
    }

    /// Mutable access for lifecycle updates. Dependencies must not change.
    pub(crate) fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.positions.get(id).map(|&i| &mut self.tasks[i])
    }

    pub fn graph(&self) -> &TaskGraph<TaskId> {
        &self.graph
    }

    pub fn layers(&self) -> &[ExecutionLayer] {
        &self.layers
    }

    pub fn groups(&self, layer: &ExecutionLayer) -> Vec<ParallelGroup> {
        let index: HashMap<TaskId, &Task> = self.tasks.iter().map(|t| (t.id, t)).collect();
        partition_groups(layer, &index, &self.graph)
    }

    /// Sum of all task estimates, in minutes.
    pub fn sequential_minutes(&self) -> u64 {
        self.tasks.iter().map(|t| u64::from(t.estimated_minutes)).sum()
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }
}
