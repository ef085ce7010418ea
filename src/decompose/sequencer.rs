//! Task creation in dependency order.
//!
//! The sequencer walks the validated request in topological order and
//! creates each task through the [`TaskStore`], mapping caller-supplied
//! keys to persisted ids as it goes. A dependency therefore always has a
//! persisted id by the time its dependents are created.
//!
//! A store rejection does not stop the run. The rejected task is recorded
//! as a [`CreationFailure`], and each of its dependents fails in turn when
//! its dependency list is translated. That way a failure propagates as a
//! readable chain instead of leaving a partial graph.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{Task, TaskId, TaskSpec};
use crate::decompose::validator::ValidatedRequest;
use crate::error::{Error, Result};
use crate::orchestration::TaskStore;
use crate::util::with_timeout;
use crate::{tlog_debug, tlog_warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreationFailure {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct SequenceOutcome {
    /// Created tasks, in creation order.
    pub tasks: Vec<Task>,
    pub id_map: HashMap<String, TaskId>,
    pub failures: Vec<CreationFailure>,
}

pub struct TaskSequencer {
    store: Arc<dyn TaskStore>,
    timeout: Duration,
}

impl TaskSequencer {
    pub fn new(store: Arc<dyn TaskStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn sequence(&self, validated: &ValidatedRequest) -> Result<SequenceOutcome> {
        let request = validated.request();
        let order = request.dependency_graph()?.topological_order()?;
        let groups = request.parallel_groups();

        let mut outcome = SequenceOutcome::default();
        let mut failed: HashSet<String> = HashSet::new();

        for key in order {
            let task = request
                .task(&key)
                .ok_or_else(|| Error::Internal(format!("Sequenced unknown task {}", key)))?;

            let mut dependencies = Vec::with_capacity(task.depends_on.len());
            let mut blocked_by = None;
            for dep in &task.depends_on {
                if let Some(id) = outcome.id_map.get(dep) {
                    dependencies.push(*id);
                } else if failed.contains(dep) {
                    blocked_by = Some(dep.clone());
                    break;
                } else {
                    return Err(Error::Internal(format!(
                        "Dependency {} of task {} has no persisted id; topological order violated",
                        dep, key
                    )));
                }
            }

            if let Some(dep) = blocked_by {
                tlog_warn!("Skipping creation of {}: dependency {} was not created", key, dep);
                outcome.failures.push(CreationFailure {
                    key: key.clone(),
                    reason: format!("dependency `{}` was not created", dep),
                });
                failed.insert(key);
                continue;
            }

            let parallel_group = groups.get(&key).cloned();
            let spec = TaskSpec {
                key: key.clone(),
                description: task.description.clone(),
                task_type: task.task_type.clone(),
                dependencies,
                required_capabilities: task.required_capabilities.clone(),
                priority: task.priority,
                estimated_minutes: task.minutes(),
                can_run_in_parallel: parallel_group.is_some(),
                parallel_group,
            };

            match with_timeout(self.timeout, self.store.create_task(spec)).await {
                Ok(created) => {
                    tlog_debug!("Created task {} as {}", key, created.id.short());
                    outcome.id_map.insert(key, created.id);
                    outcome.tasks.push(created);
                }
                Err(e) => {
                    tlog_warn!("Task store failed to create {}: {}", key, e);
                    outcome.failures.push(CreationFailure {
                        key: key.clone(),
                        reason: e.to_string(),
                    });
                    failed.insert(key);
                }
            }
        }

        Ok(outcome)
    }
}
