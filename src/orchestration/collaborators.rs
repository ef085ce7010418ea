//! External collaborators of the engine and their in-memory versions.
//!
//! Every call through one of these traits is a suspension point; no other
//! place in the engine awaits. The in-memory implementations back the CLI
//! and the test suites.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::core::{Task, TaskId, TaskSpec, Worker, WorkerId, WorkerStatus};
use crate::error::{Error, Result};

/// Persists tasks and hands out their ids.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, spec: TaskSpec) -> Result<Task>;
    async fn get_task(&self, id: &TaskId) -> Option<Task>;
}

/// Source of workers.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// Workers that can currently take work, in directory order.
    async fn list_available(&self) -> Vec<Worker>;
    async fn get_worker(&self, id: &WorkerId) -> Option<Worker>;
    /// Start a new worker from a template.
    async fn spawn(&self, template: &str) -> Result<Worker>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRank {
    pub worker_id: WorkerId,
    pub score: f64,
}

/// Optional capability ranking used by the optimal strategy.
#[async_trait]
pub trait CapabilityMatcher: Send + Sync {
    async fn rank_workers(&self, workers: &[Worker], task: &Task) -> Result<Vec<WorkerRank>>;
}

/// Optional catalog of worker templates used to check `requiredAgents`.
#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    async fn template_names(&self) -> Result<Vec<String>>;
}

/// Task store kept in memory.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
    reject: HashSet<String>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that refuses to create the tasks with the given keys.
    pub fn with_rejections<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tasks: RwLock::new(HashMap::new()),
            reject: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task(&self, spec: TaskSpec) -> Result<Task> {
        if self.reject.contains(&spec.key) {
            return Err(Error::TaskStore(format!("store rejected task {}", spec.key)));
        }
        let task = Task::from_spec(spec);
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: &TaskId) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }
}

/// Agent directory over a fixed worker list plus spawnable templates.
#[derive(Default)]
pub struct StaticDirectory {
    workers: RwLock<Vec<Worker>>,
    /// Template name to the capabilities a spawned worker gets.
    templates: HashMap<String, BTreeSet<String>>,
    spawned: AtomicUsize,
}

impl StaticDirectory {
    pub fn new(workers: Vec<Worker>) -> Self {
        Self {
            workers: RwLock::new(workers),
            templates: HashMap::new(),
            spawned: AtomicUsize::new(0),
        }
    }

    pub fn with_template<I, S>(mut self, name: &str, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.templates.insert(
            name.to_string(),
            capabilities.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub async fn add_worker(&self, worker: Worker) {
        self.workers.write().await.push(worker);
    }

    /// Update a worker's status. Returns false for unknown workers.
    pub async fn set_status(&self, id: &WorkerId, status: WorkerStatus) -> bool {
        let mut workers = self.workers.write().await;
        match workers.iter_mut().find(|w| &w.id == id) {
            Some(worker) => {
                worker.status = status;
                true
            }
            None => false,
        }
    }

    pub async fn all(&self) -> Vec<Worker> {
        self.workers.read().await.clone()
    }
}

#[async_trait]
impl AgentDirectory for StaticDirectory {
    async fn list_available(&self) -> Vec<Worker> {
        self.workers
            .read()
            .await
            .iter()
            .filter(|w| w.status.is_available())
            .cloned()
            .collect()
    }

    async fn get_worker(&self, id: &WorkerId) -> Option<Worker> {
        self.workers.read().await.iter().find(|w| &w.id == id).cloned()
    }

    async fn spawn(&self, template: &str) -> Result<Worker> {
        let caps = self
            .templates
            .get(template)
            .ok_or_else(|| Error::Directory(format!("unknown worker template: {}", template)))?;
        let n = self.spawned.fetch_add(1, Ordering::SeqCst) + 1;
        let worker = Worker::new(format!("{}-{}", template, n), template)
            .with_capabilities(caps.iter().cloned())
            .with_specializations([template]);
        self.workers.write().await.push(worker.clone());
        Ok(worker)
    }
}

#[async_trait]
impl TemplateCatalog for StaticDirectory {
    async fn template_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Fixed list of template names.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog(pub Vec<String>);

#[async_trait]
impl TemplateCatalog for StaticCatalog {
    async fn template_names(&self) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// Ranks workers by Jaccard overlap between their capabilities and the
/// task's required capabilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlapMatcher;

#[async_trait]
impl CapabilityMatcher for OverlapMatcher {
    async fn rank_workers(&self, workers: &[Worker], task: &Task) -> Result<Vec<WorkerRank>> {
        let required: BTreeSet<&str> = task
            .required_capabilities
            .iter()
            .map(String::as_str)
            .collect();
        Ok(workers
            .iter()
            .map(|w| {
                let have: BTreeSet<&str> = w.capabilities.iter().map(String::as_str).collect();
                let union = required.union(&have).count();
                let score = if union == 0 {
                    0.5
                } else {
                    required.intersection(&have).count() as f64 / union as f64
                };
                WorkerRank {
                    worker_id: w.id.clone(),
                    score,
                }
            })
            .collect())
    }
}
