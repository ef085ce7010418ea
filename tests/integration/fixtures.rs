//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building request documents
//! - Worker pools
//! - A harness wiring the engine to in-memory collaborators

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use taskloom::config::SchedulerConfig;
use taskloom::core::{Task, TaskId, Worker};
use taskloom::decompose::{Decomposer, Decomposition};
use taskloom::orchestration::{
    ExecutionMonitor, MemoryTaskStore, Orchestrator, OverlapMatcher, RecoveryManager, Scheduler,
    ScoringEngine, StaticDirectory,
};
use taskloom::Result;

/// One task entry of a request document.
pub fn task(id: &str, depends_on: &[&str]) -> Value {
    json!({
        "id": id,
        "description": format!("Implement {}", id),
        "type": "implementation",
        "estimatedMinutes": 15,
        "dependsOn": depends_on,
    })
}

/// A valid request document around the given task entries.
pub fn request(tasks: Vec<Value>) -> Value {
    json!({
        "projectType": "web_app",
        "complexity": "moderate",
        "estimatedDuration": 120,
        "tasks": tasks,
        "requiredAgents": ["backend"],
    })
}

/// Request with the given parallel groups.
pub fn request_with_groups(tasks: Vec<Value>, groups: &[&[&str]]) -> Value {
    let mut doc = request(tasks);
    doc["parallelizable"] = json!(groups);
    doc
}

/// `n` interchangeable backend workers named `w1..wn`.
pub fn workers(n: usize) -> Vec<Worker> {
    (1..=n)
        .map(|i| Worker::new(format!("w{}", i), "backend").with_capabilities(["rust"]))
        .collect()
}

/// Engine wired to in-memory collaborators.
pub struct Harness {
    pub config: SchedulerConfig,
    pub store: Arc<MemoryTaskStore>,
    pub directory: Arc<StaticDirectory>,
}

impl Harness {
    pub fn new(workers: Vec<Worker>, config: SchedulerConfig) -> Self {
        Self {
            config,
            store: Arc::new(MemoryTaskStore::new()),
            directory: Arc::new(StaticDirectory::new(workers)),
        }
    }

    pub fn with_store(mut self, store: MemoryTaskStore) -> Self {
        self.store = Arc::new(store);
        self
    }

    pub async fn decompose(&self, raw: &Value) -> Result<Decomposition> {
        Decomposer::new(self.store.clone(), &self.config)
            .decompose(raw)
            .await
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.directory.clone(), ScoringEngine::new(&self.config))
            .with_matcher(Arc::new(OverlapMatcher))
    }

    pub fn recovery(&self) -> RecoveryManager {
        RecoveryManager::new(self.directory.clone(), self.store.clone(), &self.config)
            .with_matcher(Arc::new(OverlapMatcher))
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.config.clone())
    }

    /// Decompose, run one assignment pass and hand everything to a monitor.
    pub async fn monitor(&self, raw: &Value) -> (ExecutionMonitor, HashMap<String, TaskId>) {
        let Decomposition { plan, id_map, .. } = self.decompose(raw).await.unwrap();
        let orchestrator = self.orchestrator();
        let mut scheduler = self.scheduler();
        orchestrator.assign(&mut scheduler, &plan).await.unwrap();

        let monitor = ExecutionMonitor::new(plan, scheduler, orchestrator, self.recovery());
        (monitor, id_map)
    }
}

/// Id of the task created for request key `key`.
pub fn id_of(decomposition: &Decomposition, key: &str) -> TaskId {
    decomposition.id_map[key]
}

/// The created task for request key `key`.
pub fn task_of<'a>(decomposition: &'a Decomposition, key: &str) -> &'a Task {
    decomposition
        .plan
        .task(&id_of(decomposition, key))
        .expect("task in plan")
}
