//! Worker (agent) data model.
//!
//! Workers are owned by the external agent directory. The engine only
//! reads them and keeps its own workload bookkeeping in the scheduler.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identifier of a worker, as issued by the agent directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Idle,
    Busy,
    Failed,
    Offline,
}

impl WorkerStatus {
    /// Failed and offline workers never receive work.
    pub fn is_available(&self) -> bool {
        matches!(self, WorkerStatus::Idle | WorkerStatus::Busy)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Failed => "failed",
            WorkerStatus::Offline => "offline",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    /// Template the worker was spawned from.
    pub template: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub status: WorkerStatus,
    /// Specialization tags declared by the worker's template.
    #[serde(default)]
    pub specializations: Vec<String>,
}

impl Worker {
    pub fn new(id: impl Into<WorkerId>, template: &str) -> Self {
        Self {
            id: id.into(),
            template: template.to_string(),
            capabilities: BTreeSet::new(),
            status: WorkerStatus::Idle,
            specializations: Vec::new(),
        }
    }

    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_specializations<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.specializations = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_status(mut self, status: WorkerStatus) -> Self {
        self.status = status;
        self
    }

    pub fn has_capability(&self, cap: &str) -> bool {
        self.capabilities.contains(cap)
    }

    /// Whether this worker can stand in for a required agent template.
    pub fn matches_template(&self, template: &str) -> bool {
        self.template == template || self.specializations.iter().any(|s| s == template)
    }
}
