//! Typed form of the decomposition document.
//!
//! The document arrives as JSON (camelCase) from an external response
//! parser. It is only deserialized into these types after the validator
//! has checked its structure, so schema problems are reported as a full
//! list rather than serde's first error.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use crate::core::{Priority, TaskGraph};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    WebApp,
    Api,
    Cli,
    Library,
    Mobile,
    DataPipeline,
    Infrastructure,
    Other,
}

impl ProjectType {
    pub const VALUES: [&'static str; 8] = [
        "web_app",
        "api",
        "cli",
        "library",
        "mobile",
        "data_pipeline",
        "infrastructure",
        "other",
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    pub const VALUES: [&'static str; 3] = ["simple", "moderate", "complex"];
}

/// Optional fields may come through as explicit `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub id: String,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub estimated_minutes: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub depends_on: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub priority: Priority,
    #[serde(default, deserialize_with = "null_as_default")]
    pub required_capabilities: Vec<String>,
}

impl TaskRequest {
    /// Whole minutes, rounded up so a fractional estimate never becomes zero.
    pub fn minutes(&self) -> u32 {
        self.estimated_minutes.max(0.0).ceil() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecompositionRequest {
    pub project_type: ProjectType,
    pub complexity: Complexity,
    pub estimated_duration: f64,
    pub tasks: Vec<TaskRequest>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub required_agents: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parallelizable: Vec<Vec<String>>,
}

impl DecompositionRequest {
    pub fn task(&self, key: &str) -> Option<&TaskRequest> {
        self.tasks.iter().find(|t| t.id == key)
    }

    /// Name of the parallel group each task belongs to.
    ///
    /// Groups are named `group-<n>` after their position in
    /// `parallelizable`. A task listed in several groups keeps the first.
    pub fn parallel_groups(&self) -> HashMap<String, String> {
        let mut groups = HashMap::new();
        for (i, members) in self.parallelizable.iter().enumerate() {
            for key in members {
                groups
                    .entry(key.clone())
                    .or_insert_with(|| format!("group-{}", i));
            }
        }
        groups
    }

    /// Strict dependency graph over task keys.
    ///
    /// Fails on any reference the validator would have rejected.
    pub fn dependency_graph(&self) -> Result<TaskGraph<String>> {
        let mut graph = TaskGraph::new();
        for task in &self.tasks {
            graph.add_node(task.id.clone());
        }
        for task in &self.tasks {
            for dep in &task.depends_on {
                if !graph.contains(dep) {
                    return Err(Error::Internal(format!(
                        "Task {} depends on unknown task {}",
                        task.id, dep
                    )));
                }
                graph.add_dependency(&task.id, dep)?;
            }
        }
        Ok(graph)
    }
}
