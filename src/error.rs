use thiserror::Error;

use crate::core::{TaskId, WorkerId};
use crate::decompose::ValidationIssue;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation failed: {}", summarize(issues))]
    Validation { issues: Vec<ValidationIssue> },

    #[error("Dependency error: {}", summarize(issues))]
    Dependency { issues: Vec<ValidationIssue> },

    #[error("No eligible worker for task {task} (considered: {})", join_workers(attempted))]
    Assignment {
        task: TaskId,
        attempted: Vec<WorkerId>,
    },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Reassignment attempts exhausted for task {task} after {attempts} attempts")]
    ReassignmentExhausted { task: TaskId, attempts: usize },

    #[error("Task store error: {0}")]
    TaskStore(String),

    #[error("Agent directory error: {0}")]
    Directory(String),

    #[error("Capability matcher error: {0}")]
    Matcher(String),

    #[error("Template catalog error: {0}")]
    Catalog(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Issues carried by a rejected decomposition, if any.
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            Error::Validation { issues } | Error::Dependency { issues } => issues,
            _ => &[],
        }
    }
}

fn summarize(issues: &[ValidationIssue]) -> String {
    match issues.first() {
        Some(first) if issues.len() > 1 => {
            format!("{} (and {} more)", first.message, issues.len() - 1)
        }
        Some(first) => first.message.clone(),
        None => "no issues recorded".to_string(),
    }
}

fn join_workers(workers: &[WorkerId]) -> String {
    if workers.is_empty() {
        return "none".to_string();
    }
    workers
        .iter()
        .map(|w| w.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, Error>;
