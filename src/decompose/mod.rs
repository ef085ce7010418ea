//! Decomposition of a project-analysis document into an execution plan.
//!
//! The pipeline is validate, sequence, then layer. Validation failures
//! abort before anything reaches the task store.

pub mod layers;
pub mod request;
pub mod sequencer;
pub mod validator;

pub use layers::{build_layers, partition_groups, ExecutionLayer, ExecutionPlan, ParallelGroup};
pub use request::{Complexity, DecompositionRequest, ProjectType, TaskRequest};
pub use sequencer::{CreationFailure, SequenceOutcome, TaskSequencer};
pub use validator::{
    IssueKind, RequestValidator, Severity, ValidatedRequest, ValidationIssue, ValidationReport,
};

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::TaskId;
use crate::error::Result;
use crate::orchestration::{TaskStore, TemplateCatalog};
use crate::{tlog, tlog_warn};

/// Result of a full decomposition.
#[derive(Debug)]
pub struct Decomposition {
    pub plan: ExecutionPlan,
    pub failures: Vec<CreationFailure>,
    pub warnings: Vec<ValidationIssue>,
    pub id_map: HashMap<String, TaskId>,
    pub required_agents: Vec<String>,
}

/// Runs validation and sequencing against one task store.
pub struct Decomposer {
    validator: RequestValidator,
    sequencer: TaskSequencer,
}

impl Decomposer {
    pub fn new(store: Arc<dyn TaskStore>, config: &SchedulerConfig) -> Self {
        Self {
            validator: RequestValidator::new(config.validation_timeout()),
            sequencer: TaskSequencer::new(store, config.store_timeout()),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn TemplateCatalog>) -> Self {
        self.validator = self.validator.with_catalog(catalog);
        self
    }

    pub async fn decompose(&self, raw: &Value) -> Result<Decomposition> {
        let validated = self.validator.validate(raw).await.into_result()?;
        for warning in validated.warnings() {
            tlog_warn!("Decomposition warning: {}", warning.message);
        }

        let outcome = self.sequencer.sequence(&validated).await?;
        let plan = ExecutionPlan::new(outcome.tasks)?;
        tlog!(
            "Decomposed {} tasks into {} layers ({} creation failures)",
            plan.tasks().len(),
            plan.layers().len(),
            outcome.failures.len()
        );

        Ok(Decomposition {
            plan,
            failures: outcome.failures,
            warnings: validated.warnings().to_vec(),
            id_map: outcome.id_map,
            required_agents: validated.request().required_agents.clone(),
        })
    }
}
