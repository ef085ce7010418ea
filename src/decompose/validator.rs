//! Request validation.
//!
//! The validator checks a raw decomposition document in a fixed order:
//! schema, duplicate ids, dangling dependency references, cycles and
//! parallel-group consistency, then the required agent templates. It
//! collects every problem it finds instead of stopping at the first one.
//!
//! ## Graceful degradation
//!
//! `requiredAgents` can only be verified against a [`TemplateCatalog`].
//! When no catalog is configured, or the catalog errors or does not answer
//! within the validation timeout, the required-agent problems are reported
//! as warnings and validation proceeds.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{Priority, TaskGraph};
use crate::decompose::request::{Complexity, DecompositionRequest, ProjectType};
use crate::error::{Error, Result};
use crate::orchestration::TemplateCatalog;
use crate::util::with_timeout;
use crate::{tlog_debug, tlog_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Schema,
    DuplicateId,
    MissingDependency,
    Cycle,
    ParallelGroup,
    RequiredAgents,
}

impl IssueKind {
    /// Dangling references and cycles are dependency problems.
    pub fn is_dependency(&self) -> bool {
        matches!(self, IssueKind::MissingDependency | IssueKind::Cycle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
    /// Caller-supplied id of the task the issue is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
}

impl ValidationIssue {
    pub fn error(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            message: message.into(),
            task: None,
        }
    }

    pub fn warning(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            message: message.into(),
            task: None,
        }
    }

    pub fn for_task(mut self, key: &str) -> Self {
        self.task = Some(key.to_string());
        self
    }
}

/// A request that passed validation, plus the warnings it produced.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    request: DecompositionRequest,
    warnings: Vec<ValidationIssue>,
}

impl ValidatedRequest {
    pub fn request(&self) -> &DecompositionRequest {
        &self.request
    }

    pub fn warnings(&self) -> &[ValidationIssue] {
        &self.warnings
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    #[serde(skip)]
    request: Option<DecompositionRequest>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.request.is_some()
    }

    fn push(&mut self, issue: ValidationIssue) {
        match issue.severity {
            Severity::Error => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
        }
    }

    /// Convert the report into a hard result.
    ///
    /// Dependency problems alone yield [`Error::Dependency`]; anything
    /// else yields [`Error::Validation`]. Both carry every error found.
    pub fn into_result(self) -> Result<ValidatedRequest> {
        if self.errors.is_empty() {
            if let Some(request) = self.request {
                return Ok(ValidatedRequest {
                    request,
                    warnings: self.warnings,
                });
            }
            return Err(Error::Internal(
                "validation produced neither errors nor a request".to_string(),
            ));
        }
        if self.errors.iter().all(|i| i.kind.is_dependency()) {
            Err(Error::Dependency {
                issues: self.errors,
            })
        } else {
            Err(Error::Validation {
                issues: self.errors,
            })
        }
    }
}

pub struct RequestValidator {
    catalog: Option<Arc<dyn TemplateCatalog>>,
    timeout: Duration,
}

impl RequestValidator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            catalog: None,
            timeout,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn TemplateCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub async fn validate(&self, raw: &Value) -> ValidationReport {
        let mut report = ValidationReport::default();

        let mut schema = Vec::new();
        check_schema(raw, &mut schema);
        if !schema.is_empty() {
            tlog_debug!("Validation: {} schema error(s)", schema.len());
            report.errors = schema;
            return report;
        }

        let request: DecompositionRequest = match serde_json::from_value(raw.clone()) {
            Ok(req) => req,
            Err(e) => {
                report.push(ValidationIssue::error(
                    IssueKind::Schema,
                    format!("Malformed document: {}", e),
                ));
                return report;
            }
        };

        let graph = check_structure(&request, &mut report);
        check_parallel_groups(&request, &graph, &mut report);
        self.check_required_agents(&request, &mut report).await;

        tlog_debug!(
            "Validation finished: {} task(s), {} error(s), {} warning(s)",
            request.tasks.len(),
            report.errors.len(),
            report.warnings.len()
        );
        report.request = Some(request);
        report
    }

    async fn check_required_agents(
        &self,
        request: &DecompositionRequest,
        report: &mut ValidationReport,
    ) {
        let Some(catalog) = &self.catalog else {
            let msg = if request.required_agents.is_empty() {
                "requiredAgents is empty and no template catalog is available to check it"
            } else {
                "No template catalog available; requiredAgents not verified"
            };
            report.push(ValidationIssue::warning(IssueKind::RequiredAgents, msg));
            return;
        };

        match with_timeout(self.timeout, catalog.template_names()).await {
            Ok(names) => {
                if request.required_agents.is_empty() {
                    report.push(ValidationIssue::error(
                        IssueKind::RequiredAgents,
                        "requiredAgents must name at least one agent template",
                    ));
                }
                let known: HashSet<&str> = names.iter().map(String::as_str).collect();
                for agent in &request.required_agents {
                    if !known.contains(agent.as_str()) {
                        report.push(ValidationIssue::error(
                            IssueKind::RequiredAgents,
                            format!("Unknown agent template: {}", agent),
                        ));
                    }
                }
            }
            Err(e) => {
                tlog_warn!("Template catalog unreachable during validation: {}", e);
                report.push(ValidationIssue::warning(
                    IssueKind::RequiredAgents,
                    format!("Template catalog unreachable ({}); requiredAgents not verified", e),
                ));
            }
        }
    }
}

fn schema_error(issues: &mut Vec<ValidationIssue>, message: String) {
    issues.push(ValidationIssue::error(IssueKind::Schema, message));
}

fn check_enum(
    obj: &serde_json::Map<String, Value>,
    field: &str,
    allowed: &[&str],
    issues: &mut Vec<ValidationIssue>,
) {
    match obj.get(field) {
        None | Some(Value::Null) => schema_error(issues, format!("{} is required", field)),
        Some(Value::String(s)) if allowed.contains(&s.as_str()) => {}
        Some(other) => schema_error(
            issues,
            format!("{} must be one of [{}], got {}", field, allowed.join(", "), other),
        ),
    }
}

fn is_non_negative_number(v: &Value) -> bool {
    v.as_f64().map(|n| n >= 0.0 && n.is_finite()).unwrap_or(false)
}

fn is_string_array(v: &Value) -> bool {
    v.as_array()
        .map(|items| items.iter().all(Value::is_string))
        .unwrap_or(false)
}

/// An optional field that is absent or explicitly `null`.
fn present(v: Option<&Value>) -> Option<&Value> {
    v.filter(|v| !v.is_null())
}

fn check_schema(raw: &Value, issues: &mut Vec<ValidationIssue>) {
    let Some(obj) = raw.as_object() else {
        schema_error(issues, "Document must be a JSON object".to_string());
        return;
    };

    check_enum(obj, "projectType", &ProjectType::VALUES, issues);
    check_enum(obj, "complexity", &Complexity::VALUES, issues);

    if !obj.get("estimatedDuration").map(is_non_negative_number).unwrap_or(false) {
        schema_error(issues, "estimatedDuration must be a non-negative number".to_string());
    }

    // Absence is judged later, against the template catalog.
    if let Some(agents) = present(obj.get("requiredAgents")) {
        if !is_string_array(agents) {
            schema_error(issues, "requiredAgents must be an array of strings".to_string());
        }
    }

    match present(obj.get("parallelizable")) {
        None => {}
        Some(Value::Array(groups)) => {
            for (i, group) in groups.iter().enumerate() {
                if !is_string_array(group) {
                    schema_error(
                        issues,
                        format!("parallelizable[{}] must be an array of task ids", i),
                    );
                }
            }
        }
        Some(_) => schema_error(issues, "parallelizable must be an array of arrays".to_string()),
    }

    let tasks = match obj.get("tasks") {
        Some(Value::Array(tasks)) if !tasks.is_empty() => tasks,
        Some(Value::Array(_)) => {
            schema_error(issues, "tasks must not be empty".to_string());
            return;
        }
        _ => {
            schema_error(issues, "tasks must be an array".to_string());
            return;
        }
    };

    for (i, task) in tasks.iter().enumerate() {
        let Some(t) = task.as_object() else {
            schema_error(issues, format!("tasks[{}] must be an object", i));
            continue;
        };
        for field in ["id", "description", "type"] {
            match t.get(field).and_then(Value::as_str) {
                Some(s) if !s.trim().is_empty() => {}
                _ => schema_error(
                    issues,
                    format!("tasks[{}].{} must be a non-empty string", i, field),
                ),
            }
        }
        if !t.get("estimatedMinutes").map(is_non_negative_number).unwrap_or(false) {
            schema_error(
                issues,
                format!("tasks[{}].estimatedMinutes must be a non-negative number", i),
            );
        }
        if let Some(deps) = present(t.get("dependsOn")) {
            if !is_string_array(deps) {
                schema_error(
                    issues,
                    format!("tasks[{}].dependsOn must be an array of task ids", i),
                );
            }
        }
        if let Some(caps) = present(t.get("requiredCapabilities")) {
            if !is_string_array(caps) {
                schema_error(
                    issues,
                    format!("tasks[{}].requiredCapabilities must be an array of strings", i),
                );
            }
        }
        if let Some(p) = present(t.get("priority")) {
            let ok = p.as_str().map(|s| Priority::VALUES.contains(&s)).unwrap_or(false);
            if !ok {
                schema_error(
                    issues,
                    format!(
                        "tasks[{}].priority must be one of [{}]",
                        i,
                        Priority::VALUES.join(", ")
                    ),
                );
            }
        }
    }
}

/// Duplicate ids, dangling references and cycles.
///
/// Returns the graph built from the first occurrence of each id and every
/// resolvable dependency, for the parallel-group check.
fn check_structure(
    request: &DecompositionRequest,
    report: &mut ValidationReport,
) -> TaskGraph<String> {
    let mut graph = TaskGraph::new();
    let mut reported = HashSet::new();
    for task in &request.tasks {
        if graph.contains(&task.id) {
            if reported.insert(task.id.clone()) {
                report.push(
                    ValidationIssue::error(
                        IssueKind::DuplicateId,
                        format!("Duplicate task id: {}", task.id),
                    )
                    .for_task(&task.id),
                );
            }
            continue;
        }
        graph.add_node(task.id.clone());
    }

    for task in &request.tasks {
        for dep in &task.depends_on {
            if !graph.contains(dep) {
                report.push(
                    ValidationIssue::error(
                        IssueKind::MissingDependency,
                        format!("Task {} depends on unknown task {}", task.id, dep),
                    )
                    .for_task(&task.id),
                );
                continue;
            }
            // Both ends were added above, so this cannot fail.
            let _ = graph.add_dependency(&task.id, dep);
        }
    }

    if let Some(cycle) = graph.find_cycle() {
        let start = cycle.first().cloned().unwrap_or_default();
        report.push(
            ValidationIssue::error(
                IssueKind::Cycle,
                format!("Circular dependency detected: {}", cycle.join(" -> ")),
            )
            .for_task(&start),
        );
    }

    graph
}

fn check_parallel_groups(
    request: &DecompositionRequest,
    graph: &TaskGraph<String>,
    report: &mut ValidationReport,
) {
    let cyclic = report.errors.iter().any(|i| i.kind == IssueKind::Cycle);
    let mut seen: HashSet<&str> = HashSet::new();

    for (i, members) in request.parallelizable.iter().enumerate() {
        for key in members {
            if !graph.contains(key) {
                report.push(
                    ValidationIssue::warning(
                        IssueKind::ParallelGroup,
                        format!("Parallel group {} names unknown task {}; ignored", i, key),
                    )
                    .for_task(key),
                );
            } else if !seen.insert(key.as_str()) {
                report.push(
                    ValidationIssue::warning(
                        IssueKind::ParallelGroup,
                        format!(
                            "Task {} appears in more than one parallel group; first group wins",
                            key
                        ),
                    )
                    .for_task(key),
                );
            }
        }

        if cyclic {
            continue;
        }
        for a in members {
            for b in members {
                if a != b && graph.contains(a) && graph.depends_on(a, b) {
                    report.push(
                        ValidationIssue::warning(
                            IssueKind::ParallelGroup,
                            format!(
                                "Task {} depends on {} within parallel group {}; it will be scheduled solo",
                                a, b, i
                            ),
                        )
                        .for_task(a),
                    );
                }
            }
        }
    }
}
