use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use taskloom::config::{Config, SchedulerConfig};
use taskloom::core::{TaskId, Worker, WorkerId, WorkerStatus};
use taskloom::decompose::{Decomposer, Decomposition, RequestValidator};
use taskloom::orchestration::{
    AssignmentReport, EventSink, ExecutionMonitor, MemoryTaskStore, MonitorSignal, Orchestrator,
    OverlapMatcher, RecoveryManager, Scheduler, ScoringEngine, StaticDirectory, Strategy,
};
use taskloom::{tlog, tlog_debug, tlog_warn, Result};

/// Taskloom - task decomposition and capability-aware scheduling
#[derive(Parser, Debug)]
#[command(name = "taskloom")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    TASKLOOM_DEBUG=1     Enable debug logging (alternative to --debug)"
)]
pub struct Cli {
    /// Enable debug logging (writes to ~/.taskloom/taskloom.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (defaults to ~/.taskloom/taskloom.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Validate a decomposition request and print the report
    Validate {
        /// Request document (JSON)
        request: PathBuf,
    },

    /// Decompose a request and assign it against a set of workers
    Plan {
        /// Request document (JSON)
        request: PathBuf,

        /// Workers file (JSON)
        #[arg(long, short = 'w')]
        workers: PathBuf,

        /// Scoring strategy: fast, balanced or optimal
        #[arg(long, short = 's')]
        strategy: Option<Strategy>,

        /// Ceiling on overlapping tasks in flight
        #[arg(long)]
        max_concurrent: Option<usize>,
    },

    /// Plan, then follow execution driven by a signal file
    Run {
        /// Request document (JSON)
        request: PathBuf,

        /// Workers file (JSON)
        #[arg(long, short = 'w')]
        workers: PathBuf,

        /// Signals, one JSON object per line
        #[arg(long)]
        signals: PathBuf,

        /// Monitor timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

/// Workers plus the templates new workers can be spawned from.
#[derive(Debug, Deserialize)]
struct WorkersFile {
    workers: Vec<Worker>,
    /// Template name to the capabilities of a spawned worker.
    #[serde(default)]
    templates: HashMap<String, Vec<String>>,
}

/// A signal as written in a signal file, naming tasks by request id.
#[derive(Debug, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
enum SignalLine {
    TaskCompleted {
        task: String,
        #[serde(default)]
        worker_id: Option<WorkerId>,
    },
    TaskFailed {
        task: String,
        #[serde(default)]
        worker_id: Option<WorkerId>,
        reason: String,
    },
    WorkerStatusChanged {
        worker_id: WorkerId,
        status: WorkerStatus,
    },
}

impl SignalLine {
    fn resolve(self, ids: &HashMap<String, TaskId>) -> Option<MonitorSignal> {
        match self {
            SignalLine::TaskCompleted { task, worker_id } => {
                ids.get(&task).map(|&task_id| MonitorSignal::TaskCompleted { task_id, worker_id })
            }
            SignalLine::TaskFailed {
                task,
                worker_id,
                reason,
            } => ids.get(&task).map(|&task_id| MonitorSignal::TaskFailed {
                task_id,
                worker_id,
                reason,
            }),
            SignalLine::WorkerStatusChanged { worker_id, status } => {
                Some(MonitorSignal::WorkerStatusChanged { worker_id, status })
            }
        }
    }
}

/// Everything produced by a planning pass.
struct Planned {
    decomposition: Decomposition,
    scheduler: Scheduler,
    report: AssignmentReport,
    orchestrator: Orchestrator,
    recovery: RecoveryManager,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    taskloom::log::init(cli.debug);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Validate { request } => run_validate(&request, &config.scheduler),
        Command::Plan {
            request,
            workers,
            strategy,
            max_concurrent,
        } => {
            if let Some(strategy) = strategy {
                config.scheduler.strategy = strategy;
            }
            if let Some(max) = max_concurrent {
                config.scheduler.max_concurrent_tasks = max;
            }
            run_plan(&request, &workers, config.scheduler)
        }
        Command::Run {
            request,
            workers,
            signals,
            timeout_secs,
        } => {
            if let Some(secs) = timeout_secs {
                config.scheduler.monitor_timeout_secs = secs;
            }
            run_execution(&request, &workers, &signals, config.scheduler)
        }
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn run_validate(request: &Path, config: &SchedulerConfig) -> Result<()> {
    tlog!("Validate command: request={}", request.display());
    let raw = read_json(request)?;

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(RequestValidator::new(config.validation_timeout()).validate(&raw));

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_valid() {
        std::process::exit(1);
    }
    Ok(())
}

async fn plan(request: &Path, workers: &Path, config: &SchedulerConfig) -> Result<Planned> {
    let raw = read_json(request)?;
    let file: WorkersFile = serde_json::from_value(read_json(workers)?)?;

    let mut directory = StaticDirectory::new(file.workers);
    let has_templates = !file.templates.is_empty();
    for (name, caps) in file.templates {
        directory = directory.with_template(&name, caps);
    }
    let directory = Arc::new(directory);
    let store = Arc::new(MemoryTaskStore::new());

    let mut decomposer = Decomposer::new(store.clone(), config);
    if has_templates {
        decomposer = decomposer.with_catalog(directory.clone());
    }
    let decomposition = decomposer.decompose(&raw).await?;

    let (events, mut rx) = EventSink::channel(256);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            tlog_debug!("Scheduler event: {:?}", event);
        }
    });
    let orchestrator = Orchestrator::new(directory.clone(), ScoringEngine::new(config))
        .with_matcher(Arc::new(OverlapMatcher))
        .with_events(events.clone())
        .with_required_agents(decomposition.required_agents.clone());
    let recovery = RecoveryManager::new(directory, store, config)
        .with_matcher(Arc::new(OverlapMatcher))
        .with_events(events);

    let mut scheduler = Scheduler::new(config.clone());
    let report = orchestrator
        .assign(&mut scheduler, &decomposition.plan)
        .await?;

    Ok(Planned {
        decomposition,
        scheduler,
        report,
        orchestrator,
        recovery,
    })
}

fn plan_json(planned: &Planned) -> Value {
    let plan = &planned.decomposition.plan;
    let key = |id: &TaskId| plan.task(id).map(|t| t.key.clone()).unwrap_or_else(|| id.to_string());

    let layers: Vec<Value> = plan
        .layers()
        .iter()
        .map(|layer| {
            let groups: Vec<Value> = plan
                .groups(layer)
                .iter()
                .map(|g| {
                    json!({
                        "name": g.name,
                        "solo": g.solo,
                        "tasks": g.tasks.iter().map(|id| key(id)).collect::<Vec<_>>(),
                    })
                })
                .collect();
            json!({ "depth": layer.depth, "groups": groups })
        })
        .collect();

    let assignments: Vec<Value> = planned
        .scheduler
        .assignments()
        .into_iter()
        .map(|a| {
            json!({
                "task": key(&a.task_id),
                "worker": a.worker_id,
                "score": a.score,
                "strategy": a.strategy,
                "breakdown": a.breakdown,
            })
        })
        .collect();

    let unassigned: Vec<Value> = planned
        .report
        .unassigned
        .iter()
        .map(|u| json!({ "task": key(&u.task_id), "reason": u.reason }))
        .collect();

    json!({
        "layers": layers,
        "assignments": assignments,
        "unassigned": unassigned,
        "creation_failures": planned.decomposition.failures,
        "warnings": planned.decomposition.warnings,
    })
}

fn run_plan(request: &Path, workers: &Path, config: SchedulerConfig) -> Result<()> {
    tlog!(
        "Plan command: request={}, strategy={}",
        request.display(),
        config.strategy
    );
    let rt = tokio::runtime::Runtime::new()?;
    let planned = rt.block_on(plan(request, workers, &config))?;
    println!("{}", serde_json::to_string_pretty(&plan_json(&planned))?);
    Ok(())
}

fn read_signals(path: &Path, ids: &HashMap<String, TaskId>) -> Result<Vec<MonitorSignal>> {
    let text = std::fs::read_to_string(path)?;
    let mut signals = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: SignalLine = serde_json::from_str(line)?;
        match parsed.resolve(ids) {
            Some(signal) => signals.push(signal),
            None => tlog_warn!("Skipping signal on line {}: unknown task", n + 1),
        }
    }
    Ok(signals)
}

fn run_execution(
    request: &Path,
    workers: &Path,
    signals: &Path,
    config: SchedulerConfig,
) -> Result<()> {
    tlog!(
        "Run command: request={}, signals={}",
        request.display(),
        signals.display()
    );
    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(async {
        let planned = plan(request, workers, &config).await?;
        let feed = read_signals(signals, &planned.decomposition.id_map)?;

        let monitor = ExecutionMonitor::new(
            planned.decomposition.plan,
            planned.scheduler,
            planned.orchestrator,
            planned.recovery,
        )
        .with_timeout(config.monitor_timeout());

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for signal in feed {
                if tx.send(signal).await.is_err() {
                    break;
                }
            }
        });
        Ok::<_, taskloom::Error>(monitor.run(rx).await)
    })?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
