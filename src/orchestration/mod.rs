//! Assignment, recovery and monitoring.
//!
//! The scoring engine picks workers, the orchestrator places a plan layer
//! by layer, the recovery manager moves work off failing workers and the
//! monitor follows execution until every task is terminal. All of them
//! share one [`Scheduler`] for bookkeeping.

pub mod collaborators;
pub mod events;
pub mod monitor;
pub mod orchestrator;
pub mod recovery;
pub mod scheduler;
pub mod scoring;

pub use collaborators::{
    AgentDirectory, CapabilityMatcher, MemoryTaskStore, OverlapMatcher, StaticCatalog,
    StaticDirectory, TaskStore, TemplateCatalog, WorkerRank,
};
pub use events::{EventSink, SchedulerEvent};
pub use monitor::{ExecutionMonitor, ExecutionSummary, FailedTask, MonitorSignal};
pub use orchestrator::{
    AssignmentError, AssignmentReport, Orchestrator, Placement, UnassignedTask,
    REASON_CAP_REACHED, REASON_NO_ELIGIBLE_WORKER,
};
pub use recovery::{ReassignmentOutcome, ReassignmentRecord, RecoveryManager};
pub use scheduler::{Assignment, Scheduler};
pub use scoring::{
    HistoricalPerformance, ScoreBreakdown, ScoredCandidate, ScoringEngine, Strategy,
};
