//! Capability scoring and worker selection.
//!
//! Three strategies trade decision quality for cost:
//!
//! - `fast` takes the first worker under a small workload cap.
//! - `balanced` takes the least loaded worker.
//! - `optimal` scores every eligible worker on capability, workload,
//!   specialization and history, and takes the best.
//!
//! Ties always go to the earliest candidate in directory order.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::config::{SchedulerConfig, ScoringWeights};
use crate::core::{Task, Worker, WorkerId, WorkerStatus};
use crate::orchestration::CapabilityMatcher;
use crate::{tlog_debug, tlog_warn};

/// Score used when a factor has nothing to go on.
const NEUTRAL: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Fast,
    Balanced,
    #[default]
    Optimal,
}

impl Strategy {
    pub const VALUES: [Strategy; 3] = [Strategy::Fast, Strategy::Balanced, Strategy::Optimal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Fast => "fast",
            Strategy::Balanced => "balanced",
            Strategy::Optimal => "optimal",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Strategy::VALUES
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown strategy '{}' (expected fast, balanced or optimal)", s))
    }
}

/// Per-factor contributions behind a score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub capability: f64,
    pub workload_balance: f64,
    pub specialization: f64,
    pub historical: f64,
    pub priority_bonus: f64,
}

impl ScoreBreakdown {
    fn neutral() -> Self {
        Self {
            capability: NEUTRAL,
            workload_balance: NEUTRAL,
            specialization: NEUTRAL,
            historical: NEUTRAL,
            priority_bonus: 0.0,
        }
    }

    /// Weighted sum of the factors plus the priority bonus.
    pub fn composite(&self, weights: &ScoringWeights) -> f64 {
        weights.capability * self.capability
            + weights.workload_balance * self.workload_balance
            + weights.specialization * self.specialization
            + weights.historical * self.historical
            + self.priority_bonus
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub worker_id: WorkerId,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub strategy: Strategy,
}

/// Past performance of a worker on similar tasks.
///
/// No performance feed exists yet, so every worker rates neutral.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoricalPerformance;

impl HistoricalPerformance {
    pub fn score(&self, _worker: &Worker, _task: &Task) -> f64 {
        NEUTRAL
    }
}

#[derive(Debug, Clone)]
pub struct ScoringEngine {
    strategy: Strategy,
    weights: ScoringWeights,
    max_tasks_per_worker: usize,
    fast_workload_cap: usize,
    priority_bonus: f64,
    history: HistoricalPerformance,
}

impl ScoringEngine {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            strategy: config.strategy,
            weights: config.weights,
            max_tasks_per_worker: config.max_tasks_per_worker,
            fast_workload_cap: config.fast_workload_cap,
            priority_bonus: config.priority_bonus,
            history: HistoricalPerformance,
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Pick a worker for `task` among `candidates`.
    ///
    /// Workers that are ineligible, failed or offline never win. Returns
    /// `None` when nobody is left after the strategy's workload cap.
    pub async fn select(
        &self,
        task: &Task,
        candidates: &[Worker],
        workloads: &HashMap<WorkerId, usize>,
        ineligible: &HashSet<WorkerId>,
        matcher: Option<&dyn CapabilityMatcher>,
    ) -> Option<ScoredCandidate> {
        let load = |w: &Worker| workloads.get(&w.id).copied().unwrap_or(0);
        let usable = |w: &&Worker| {
            !ineligible.contains(&w.id)
                && !matches!(w.status, WorkerStatus::Failed | WorkerStatus::Offline)
        };

        let picked = match self.strategy {
            Strategy::Fast => candidates
                .iter()
                .filter(usable)
                .find(|&w| load(w) < self.fast_workload_cap)
                .map(|w| ScoredCandidate {
                    worker_id: w.id.clone(),
                    score: NEUTRAL,
                    breakdown: ScoreBreakdown::neutral(),
                    strategy: Strategy::Fast,
                }),
            Strategy::Balanced => {
                let mut best: Option<(&Worker, usize)> = None;
                for worker in candidates.iter().filter(usable) {
                    let l = load(worker);
                    if l >= self.max_tasks_per_worker {
                        continue;
                    }
                    if best.map_or(true, |(_, b)| l < b) {
                        best = Some((worker, l));
                    }
                }
                best.map(|(w, _)| {
                    let breakdown = ScoreBreakdown {
                        workload_balance: 1.0,
                        ..ScoreBreakdown::neutral()
                    };
                    ScoredCandidate {
                        worker_id: w.id.clone(),
                        score: breakdown.composite(&self.weights),
                        breakdown,
                        strategy: Strategy::Balanced,
                    }
                })
            }
            Strategy::Optimal => {
                let eligible: Vec<Worker> = candidates
                    .iter()
                    .filter(usable)
                    .filter(|&w| load(w) < self.max_tasks_per_worker)
                    .cloned()
                    .collect();
                self.optimal(task, &eligible, workloads, matcher).await
            }
        };

        match &picked {
            Some(c) => tlog_debug!(
                "{} strategy picked {} for task {} (score {:.3})",
                self.strategy,
                c.worker_id,
                task.key,
                c.score
            ),
            None => tlog_debug!(
                "{} strategy found no eligible worker for task {} among {} candidates",
                self.strategy,
                task.key,
                candidates.len()
            ),
        }
        picked
    }

    async fn optimal(
        &self,
        task: &Task,
        eligible: &[Worker],
        workloads: &HashMap<WorkerId, usize>,
        matcher: Option<&dyn CapabilityMatcher>,
    ) -> Option<ScoredCandidate> {
        if eligible.is_empty() {
            return None;
        }

        let ranks: HashMap<WorkerId, f64> = match matcher {
            Some(m) => match m.rank_workers(eligible, task).await {
                Ok(ranks) => ranks.into_iter().map(|r| (r.worker_id, r.score)).collect(),
                Err(e) => {
                    tlog_warn!("Capability matcher failed for task {}: {}", task.key, e);
                    HashMap::new()
                }
            },
            None => HashMap::new(),
        };

        let mut best: Option<ScoredCandidate> = None;
        for worker in eligible {
            let workload = workloads.get(&worker.id).copied().unwrap_or(0);
            let breakdown = self.breakdown(task, worker, workload, ranks.get(&worker.id));
            let score = breakdown.composite(&self.weights);
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(ScoredCandidate {
                    worker_id: worker.id.clone(),
                    score,
                    breakdown,
                    strategy: Strategy::Optimal,
                });
            }
        }
        best
    }

    fn breakdown(
        &self,
        task: &Task,
        worker: &Worker,
        workload: usize,
        rank: Option<&f64>,
    ) -> ScoreBreakdown {
        let workload_balance = if self.max_tasks_per_worker == 0 {
            0.0
        } else {
            (1.0 - workload as f64 / self.max_tasks_per_worker as f64).max(0.0)
        };

        let specialization = if task.required_capabilities.is_empty() {
            NEUTRAL
        } else {
            let matched = task
                .required_capabilities
                .iter()
                .filter(|c| worker.has_capability(c))
                .count();
            matched as f64 / task.required_capabilities.len() as f64
        };

        ScoreBreakdown {
            capability: rank.copied().unwrap_or(NEUTRAL),
            workload_balance,
            specialization,
            historical: self.history.score(worker, task),
            priority_bonus: if task.is_high_priority() {
                self.priority_bonus
            } else {
                0.0
            },
        }
    }
}
