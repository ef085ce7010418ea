use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestration::Strategy;
use crate::{tlog_debug, Error, Result};

/// Weights of the optimal scoring strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub capability: f64,
    pub workload_balance: f64,
    pub specialization: f64,
    pub historical: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            capability: 0.4,
            workload_balance: 0.2,
            specialization: 0.3,
            historical: 0.1,
        }
    }
}

/// Tunables for validation, assignment, recovery and monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub strategy: Strategy,
    /// Ceiling on tasks that may be in flight at the same time.
    pub max_concurrent_tasks: usize,
    /// Per-worker cap used by the balanced and optimal strategies.
    pub max_tasks_per_worker: usize,
    /// Workload cap used by the fast strategy.
    pub fast_workload_cap: usize,
    pub max_reassignments: usize,
    pub priority_bonus: f64,
    pub weights: ScoringWeights,
    pub monitor_timeout_secs: u64,
    pub validation_timeout_ms: u64,
    pub store_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Optimal,
            max_concurrent_tasks: 4,
            max_tasks_per_worker: 3,
            fast_workload_cap: 2,
            max_reassignments: 3,
            priority_bonus: 0.1,
            weights: ScoringWeights::default(),
            monitor_timeout_secs: 30 * 60,
            validation_timeout_ms: 2_000,
            store_timeout_ms: 5_000,
        }
    }
}

impl SchedulerConfig {
    pub fn monitor_timeout(&self) -> Duration {
        Duration::from_secs(self.monitor_timeout_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Config {
    pub fn taskloom_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".taskloom"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::taskloom_dir()?.join("taskloom.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        tlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            tlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        tlog_debug!(
            "Config loaded: strategy={}, max_concurrent_tasks={}, max_reassignments={}",
            config.scheduler.strategy,
            config.scheduler.max_concurrent_tasks,
            config.scheduler.max_reassignments
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        tlog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}
