//! Trial tracking and the warm-startable search driver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use st_types::{config_error, Configuration, MetricMap, Objective, StResult, TrialError};

use crate::search::SearchStrategy;

/// Unique optimization run identifier.
pub type OptimizationId = Uuid;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ObjectiveDirection {
    #[default]
    Maximize,
    Minimize,
}

/// Top-level configuration for an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub id: OptimizationId,
    pub name: String,

    /// Metric name to optimize (e.g. "pass@32").
    pub objective_metric: String,

    pub direction: ObjectiveDirection,

    /// Maximum number of new trials to evaluate. `None` = unbounded.
    pub max_trials: Option<usize>,

    /// Wall-clock budget for new trials, in seconds. `None` = unbounded.
    pub time_budget_s: Option<u64>,

    pub created_at: DateTime<Utc>,
}

impl OptimizationConfig {
    pub fn new(name: impl Into<String>, objective_metric: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            objective_metric: objective_metric.into(),
            direction: ObjectiveDirection::Maximize,
            max_trials: None,
            time_budget_s: Some(24 * 60 * 60),
            created_at: Utc::now(),
        }
    }

    pub fn with_max_trials(mut self, n: usize) -> Self {
        self.max_trials = Some(n);
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget_s = Some(budget.as_secs());
        self
    }

    pub fn without_time_budget(mut self) -> Self {
        self.time_budget_s = None;
        self
    }

    pub fn with_direction(mut self, direction: ObjectiveDirection) -> Self {
        self.direction = direction;
        self
    }
}

/// Lifecycle state for an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Aggregate status of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStatus {
    pub id: OptimizationId,
    pub config: OptimizationConfig,
    pub state: OptimizationState,
    /// Points carried over from earlier runs.
    pub trials_restored: usize,
    pub trials_completed: usize,
    pub trials_failed: usize,
    pub best_trial: Option<TrialResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl OptimizationStatus {
    pub fn new(config: OptimizationConfig) -> Self {
        Self {
            id: config.id,
            config,
            state: OptimizationState::Pending,
            trials_restored: 0,
            trials_completed: 0,
            trials_failed: 0,
            best_trial: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = OptimizationState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = OptimizationState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = OptimizationState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Update the best trial if `result` improves on the current best.
    pub fn update_best(&mut self, result: &TrialResult) {
        let dominated = match &self.best_trial {
            None => true,
            Some(current_best) => match self.config.direction {
                ObjectiveDirection::Maximize => result.objective > current_best.objective,
                ObjectiveDirection::Minimize => result.objective < current_best.objective,
            },
        };
        if dominated {
            self.best_trial = Some(result.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// One configuration evaluated (or restored) within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub optimization_id: OptimizationId,
    pub trial_number: usize,
    pub config: Configuration,
    pub status: TrialStatus,
    pub result: Option<TrialResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(
        optimization_id: OptimizationId,
        trial_number: usize,
        config: Configuration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            optimization_id,
            trial_number,
            config,
            status: TrialStatus::Pending,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, result: TrialResult) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
    }

    pub fn mark_restored(&mut self, result: TrialResult) {
        self.status = TrialStatus::Restored;
        self.result = Some(result);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    /// Scored in an earlier run and fed back as a warm-start point.
    Restored,
    Failed,
}

/// Result of a single trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: Uuid,
    pub objective: f64,
    pub metrics: MetricMap,
    pub config: Configuration,
    pub duration_seconds: Option<f64>,
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Drives a strategy against an objective until the budget is spent.
pub struct SearchDriver<S: SearchStrategy> {
    strategy: S,
    status: OptimizationStatus,
    trials: Vec<Trial>,
}

impl<S: SearchStrategy> SearchDriver<S> {
    pub fn new(config: OptimizationConfig, strategy: S) -> Self {
        Self {
            strategy,
            status: OptimizationStatus::new(config),
            trials: Vec::new(),
        }
    }

    pub fn status(&self) -> &OptimizationStatus {
        &self.status
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Seed the run with points scored in earlier runs, so the strategy
    /// neither re-proposes them nor loses their information.
    pub fn warm_start(&mut self, points: Vec<(Configuration, f64)>) {
        let metric = self.status.config.objective_metric.clone();

        for (config, objective) in points {
            let mut trial = Trial::new(self.status.id, self.trials.len(), config.clone());
            let mut metrics = MetricMap::new();
            metrics.insert(metric.clone(), objective);
            let result = TrialResult {
                trial_id: trial.id,
                objective,
                metrics,
                config,
                duration_seconds: None,
            };

            self.strategy.report(&result.config, objective);
            self.status.update_best(&result);
            self.status.trials_restored += 1;
            trial.mark_restored(result);
            self.trials.push(trial);
        }

        if self.status.trials_restored > 0 {
            info!(
                "Warm-started {} with {} previously evaluated points",
                self.status.config.name, self.status.trials_restored
            );
        }
    }

    /// Evaluate new points until the trial or time budget is exhausted, the
    /// strategy runs dry, or the objective fails. A failure stops the search.
    pub fn run<O: Objective>(&mut self, objective: &mut O) -> StResult<&OptimizationStatus> {
        let config = &self.status.config;
        if config.max_trials.is_none() && config.time_budget_s.is_none() {
            return Err(config_error!(
                "run {} needs a trial or time budget",
                config.name
            ));
        }
        let max_trials = config.max_trials;
        let budget = config.time_budget_s.map(Duration::from_secs);
        let metric = config.objective_metric.clone();

        self.status.mark_running();
        let started = Instant::now();
        let mut evaluated = 0usize;

        loop {
            if max_trials.is_some_and(|max| evaluated >= max) {
                break;
            }
            if budget.is_some_and(|b| started.elapsed() >= b) {
                info!("Time budget exhausted after {} trials", evaluated);
                break;
            }

            let Some(candidate) = self.strategy.suggest(1).into_iter().next() else {
                info!("Strategy {} has no more points to propose", self.strategy.name());
                break;
            };

            let mut trial = Trial::new(self.status.id, self.trials.len(), candidate);
            trial.mark_running();
            let trial_started = Instant::now();

            let metrics = match objective.evaluate(&trial.config) {
                Ok(metrics) => metrics,
                Err(e) => {
                    warn!("Trial {} failed: {}", trial.trial_number, e);
                    trial.mark_failed(e.to_string());
                    self.trials.push(trial);
                    self.status.trials_failed += 1;
                    self.status.mark_failed(e.to_string());
                    return Err(e);
                }
            };

            let Some(&score) = metrics.get(&metric) else {
                let e = TrialError::MissingMetric { metric: metric.clone() };
                trial.mark_failed(e.to_string());
                self.trials.push(trial);
                self.status.trials_failed += 1;
                self.status.mark_failed(e.to_string());
                return Err(e.into());
            };

            let result = TrialResult {
                trial_id: trial.id,
                objective: score,
                metrics,
                config: trial.config.clone(),
                duration_seconds: Some(trial_started.elapsed().as_secs_f64()),
            };
            info!("Trial {} scored {} = {}", trial.trial_number, metric, score);

            self.strategy.report(&result.config, score);
            self.status.update_best(&result);
            self.status.trials_completed += 1;
            trial.mark_completed(result);
            self.trials.push(trial);
            evaluated += 1;
        }

        self.status.mark_completed();
        Ok(&self.status)
    }
}
