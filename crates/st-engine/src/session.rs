//! Process-level wiring: recover history, warm-start the search, run it.

use st_search::{OptimizationConfig, SearchDriver, SearchStrategy};
use st_types::{config_error, Objective, StResult};

use crate::evaluation::CorrectnessEvaluator;
use crate::generation::TextGenerator;
use crate::orchestrator::TrialOrchestrator;

/// Run a search whose history lives in the orchestrator's store.
///
/// Every stored (configuration, metric) pair is replayed into the driver
/// first, so a resumed search neither recomputes nor re-proposes them.
pub fn run_search<G, E, S>(
    orchestrator: &mut TrialOrchestrator<G, E>,
    strategy: S,
    config: OptimizationConfig,
) -> StResult<SearchDriver<S>>
where
    G: TextGenerator,
    E: CorrectnessEvaluator,
    S: SearchStrategy,
{
    if config.objective_metric != orchestrator.metric_name() {
        return Err(config_error!(
            "search optimizes {} but the orchestrator reports {}",
            config.objective_metric,
            orchestrator.metric_name()
        ));
    }

    let history = orchestrator.store().replay()?;
    let mut driver = SearchDriver::new(config, strategy);
    driver.warm_start(history);
    driver.run(orchestrator)?;

    if let Some(best) = &driver.status().best_trial {
        tracing::info!(
            "Best configuration {} with {} = {}",
            best.config,
            driver.status().config.objective_metric,
            best.objective
        );
    }
    Ok(driver)
}
