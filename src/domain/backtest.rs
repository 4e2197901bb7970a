//! One backtest: register a signal, simulate the configured range and
//! summarise the result.

use crate::domain::error::AlphasimError;
use crate::domain::market_data::MarketDataStore;
use crate::domain::metrics::{MetricsAggregator, Summary};
use crate::domain::position_builder::PositionBuilder;
use crate::domain::run_config::RunConfig;
use crate::domain::signal::{SignalDefinition, SignalEvaluator};
use crate::domain::simulation::{CancelToken, RunOutcome, SimulationEngine};

#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub signal: String,
    pub outcome: RunOutcome,
    pub summary: Summary,
}

/// Run `signal` over the configured date range.
///
/// Configuration and registration problems are errors. A data gap during
/// the run is not: it ends the run early and is reported in
/// `outcome.state` alongside the records produced before it.
pub fn run_backtest(
    store: &MarketDataStore,
    signal: &dyn SignalDefinition,
    config: &RunConfig,
    cancel: &CancelToken,
) -> Result<BacktestReport, AlphasimError> {
    let evaluator = SignalEvaluator::register(signal, store, config.evaluator)?;
    let builder = PositionBuilder::new(config.positions.clone())?;
    let aggregator = MetricsAggregator::new(&config.metrics, store.calendar())?;

    let engine = SimulationEngine::new(store, evaluator, builder, config.costs.clone());
    let outcome = engine.run(config.start_date, config.end_date, cancel);
    let mut summary = aggregator.aggregate(&outcome.records);
    if let Some(checks) = &config.checks {
        summary.checks = checks.evaluate(&summary);
    }

    Ok(BacktestReport {
        signal: signal.name().to_string(),
        outcome,
        summary,
    })
}
