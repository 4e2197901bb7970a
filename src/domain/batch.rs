//! Template expansion and parallel batch runs.
//!
//! A template such as `rank(-delta({data}, 5))` is instantiated once per data
//! field. The resulting backtests share the loaded store and are independent
//! of each other, so they run on the rayon pool.

use crate::domain::backtest::{BacktestReport, run_backtest};
use crate::domain::error::AlphasimError;
use crate::domain::market_data::MarketDataStore;
use crate::domain::run_config::{RunConfig, TEMPLATE_PLACEHOLDER};
use crate::domain::signal::{ExpressionSignal, SignalDefinition};
use crate::domain::simulation::CancelToken;
use rayon::prelude::*;
use tracing::{info, warn};

/// One instantiated template.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchJob {
    pub field: String,
    pub expression: String,
}

#[derive(Debug)]
pub struct BatchEntry {
    pub job: BatchJob,
    pub result: Result<BacktestReport, AlphasimError>,
}

pub fn expand_template(template: &str, fields: &[String]) -> Vec<BatchJob> {
    fields
        .iter()
        .map(|field| BatchJob {
            field: field.clone(),
            expression: template.replace(TEMPLATE_PLACEHOLDER, field),
        })
        .collect()
}

/// Parse every job and collect the signals, failing on the first bad one.
///
/// Parsing up front means a typo in the template is reported before any
/// simulation starts.
pub fn parse_jobs(jobs: &[BatchJob]) -> Result<Vec<ExpressionSignal>, AlphasimError> {
    jobs.iter()
        .map(|job| ExpressionSignal::parse(&job.expression).map_err(AlphasimError::from))
        .collect()
}

/// Run every job against `store`. Results keep the order of `jobs`; a job
/// that fails registration does not stop the others.
pub fn run_batch(
    store: &MarketDataStore,
    jobs: &[BatchJob],
    config: &RunConfig,
    cancel: &CancelToken,
) -> Result<Vec<BatchEntry>, AlphasimError> {
    let signals = parse_jobs(jobs)?;
    info!(jobs = jobs.len(), "starting batch");

    let entries: Vec<BatchEntry> = jobs
        .par_iter()
        .zip(signals.par_iter())
        .map(|(job, signal)| {
            let result = run_backtest(store, signal as &dyn SignalDefinition, config, cancel);
            if let Err(e) = &result {
                warn!(field = %job.field, error = %e, "batch job rejected");
            }
            BatchEntry {
                job: job.clone(),
                result,
            }
        })
        .collect();

    info!(
        jobs = entries.len(),
        ok = entries.iter().filter(|e| e.result.is_ok()).count(),
        "batch finished"
    );
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn expands_every_placeholder() {
        let jobs = expand_template("rank({data} / ts_mean({data}, 5))", &fields(&["close", "volume"]));
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].field, "close");
        assert_eq!(jobs[0].expression, "rank(close / ts_mean(close, 5))");
        assert_eq!(jobs[1].expression, "rank(volume / ts_mean(volume, 5))");
    }

    #[test]
    fn parse_jobs_reports_first_bad_expression() {
        let jobs = expand_template("ts_mean({data}, 5)", &fields(&["close", "bad name"]));
        let err = parse_jobs(&jobs).unwrap_err();
        assert!(matches!(err, AlphasimError::ExpressionParse(_)));

        let jobs = expand_template("ts_mean({data}, 5)", &fields(&["close", "open"]));
        assert_eq!(parse_jobs(&jobs).unwrap().len(), 2);
    }
}
