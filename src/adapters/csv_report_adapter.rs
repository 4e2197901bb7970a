//! CSV report writer.

use crate::domain::backtest::BacktestReport;
use crate::domain::batch::BatchEntry;
use crate::domain::checks::CheckName;
use crate::domain::error::AlphasimError;
use crate::domain::metrics::Summary;
use crate::domain::simulation::RunState;
use crate::ports::report_port::ReportPort;
use std::path::Path;

const RECORD_HEADER: [&str; 17] = [
    "date",
    "gross_return",
    "cost",
    "net_return",
    "turnover",
    "gross_exposure",
    "net_exposure",
    "long_count",
    "short_count",
    "ic",
    "universe_size",
    "scored",
    "missing_returns",
    "thin",
    "constraint_violation",
    "turnover_capped",
    "equity",
];

const BATCH_HEADER: [&str; 16] = [
    "field",
    "expression",
    "status",
    "periods",
    "cumulative_return",
    "annual_return",
    "annual_volatility",
    "sharpe",
    "max_drawdown",
    "avg_turnover",
    "mean_ic",
    "fitness",
    "low_sharpe",
    "low_fitness",
    "low_turnover",
    "high_turnover",
];

fn write_error(path: &str, e: impl std::fmt::Display) -> AlphasimError {
    AlphasimError::Io(std::io::Error::other(format!(
        "failed to write {}: {}",
        path, e
    )))
}

fn opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn summary_cells(summary: &Summary) -> Vec<String> {
    vec![
        summary.periods.to_string(),
        opt(summary.cumulative_return),
        opt(summary.annual_return),
        opt(summary.annual_volatility),
        opt(summary.sharpe),
        opt(summary.max_drawdown.map(|d| d.depth)),
        opt(summary.avg_turnover),
        opt(summary.mean_ic),
        opt(summary.fitness),
    ]
    .into_iter()
    .chain(CheckName::ALL.iter().map(|name| {
        summary
            .checks
            .iter()
            .find(|c| c.name == *name)
            .map(|c| c.outcome.to_string())
            .unwrap_or_default()
    }))
    .collect()
}

pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CsvReportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportPort for CsvReportAdapter {
    fn write(&self, report: &BacktestReport, output_path: &str) -> Result<(), AlphasimError> {
        let mut wtr =
            csv::Writer::from_path(Path::new(output_path)).map_err(|e| write_error(output_path, e))?;
        wtr.write_record(RECORD_HEADER)
            .map_err(|e| write_error(output_path, e))?;

        for r in &report.outcome.records {
            let row = [
                r.date.to_string(),
                r.gross_return.to_string(),
                r.cost.to_string(),
                r.net_return.to_string(),
                r.turnover.to_string(),
                r.gross_exposure.to_string(),
                r.net_exposure.to_string(),
                r.long_count.to_string(),
                r.short_count.to_string(),
                opt(r.ic),
                r.universe_size.to_string(),
                r.scored.to_string(),
                r.missing_returns.to_string(),
                r.flags.thin.to_string(),
                r.flags.constraint_violation.to_string(),
                r.flags.turnover_capped.to_string(),
                r.equity.to_string(),
            ];
            wtr.write_record(&row)
                .map_err(|e| write_error(output_path, e))?;
        }
        wtr.flush().map_err(|e| write_error(output_path, e))?;
        Ok(())
    }

    fn write_batch(&self, entries: &[BatchEntry], output_path: &str) -> Result<(), AlphasimError> {
        let mut wtr =
            csv::Writer::from_path(Path::new(output_path)).map_err(|e| write_error(output_path, e))?;
        wtr.write_record(BATCH_HEADER)
            .map_err(|e| write_error(output_path, e))?;

        for entry in entries {
            let mut row = vec![entry.job.field.clone(), entry.job.expression.clone()];
            match &entry.result {
                Ok(report) => {
                    let status = match &report.outcome.state {
                        RunState::Completed => "ok".to_string(),
                        RunState::Failed(gap) => format!("failed: {}", gap),
                        RunState::Cancelled(date) => format!("cancelled at {}", date),
                        RunState::Initialized | RunState::Running(_) => "incomplete".to_string(),
                    };
                    row.push(status);
                    row.extend(summary_cells(&report.summary));
                }
                Err(e) => {
                    row.push(format!("rejected: {}", e));
                    row.extend(std::iter::repeat_n(String::new(), BATCH_HEADER.len() - 3));
                }
            }
            wtr.write_record(&row)
                .map_err(|e| write_error(output_path, e))?;
        }
        wtr.flush().map_err(|e| write_error(output_path, e))?;
        Ok(())
    }
}
