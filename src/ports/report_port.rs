//! Report output port.

use crate::domain::backtest::BacktestReport;
use crate::domain::batch::BatchEntry;
use crate::domain::error::AlphasimError;

/// Port for writing backtest results.
pub trait ReportPort {
    /// Per-date records of one run.
    fn write(&self, report: &BacktestReport, output_path: &str) -> Result<(), AlphasimError>;

    /// One summary row per batch job.
    fn write_batch(&self, entries: &[BatchEntry], output_path: &str) -> Result<(), AlphasimError>;
}
