//! Performance statistics over a run's records.

use super::calendar::TradingCalendar;
use super::checks::{CheckOutcome, CheckResult};
use super::error::AlphasimError;
use super::simulation::PerformanceRecord;
use chrono::NaiveDate;
use std::fmt;

/// Floor on average turnover in the fitness measure.
const FITNESS_TURNOVER_FLOOR: f64 = 0.125;

const EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Annualization {
    /// A fixed number of periods per year, e.g. 252.
    Fixed(f64),
    /// Periods per year implied by the trading calendar.
    FromCalendar,
}

impl fmt::Display for Annualization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Annualization::Fixed(p) => write!(f, "{} periods/year", p),
            Annualization::FromCalendar => write!(f, "from calendar"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MetricsConfig {
    /// Annual risk-free rate, e.g. 0.02.
    pub risk_free_rate: f64,
    pub annualization: Annualization,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Drawdown {
    /// Largest peak-to-trough loss as a fraction of the peak.
    pub depth: f64,
    pub peak: NaiveDate,
    pub trough: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Summary {
    pub periods: usize,
    pub periods_per_year: f64,
    pub cumulative_return: Option<f64>,
    pub annual_return: Option<f64>,
    pub annual_volatility: Option<f64>,
    pub sharpe: Option<f64>,
    pub max_drawdown: Option<Drawdown>,
    pub avg_turnover: Option<f64>,
    pub mean_ic: Option<f64>,
    pub total_cost: Option<f64>,
    pub fitness: Option<f64>,
    pub flagged_dates: usize,
    /// Empty when no `[checks]` are configured.
    pub checks: Vec<CheckResult>,
}

impl Summary {
    /// Whether every configured check passed; `None` without checks.
    pub fn passed(&self) -> Option<bool> {
        (!self.checks.is_empty())
            .then(|| self.checks.iter().all(|c| c.outcome == CheckOutcome::Pass))
    }
}

/// Turns a record series into a [`Summary`].
#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    risk_free_rate: f64,
    periods_per_year: f64,
}

impl MetricsAggregator {
    /// Resolve the annualization factor up front.
    pub fn new(config: &MetricsConfig, calendar: &TradingCalendar) -> Result<Self, AlphasimError> {
        let periods_per_year = match config.annualization {
            Annualization::Fixed(p) => p,
            Annualization::FromCalendar => {
                calendar
                    .periods_per_year()
                    .ok_or_else(|| AlphasimError::Configuration {
                        reason: "cannot infer periods per year from a calendar shorter than two dates"
                            .to_string(),
                    })?
            }
        };
        if !(periods_per_year > 0.0 && periods_per_year.is_finite()) {
            return Err(AlphasimError::Configuration {
                reason: format!("periods per year must be positive, got {}", periods_per_year),
            });
        }
        if !config.risk_free_rate.is_finite() {
            return Err(AlphasimError::Configuration {
                reason: "risk_free_rate must be finite".to_string(),
            });
        }
        Ok(Self {
            risk_free_rate: config.risk_free_rate,
            periods_per_year,
        })
    }

    pub fn periods_per_year(&self) -> f64 {
        self.periods_per_year
    }

    pub fn aggregate(&self, records: &[PerformanceRecord]) -> Summary {
        let flagged_dates = records.iter().filter(|r| r.flags.is_flagged()).count();
        let mut summary = Summary {
            periods: records.len(),
            periods_per_year: self.periods_per_year,
            cumulative_return: None,
            annual_return: None,
            annual_volatility: None,
            sharpe: None,
            max_drawdown: None,
            avg_turnover: None,
            mean_ic: None,
            total_cost: None,
            fitness: None,
            flagged_dates,
            checks: Vec::new(),
        };
        if records.len() < 2 {
            return summary;
        }

        let n = records.len() as f64;
        let returns: Vec<f64> = records.iter().map(|r| r.net_return).collect();

        let growth: f64 = returns.iter().map(|r| 1.0 + r).product();
        let cumulative = growth - 1.0;
        let annual_return = if growth > 0.0 {
            growth.powf(self.periods_per_year / n) - 1.0
        } else {
            -1.0
        };

        let (mean, std) = sample_mean_std(&returns);
        let annual_volatility = std * self.periods_per_year.sqrt();
        let sharpe = (std > EPSILON).then(|| {
            let excess = mean - self.risk_free_rate / self.periods_per_year;
            excess / std * self.periods_per_year.sqrt()
        });

        let avg_turnover = records.iter().map(|r| r.turnover).sum::<f64>() / n;
        let ics: Vec<f64> = records.iter().filter_map(|r| r.ic).collect();
        let mean_ic = (!ics.is_empty()).then(|| ics.iter().sum::<f64>() / ics.len() as f64);

        summary.cumulative_return = Some(cumulative);
        summary.annual_return = Some(annual_return);
        summary.annual_volatility = Some(annual_volatility);
        summary.sharpe = sharpe;
        summary.max_drawdown = compute_drawdown(records);
        summary.avg_turnover = Some(avg_turnover);
        summary.mean_ic = mean_ic;
        summary.total_cost = Some(records.iter().map(|r| r.cost).sum());
        summary.fitness = sharpe.map(|s| fitness(s, annual_return, avg_turnover));
        summary
    }
}

pub fn fitness(sharpe: f64, annual_return: f64, avg_turnover: f64) -> f64 {
    sharpe * (annual_return.abs() / avg_turnover.max(FITNESS_TURNOVER_FLOOR)).sqrt()
}

fn sample_mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

/// Largest peak-to-trough decline of compounded equity. Equity starts at 1.0
/// on the first record's date.
fn compute_drawdown(records: &[PerformanceRecord]) -> Option<Drawdown> {
    let first = records.first()?;
    let mut equity = 1.0;
    let mut peak = (1.0, first.date);
    let mut worst = Drawdown {
        depth: 0.0,
        peak: first.date,
        trough: first.date,
    };

    for record in records {
        equity *= 1.0 + record.net_return;
        if equity > peak.0 {
            peak = (equity, record.date);
        } else if peak.0 > 0.0 {
            let dd = (peak.0 - equity) / peak.0;
            if dd > worst.depth {
                worst = Drawdown {
                    depth: dd,
                    peak: peak.1,
                    trough: record.date,
                };
            }
        }
    }
    Some(worst)
}

/// Pearson correlation; `None` with fewer than two pairs or no variation.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let n = xs.len() as f64;
    let mx = xs.iter().sum::<f64>() / n;
    let my = ys.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        let (dx, dy) = (x - mx, y - my);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    let denom = (sxx * syy).sqrt();
    (denom > EPSILON).then(|| sxy / denom)
}
