//! Pass/fail grading of a run summary against configured thresholds.
//!
//! Each check compares one summary statistic to a limit. A statistic the run
//! could not produce (too few records, zero volatility) fails its check.

use super::error::AlphasimError;
use super::metrics::Summary;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum CheckName {
    LowSharpe,
    LowFitness,
    LowTurnover,
    HighTurnover,
}

impl CheckName {
    pub const ALL: [CheckName; 4] = [
        CheckName::LowSharpe,
        CheckName::LowFitness,
        CheckName::LowTurnover,
        CheckName::HighTurnover,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CheckName::LowSharpe => "LOW_SHARPE",
            CheckName::LowFitness => "LOW_FITNESS",
            CheckName::LowTurnover => "LOW_TURNOVER",
            CheckName::HighTurnover => "HIGH_TURNOVER",
        }
    }
}

impl fmt::Display for CheckName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum CheckOutcome {
    Pass,
    Fail,
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckOutcome::Pass => write!(f, "PASS"),
            CheckOutcome::Fail => write!(f, "FAIL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CheckResult {
    pub name: CheckName,
    pub value: Option<f64>,
    pub limit: f64,
    pub outcome: CheckOutcome,
}

/// Thresholds from the `[checks]` section. Turnover limits are fractions of
/// the book traded per date.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CheckConfig {
    pub min_sharpe: f64,
    pub min_fitness: f64,
    pub min_turnover: f64,
    pub max_turnover: f64,
}

impl CheckConfig {
    pub fn validate(&self) -> Result<(), AlphasimError> {
        let fail = |reason: String| Err(AlphasimError::Configuration { reason });
        for (key, v) in [
            ("min_sharpe", self.min_sharpe),
            ("min_fitness", self.min_fitness),
            ("min_turnover", self.min_turnover),
            ("max_turnover", self.max_turnover),
        ] {
            if !v.is_finite() {
                return fail(format!("checks.{} must be finite, got {}", key, v));
            }
        }
        if self.min_turnover < 0.0 {
            return fail(format!(
                "checks.min_turnover must not be negative, got {}",
                self.min_turnover
            ));
        }
        if self.min_turnover > self.max_turnover {
            return fail(format!(
                "checks.min_turnover {} exceeds checks.max_turnover {}",
                self.min_turnover, self.max_turnover
            ));
        }
        Ok(())
    }

    /// One result per check, in [`CheckName::ALL`] order.
    pub fn evaluate(&self, summary: &Summary) -> Vec<CheckResult> {
        CheckName::ALL
            .into_iter()
            .map(|name| {
                let (value, limit) = match name {
                    CheckName::LowSharpe => (summary.sharpe, self.min_sharpe),
                    CheckName::LowFitness => (summary.fitness, self.min_fitness),
                    CheckName::LowTurnover => (summary.avg_turnover, self.min_turnover),
                    CheckName::HighTurnover => (summary.avg_turnover, self.max_turnover),
                };
                let passed = value.is_some_and(|v| match name {
                    CheckName::HighTurnover => v <= limit,
                    _ => v >= limit,
                });
                CheckResult {
                    name,
                    value,
                    limit,
                    outcome: if passed {
                        CheckOutcome::Pass
                    } else {
                        CheckOutcome::Fail
                    },
                }
            })
            .collect()
    }
}
