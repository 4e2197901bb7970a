//! Alpha expression evaluation.
//!
//! Evaluates an [`Expr`] for one instrument against a [`HistoryView`].
//!
//! # Evaluation Semantics
//!
//! - Any missing input makes the node `None`; nothing is imputed
//! - Division by (near) zero, `log` of a non-positive value and `sqrt` of a
//!   negative value are `None`
//! - Window operators need every sample in the window; a partial window is
//!   `None`
//! - Non-finite intermediate results are `None`

use crate::domain::expression::{BinaryOp, Expr, PairFunc, SeriesFunc, UnaryFunc};
use crate::domain::market_data::HistoryView;

const EPSILON: f64 = 1e-12;

/// Evaluate `expr` on the view's current session.
pub fn evaluate(expr: &Expr, view: &HistoryView<'_>) -> Option<f64> {
    eval_at(expr, view, 0)
}

fn eval_at(expr: &Expr, view: &HistoryView<'_>, lag: usize) -> Option<f64> {
    let value = match expr {
        Expr::Constant(v) => *v,
        Expr::Field(name) => view.value(name, lag)?,
        Expr::Neg(arg) => -eval_at(arg, view, lag)?,
        Expr::Binary { op, left, right } => {
            let a = eval_at(left, view, lag)?;
            let b = eval_at(right, view, lag)?;
            match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => {
                    if b.abs() < EPSILON {
                        return None;
                    }
                    a / b
                }
            }
        }
        Expr::Unary { func, arg } => {
            let x = eval_at(arg, view, lag)?;
            match func {
                UnaryFunc::Abs => x.abs(),
                UnaryFunc::Log if x > 0.0 => x.ln(),
                UnaryFunc::Log => return None,
                UnaryFunc::Sign if x == 0.0 => 0.0,
                UnaryFunc::Sign => x.signum(),
                UnaryFunc::Sqrt if x >= 0.0 => x.sqrt(),
                UnaryFunc::Sqrt => return None,
            }
        }
        Expr::Pair { func, left, right } => {
            let a = eval_at(left, view, lag)?;
            let b = eval_at(right, view, lag)?;
            match func {
                PairFunc::Min => a.min(b),
                PairFunc::Max => a.max(b),
            }
        }
        Expr::Series { func, arg, window } => eval_series(*func, arg, *window, view, lag)?,
    };
    value.is_finite().then_some(value)
}

fn eval_series(
    func: SeriesFunc,
    arg: &Expr,
    window: usize,
    view: &HistoryView<'_>,
    lag: usize,
) -> Option<f64> {
    match func {
        SeriesFunc::Delay => eval_at(arg, view, lag.checked_add(window)?),
        SeriesFunc::Delta => {
            Some(eval_at(arg, view, lag)? - eval_at(arg, view, lag.checked_add(window)?)?)
        }
        SeriesFunc::Returns => {
            let now = eval_at(arg, view, lag)?;
            let then = eval_at(arg, view, lag.checked_add(window)?)?;
            if then.abs() < EPSILON {
                return None;
            }
            Some(now / then - 1.0)
        }
        _ => {
            // samples[0] is the current session, samples[window - 1] the oldest.
            let samples: Vec<f64> = (0..window)
                .map(|k| eval_at(arg, view, lag.checked_add(k)?))
                .collect::<Option<_>>()?;
            window_stat(func, &samples)
        }
    }
}

fn window_stat(func: SeriesFunc, samples: &[f64]) -> Option<f64> {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    match func {
        SeriesFunc::TsMean => Some(mean),
        SeriesFunc::TsSum => Some(samples.iter().sum()),
        SeriesFunc::TsMin => samples.iter().copied().reduce(f64::min),
        SeriesFunc::TsMax => samples.iter().copied().reduce(f64::max),
        SeriesFunc::TsStd => sample_std(samples, mean),
        SeriesFunc::TsZscore => {
            let std = sample_std(samples, mean)?;
            if std < EPSILON {
                return None;
            }
            Some((samples[0] - mean) / std)
        }
        SeriesFunc::TsRank => {
            // Position of the current value within the window, in [0, 1].
            let current = samples[0];
            let (below, equal) = samples[1..].iter().fold((0usize, 0usize), |(b, e), &v| {
                if v < current {
                    (b + 1, e)
                } else if v == current {
                    (b, e + 1)
                } else {
                    (b, e)
                }
            });
            Some((below as f64 + 0.5 * equal as f64) / (samples.len() - 1) as f64)
        }
        SeriesFunc::Delay | SeriesFunc::Delta | SeriesFunc::Returns => None,
    }
}

fn sample_std(samples: &[f64], mean: f64) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let var = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (samples.len() - 1) as f64;
    Some(var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::calendar::TradingCalendar;
    use crate::domain::expression_parser::parse;
    use crate::domain::market_data::{MarketDataStore, RawRecord};
    use crate::domain::universe::{InstrumentId, UniverseFilter};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    /// Five sessions of AAA with close 10, 11, 12, 13, 14 and a volume gap on
    /// day 3.
    fn store() -> MarketDataStore {
        let days = [2, 3, 4, 5, 8];
        let calendar = TradingCalendar::new(days.iter().map(|&x| d(x)).collect()).unwrap();
        let records = days.iter().enumerate().map(|(i, &x)| {
            let volume = if x == 4 { None } else { Some(100.0 * (i + 1) as f64) };
            RawRecord::new("AAA", d(x))
                .with("close", Some(10.0 + i as f64))
                .with("volume", volume)
        });
        MarketDataStore::from_records(calendar, "close", UniverseFilter::default(), records)
    }

    fn eval(source: &str, day: u32) -> Option<f64> {
        let store = store();
        let id = InstrumentId::new("AAA");
        let view = store.history(&id, d(day)).unwrap();
        evaluate(&parse(source).unwrap().body, &view)
    }

    #[test]
    fn field_and_arithmetic() {
        assert_relative_eq!(eval("close * 2 + 1", 8).unwrap(), 29.0);
        assert_relative_eq!(eval("-close", 2).unwrap(), -10.0);
    }

    #[test]
    fn division_by_zero_is_undefined() {
        assert_eq!(eval("close / (close - close)", 8), None);
    }

    #[test]
    fn log_and_sqrt_domains() {
        assert_eq!(eval("log(close - 20)", 8), None);
        assert_eq!(eval("sqrt(close - 20)", 8), None);
        assert_relative_eq!(eval("sqrt(close + 2)", 8).unwrap(), 4.0);
    }

    #[test]
    fn sign_of_zero_is_zero() {
        assert_eq!(eval("sign(close - 14)", 8), Some(0.0));
        assert_eq!(eval("sign(close - 20)", 8), Some(-1.0));
    }

    #[test]
    fn delay_delta_returns() {
        assert_relative_eq!(eval("delay(close, 2)", 8).unwrap(), 12.0);
        assert_relative_eq!(eval("delta(close, 4)", 8).unwrap(), 4.0);
        assert_relative_eq!(eval("returns(close, 1)", 8).unwrap(), 14.0 / 13.0 - 1.0);
    }

    #[test]
    fn delay_past_history_is_undefined() {
        assert_eq!(eval("delay(close, 1)", 2), None);
        assert_eq!(eval("delay(close, 5)", 8), None);
    }

    #[test]
    fn window_statistics() {
        assert_relative_eq!(eval("ts_mean(close, 3)", 8).unwrap(), 13.0);
        assert_relative_eq!(eval("ts_sum(close, 3)", 8).unwrap(), 39.0);
        assert_relative_eq!(eval("ts_min(close, 3)", 8).unwrap(), 12.0);
        assert_relative_eq!(eval("ts_max(close, 3)", 8).unwrap(), 14.0);
        assert_relative_eq!(eval("ts_std(close, 3)", 8).unwrap(), 1.0);
        assert_relative_eq!(eval("ts_zscore(close, 3)", 8).unwrap(), 1.0);
        assert_relative_eq!(eval("ts_rank(close, 5)", 8).unwrap(), 1.0);
    }

    #[test]
    fn window_with_missing_sample_is_undefined() {
        assert_eq!(eval("ts_mean(volume, 3)", 8), None);
        assert_relative_eq!(eval("ts_mean(volume, 2)", 8).unwrap(), 450.0);
    }

    #[test]
    fn incomplete_window_is_undefined() {
        assert_eq!(eval("ts_mean(close, 6)", 8), None);
        assert_eq!(eval("ts_mean(close, 3)", 3), None);
    }

    #[test]
    fn constant_window_zscore_is_undefined() {
        assert_eq!(eval("ts_zscore(close - close, 3)", 8), None);
    }

    #[test]
    fn view_never_reads_past_its_date() {
        // On day 4 the latest visible close is 12 whatever happens later.
        assert_relative_eq!(eval("close", 4).unwrap(), 12.0);
        assert_relative_eq!(eval("ts_max(close, 3)", 4).unwrap(), 12.0);
    }
}
