//! Signal definitions and the per-date evaluator.
//!
//! A signal scores one instrument from a [`HistoryView`]; the evaluator runs
//! it over a date's universe, applies decay and the signal's cross-sectional
//! post-processing.

use crate::domain::error::{AlphasimError, DataGapError, ParseError};
use crate::domain::expression::{AlphaExpression, CrossSectionalOp};
use crate::domain::expression_eval;
use crate::domain::expression_parser;
use crate::domain::market_data::{HistoryView, MarketDataStore};
use crate::domain::universe::InstrumentId;
use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Scores for one date, keyed by instrument. `None` is an undefined score.
pub type ScoreMap = BTreeMap<InstrumentId, Option<f64>>;

const EPSILON: f64 = 1e-12;

/// Contract every alpha fulfils.
///
/// `score` must be a pure function of the view: the simulation relies on it
/// for reproducible runs and scores instruments concurrently.
pub trait SignalDefinition: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, view: &HistoryView<'_>) -> Option<f64>;

    /// Data fields `score` reads.
    fn required_fields(&self) -> BTreeSet<String>;

    /// Sessions of history before the evaluation date `score` may read.
    fn lookback(&self) -> usize;

    fn post_process(&self) -> Option<CrossSectionalOp> {
        None
    }
}

/// A signal written in the alpha expression language.
#[derive(Debug, Clone)]
pub struct ExpressionSignal {
    source: String,
    alpha: AlphaExpression,
}

impl ExpressionSignal {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let alpha = expression_parser::parse(source)?;
        Ok(Self {
            source: source.trim().to_string(),
            alpha,
        })
    }

    pub fn expression(&self) -> &AlphaExpression {
        &self.alpha
    }
}

impl SignalDefinition for ExpressionSignal {
    fn name(&self) -> &str {
        &self.source
    }

    fn score(&self, view: &HistoryView<'_>) -> Option<f64> {
        expression_eval::evaluate(&self.alpha.body, view)
    }

    fn required_fields(&self) -> BTreeSet<String> {
        self.alpha.body.fields()
    }

    fn lookback(&self) -> usize {
        self.alpha.body.lookback()
    }

    fn post_process(&self) -> Option<CrossSectionalOp> {
        self.alpha.cross_sectional
    }
}

/// A signal backed by a closure.
pub struct FnSignal<F> {
    name: String,
    fields: BTreeSet<String>,
    lookback: usize,
    post_process: Option<CrossSectionalOp>,
    score_fn: F,
}

impl<F> FnSignal<F>
where
    F: Fn(&HistoryView<'_>) -> Option<f64> + Send + Sync,
{
    pub fn new(name: &str, fields: &[&str], lookback: usize, score_fn: F) -> Self {
        Self {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            lookback,
            post_process: None,
            score_fn,
        }
    }

    pub fn with_post_process(mut self, op: CrossSectionalOp) -> Self {
        self.post_process = Some(op);
        self
    }
}

impl<F> SignalDefinition for FnSignal<F>
where
    F: Fn(&HistoryView<'_>) -> Option<f64> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn score(&self, view: &HistoryView<'_>) -> Option<f64> {
        (self.score_fn)(view).filter(|v| v.is_finite())
    }

    fn required_fields(&self) -> BTreeSet<String> {
        self.fields.clone()
    }

    fn lookback(&self) -> usize {
        self.lookback
    }

    fn post_process(&self) -> Option<CrossSectionalOp> {
        self.post_process
    }
}

/// Timing adjustments applied around the signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluatorSettings {
    /// Sessions between the last data date used and the trading date.
    pub delay: usize,
    /// Length of the linear decay window; 0 or 1 disables decay.
    pub decay: usize,
}

/// Recent raw scores per instrument, newest first.
#[derive(Debug, Clone, Default)]
pub struct DecayBuffer {
    history: HashMap<InstrumentId, VecDeque<f64>>,
}

impl DecayBuffer {
    /// Replace each defined score by the linearly weighted average of its
    /// last `window` defined raw scores (weights `window, ..., 1`, newest
    /// heaviest). Undefined scores stay undefined and leave the buffer as is.
    pub fn apply(&mut self, raw: ScoreMap, window: usize) -> ScoreMap {
        if window < 2 {
            return raw;
        }
        raw.into_iter()
            .map(|(id, score)| {
                let decayed = score.map(|s| {
                    let recent = self.history.entry(id.clone()).or_default();
                    recent.push_front(s);
                    recent.truncate(window);
                    let n = recent.len();
                    let (num, den) = recent
                        .iter()
                        .enumerate()
                        .fold((0.0, 0.0), |(num, den), (i, v)| {
                            let w = (n - i) as f64;
                            (num + w * v, den + w)
                        });
                    num / den
                });
                (id, decayed)
            })
            .collect()
    }
}

/// A registered signal, ready to score dates.
pub struct SignalEvaluator<'a> {
    signal: &'a dyn SignalDefinition,
    settings: EvaluatorSettings,
}

impl<'a> SignalEvaluator<'a> {
    /// Check the signal against the loaded data before any date is scored.
    pub fn register(
        signal: &'a dyn SignalDefinition,
        store: &MarketDataStore,
        settings: EvaluatorSettings,
    ) -> Result<Self, AlphasimError> {
        let known = store.fields();
        let unknown: Vec<String> = signal
            .required_fields()
            .into_iter()
            .filter(|f| !known.contains(f))
            .collect();
        if !unknown.is_empty() {
            return Err(AlphasimError::SignalInvalid {
                reason: format!(
                    "'{}' reads unknown field(s): {}",
                    signal.name(),
                    unknown.join(", ")
                ),
            });
        }
        if let Some(CrossSectionalOp::Winsorize(k)) = signal.post_process() {
            if !(k > 0.0 && k.is_finite()) {
                return Err(AlphasimError::SignalInvalid {
                    reason: format!("winsorize bound must be positive, got {}", k),
                });
            }
        }
        tracing::debug!(
            signal = signal.name(),
            lookback = signal.lookback(),
            delay = settings.delay,
            decay = settings.decay,
            "signal registered"
        );
        Ok(Self { signal, settings })
    }

    pub fn signal(&self) -> &dyn SignalDefinition {
        self.signal
    }

    pub fn settings(&self) -> EvaluatorSettings {
        self.settings
    }

    /// Raw scores for `date`, computed from data up to the delayed date.
    ///
    /// Instruments are scored in parallel; the result does not depend on
    /// scheduling.
    pub fn raw_scores(
        &self,
        store: &MarketDataStore,
        date: NaiveDate,
        universe: &BTreeSet<InstrumentId>,
    ) -> Result<ScoreMap, DataGapError> {
        store.calendar().require(date)?;
        let eval_date = match store.calendar().shift_back(date, self.settings.delay) {
            Some(d) => d,
            None => return Ok(universe.iter().map(|id| (id.clone(), None)).collect()),
        };

        universe
            .par_iter()
            .map(|id| -> Result<(InstrumentId, Option<f64>), DataGapError> {
                let view = store.history(id, eval_date)?;
                Ok((id.clone(), self.signal.score(&view)))
            })
            .collect()
    }

    /// Scores for `date` after decay and cross-sectional post-processing.
    pub fn evaluate(
        &self,
        store: &MarketDataStore,
        date: NaiveDate,
        universe: &BTreeSet<InstrumentId>,
        decay: &mut DecayBuffer,
    ) -> Result<ScoreMap, DataGapError> {
        let raw = self.raw_scores(store, date, universe)?;
        let mut scores = decay.apply(raw, self.settings.decay);
        if let Some(op) = self.signal.post_process() {
            apply_cross_sectional(op, &mut scores);
        }
        Ok(scores)
    }
}

/// Apply a cross-sectional transform to the defined scores of one date.
pub fn apply_cross_sectional(op: CrossSectionalOp, scores: &mut ScoreMap) {
    match op {
        CrossSectionalOp::Rank => rank(scores),
        CrossSectionalOp::Zscore => zscore(scores),
        CrossSectionalOp::Winsorize(k) => winsorize(scores, k),
    }
}

fn defined(scores: &ScoreMap) -> Vec<f64> {
    scores.values().filter_map(|s| *s).collect()
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Evenly spaced ranks in `[0, 1]`; ties share their average rank.
fn rank(scores: &mut ScoreMap) {
    let mut ordered: Vec<(InstrumentId, f64)> = scores
        .iter()
        .filter_map(|(id, s)| s.map(|v| (id.clone(), v)))
        .collect();
    let m = ordered.len();
    if m == 0 {
        return;
    }
    ordered.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut i = 0;
    while i < m {
        let mut j = i;
        while j + 1 < m && ordered[j + 1].1 == ordered[i].1 {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0;
        let value = if m == 1 { 0.5 } else { avg / (m - 1) as f64 };
        for (id, _) in &ordered[i..=j] {
            scores.insert(id.clone(), Some(value));
        }
        i = j + 1;
    }
}

fn zscore(scores: &mut ScoreMap) {
    let values = defined(scores);
    if values.is_empty() {
        return;
    }
    let (mean, std) = mean_std(&values);
    for s in scores.values_mut().flatten() {
        *s = if std < EPSILON { 0.0 } else { (*s - mean) / std };
    }
}

fn winsorize(scores: &mut ScoreMap, k: f64) {
    let values = defined(scores);
    if values.len() < 2 {
        return;
    }
    let (mean, std) = mean_std(&values);
    let (lo, hi) = (mean - k * std, mean + k * std);
    for s in scores.values_mut().flatten() {
        *s = s.clamp(lo, hi);
    }
}
