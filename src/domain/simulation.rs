//! Date-by-date simulation of an alpha.
//!
//! The run is a fold over the trading dates of the requested range. Each
//! step scores the date's universe, builds target weights, books the return
//! earned by the previous weights and moves the book to the target. A data
//! gap stops the fold with everything recorded up to the failing date intact.

use crate::domain::cost::CostModel;
use crate::domain::error::{DataGapError, GapKind};
use crate::domain::market_data::MarketDataStore;
use crate::domain::metrics::pearson;
use crate::domain::portfolio::{EquityPoint, Portfolio, Trade, WeightMap, turnover};
use crate::domain::position_builder::{DateFlags, PositionBuilder};
use crate::domain::signal::{DecayBuffer, ScoreMap, SignalEvaluator};
use crate::domain::universe::InstrumentId;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::iter;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Cooperative cancellation shared between a run and its controller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum RunState {
    Initialized,
    Running(NaiveDate),
    Completed,
    Failed(DataGapError),
    /// Stopped before processing the given date.
    Cancelled(NaiveDate),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed(_) | RunState::Cancelled(_)
        )
    }
}

/// Outcome of one simulated date.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PerformanceRecord {
    pub date: NaiveDate,
    /// Previous weights times this date's instrument returns.
    pub gross_return: f64,
    pub cost: f64,
    pub net_return: f64,
    /// Σ|Δw| traded on this date.
    pub turnover: f64,
    pub gross_exposure: f64,
    pub net_exposure: f64,
    pub long_count: usize,
    pub short_count: usize,
    /// Correlation of the previous date's scores with this date's returns.
    pub ic: Option<f64>,
    pub universe_size: usize,
    pub scored: usize,
    /// Held names whose return was unavailable and counted as zero.
    pub missing_returns: usize,
    pub flags: DateFlags,
    /// Compounded net equity after this date, starting from 1.0.
    pub equity: f64,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: RunState,
    pub records: Vec<PerformanceRecord>,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
}

impl RunOutcome {
    pub fn failure(&self) -> Option<&DataGapError> {
        match &self.state {
            RunState::Failed(gap) => Some(gap),
            _ => None,
        }
    }
}

/// State threaded through the fold.
struct RunAcc {
    state: RunState,
    portfolio: Portfolio,
    decay: DecayBuffer,
    prev_scores: ScoreMap,
    records: Vec<PerformanceRecord>,
    trades: Vec<Trade>,
    last_date: Option<NaiveDate>,
}

impl RunAcc {
    fn new() -> Self {
        Self {
            state: RunState::Initialized,
            portfolio: Portfolio::new(),
            decay: DecayBuffer::default(),
            prev_scores: ScoreMap::new(),
            records: Vec::new(),
            trades: Vec::new(),
            last_date: None,
        }
    }

    fn finish(self, state: RunState) -> RunOutcome {
        debug!(last = ?self.state, outcome = ?state, "run finished");
        RunOutcome {
            state,
            records: self.records,
            trades: self.trades,
            equity_curve: self.portfolio.equity_curve,
        }
    }
}

pub struct SimulationEngine<'a> {
    store: &'a MarketDataStore,
    evaluator: SignalEvaluator<'a>,
    builder: PositionBuilder,
    cost_model: CostModel,
}

impl<'a> SimulationEngine<'a> {
    pub fn new(
        store: &'a MarketDataStore,
        evaluator: SignalEvaluator<'a>,
        builder: PositionBuilder,
        cost_model: CostModel,
    ) -> Self {
        Self {
            store,
            evaluator,
            builder,
            cost_model,
        }
    }

    /// Simulate every trading date in `[start, end]`.
    ///
    /// A range starting before the calendar fails at `start`; a range running
    /// past the calendar fails on the first uncovered day after the covered
    /// dates have been simulated.
    pub fn run(&self, start: NaiveDate, end: NaiveDate, cancel: &CancelToken) -> RunOutcome {
        let calendar = self.store.calendar();
        let dates = calendar.range(start, end).iter().copied().map(Ok);
        let schedule: Vec<Result<NaiveDate, DataGapError>> = match calendar.coverage_gap(start, end)
        {
            Some(gap) if gap.kind == GapKind::NotInCalendar => vec![Err(gap)],
            Some(gap) => dates.chain(iter::once(Err(gap))).collect(),
            None => dates.collect(),
        };

        info!(
            signal = self.evaluator.signal().name(),
            %start,
            %end,
            dates = schedule.iter().filter(|d| d.is_ok()).count(),
            "starting simulation"
        );
        let outcome = self.fold(schedule, cancel);
        match &outcome.state {
            RunState::Completed => info!(records = outcome.records.len(), "simulation completed"),
            RunState::Failed(gap) => warn!(
                date = %gap.date,
                kind = %gap.kind,
                records = outcome.records.len(),
                "simulation failed"
            ),
            RunState::Cancelled(date) => info!(%date, "simulation cancelled"),
            RunState::Initialized | RunState::Running(_) => {}
        }
        outcome
    }

    /// Simulate exactly `dates`, which must be strictly increasing.
    pub fn run_dates(&self, dates: &[NaiveDate], cancel: &CancelToken) -> RunOutcome {
        self.fold(dates.iter().copied().map(Ok).collect(), cancel)
    }

    fn fold(
        &self,
        schedule: Vec<Result<NaiveDate, DataGapError>>,
        cancel: &CancelToken,
    ) -> RunOutcome {
        let flow = schedule.into_iter().try_fold(RunAcc::new(), |mut acc, item| {
            let date = match item {
                Ok(date) => date,
                Err(gap) => return ControlFlow::Break((acc, RunState::Failed(gap))),
            };
            if cancel.is_cancelled() {
                return ControlFlow::Break((acc, RunState::Cancelled(date)));
            }
            match self.step(&mut acc, date) {
                Ok(()) => ControlFlow::Continue(acc),
                Err(gap) => ControlFlow::Break((acc, RunState::Failed(gap))),
            }
        });

        match flow {
            ControlFlow::Continue(acc) => acc.finish(RunState::Completed),
            ControlFlow::Break((acc, state)) => acc.finish(state),
        }
    }

    fn step(&self, acc: &mut RunAcc, date: NaiveDate) -> Result<(), DataGapError> {
        if let Some(last) = acc.last_date {
            assert!(
                date > last,
                "simulation dates must be strictly increasing: {} after {}",
                date,
                last
            );
        }
        acc.state = RunState::Running(date);

        // Fallible reads first so a failing date leaves the run state untouched.
        let universe = self.store.universe(date)?;
        let mut decay = acc.decay.clone();
        let scores = self.evaluator.evaluate(self.store, date, &universe, &mut decay)?;

        let returns: BTreeMap<InstrumentId, Option<f64>> = acc
            .portfolio
            .weights()
            .keys()
            .chain(acc.prev_scores.keys())
            .map(|id| (id.clone(), self.store.instrument_return(id, date)))
            .collect();
        let mark = acc
            .portfolio
            .mark(|id| returns.get(id).copied().flatten());
        let ic = information_coefficient(&acc.prev_scores, &returns);

        let groups = self.group_labels(&scores, date);
        let proposal = self.builder.build(&scores, &groups, acc.portfolio.weights());

        let previous: WeightMap = acc.portfolio.weights().clone();
        let traded = turnover(&previous, &proposal.weights);
        let cost = self.cost_model.cost(traded);
        let net_return = mark.gross_return - cost;
        let equity = acc.portfolio.equity() * (1.0 + net_return);

        let trades = acc.portfolio.rebalance(date, &proposal.weights);
        acc.portfolio.record_equity(date, equity);

        let record = PerformanceRecord {
            date,
            gross_return: mark.gross_return,
            cost,
            net_return,
            turnover: traded,
            gross_exposure: acc.portfolio.gross(),
            net_exposure: acc.portfolio.net(),
            long_count: acc.portfolio.long_count(),
            short_count: acc.portfolio.short_count(),
            ic,
            universe_size: universe.len(),
            scored: scores.values().filter(|s| s.is_some()).count(),
            missing_returns: mark.missing_returns,
            flags: proposal.flags,
            equity,
        };

        if record.flags.is_flagged() {
            warn!(
                %date,
                thin = record.flags.thin,
                constraint_violation = record.flags.constraint_violation,
                scored = record.scored,
                "flagged date"
            );
        }
        debug!(
            %date,
            gross_return = record.gross_return,
            turnover = record.turnover,
            cost = record.cost,
            trades = trades.len(),
            "date simulated"
        );

        acc.decay = decay;
        acc.prev_scores = scores;
        acc.trades.extend(trades);
        acc.records.push(record);
        acc.last_date = Some(date);
        Ok(())
    }

    fn group_labels(
        &self,
        scores: &ScoreMap,
        date: NaiveDate,
    ) -> BTreeMap<InstrumentId, Option<f64>> {
        match self.builder.config().neutralization.group_field() {
            Some(field) => scores
                .keys()
                .map(|id| (id.clone(), self.store.value_as_of(id, field, date, date)))
                .collect(),
            None => BTreeMap::new(),
        }
    }
}

fn information_coefficient(
    prev_scores: &ScoreMap,
    returns: &BTreeMap<InstrumentId, Option<f64>>,
) -> Option<f64> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = prev_scores
        .iter()
        .filter_map(|(id, s)| Some(((*s)?, returns.get(id).copied().flatten()?)))
        .unzip();
    pearson(&xs, &ys)
}
