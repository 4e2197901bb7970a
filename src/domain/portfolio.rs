//! Realized book state carried between simulated dates.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use super::universe::InstrumentId;

/// Weights as fractions of notional, keyed by instrument.
pub type WeightMap = BTreeMap<InstrumentId, f64>;

const TRADE_EPSILON: f64 = 1e-12;

/// Σ|Δw| between two books; names missing from either side count as zero.
pub fn turnover(previous: &WeightMap, next: &WeightMap) -> f64 {
    let changed: f64 = next
        .iter()
        .map(|(id, w)| (w - previous.get(id).copied().unwrap_or(0.0)).abs())
        .sum();
    let dropped: f64 = previous
        .iter()
        .filter(|(id, _)| !next.contains_key(*id))
        .map(|(_, w)| w.abs())
        .sum();
    changed + dropped
}

pub fn gross_exposure(weights: &WeightMap) -> f64 {
    weights.values().map(|w| w.abs()).sum()
}

pub fn net_exposure(weights: &WeightMap) -> f64 {
    weights.values().sum()
}

/// A weight change executed on a date.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Trade {
    pub date: NaiveDate,
    pub instrument: InstrumentId,
    pub from_weight: f64,
    pub to_weight: f64,
}

impl Trade {
    pub fn delta(&self) -> f64 {
        self.to_weight - self.from_weight
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
}

/// Return earned by a book over one date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mark {
    pub gross_return: f64,
    /// Held names whose return was unavailable and counted as zero.
    pub missing_returns: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    weights: WeightMap,
    pub equity_curve: Vec<EquityPoint>,
}

impl Default for Portfolio {
    fn default() -> Self {
        Self::new()
    }
}

impl Portfolio {
    pub fn new() -> Self {
        Portfolio {
            weights: WeightMap::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn weights(&self) -> &WeightMap {
        &self.weights
    }

    pub fn weight(&self, instrument: &InstrumentId) -> f64 {
        self.weights.get(instrument).copied().unwrap_or(0.0)
    }

    pub fn gross(&self) -> f64 {
        gross_exposure(&self.weights)
    }

    pub fn net(&self) -> f64 {
        net_exposure(&self.weights)
    }

    pub fn long_count(&self) -> usize {
        self.weights.values().filter(|w| **w > 0.0).count()
    }

    pub fn short_count(&self) -> usize {
        self.weights.values().filter(|w| **w < 0.0).count()
    }

    /// Return of the current book given each held name's return.
    pub fn mark<F>(&self, mut instrument_return: F) -> Mark
    where
        F: FnMut(&InstrumentId) -> Option<f64>,
    {
        let mut gross_return = 0.0;
        let mut missing_returns = 0;
        for (id, w) in self.weights.iter().filter(|(_, w)| **w != 0.0) {
            match instrument_return(id) {
                Some(r) => gross_return += w * r,
                None => missing_returns += 1,
            }
        }
        Mark {
            gross_return,
            missing_returns,
        }
    }

    /// Move the book to `target` in full, returning the trades made.
    /// Names that end flat are dropped from the book.
    pub fn rebalance(&mut self, date: NaiveDate, target: &WeightMap) -> Vec<Trade> {
        let mut trades = Vec::new();
        for (id, &to) in target {
            let from = self.weight(id);
            if (to - from).abs() > TRADE_EPSILON {
                trades.push(Trade {
                    date,
                    instrument: id.clone(),
                    from_weight: from,
                    to_weight: to,
                });
            }
        }
        for (id, &from) in &self.weights {
            if !target.contains_key(id) && from.abs() > TRADE_EPSILON {
                trades.push(Trade {
                    date,
                    instrument: id.clone(),
                    from_weight: from,
                    to_weight: 0.0,
                });
            }
        }
        self.weights = target
            .iter()
            .filter(|(_, w)| w.abs() > TRADE_EPSILON)
            .map(|(id, w)| (id.clone(), *w))
            .collect();
        trades
    }

    pub fn record_equity(&mut self, date: NaiveDate, equity: f64) {
        self.equity_curve.push(EquityPoint { date, equity });
    }

    /// Latest equity, starting from 1.0.
    pub fn equity(&self) -> f64 {
        self.equity_curve.last().map(|p| p.equity).unwrap_or(1.0)
    }
}
