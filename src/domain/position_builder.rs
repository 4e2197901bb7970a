//! Target weights from a date's scores.
//!
//! # Construction
//!
//! 1. Fewer than `min_names` defined scores: all-zero proposal, date flagged thin
//! 2. Raw weights by rank or score, centred (per group) when neutral
//! 3. Scale to the gross cap with per-name clipping by water-filling; each
//!    side targets half the cap when neutral. Group-neutral books take one
//!    common scale factor instead, so `max_weight` can leave them below the cap
//! 4. Blend towards the previous weights when turnover exceeds its cap
//!
//! A neutral proposal with a single populated side cannot be balanced and
//! degrades to flat with the date flagged.

use crate::domain::error::AlphasimError;
use crate::domain::portfolio::{WeightMap, turnover};
use crate::domain::signal::ScoreMap;
use crate::domain::universe::InstrumentId;
use std::collections::BTreeMap;
use std::fmt;

const EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Weighting {
    Rank,
    Proportional,
}

impl fmt::Display for Weighting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Weighting::Rank => write!(f, "rank"),
            Weighting::Proportional => write!(f, "proportional"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Neutralization {
    None,
    /// Dollar-neutral across the whole universe.
    Market,
    /// Dollar-neutral within each group of a point-in-time group field.
    Group(String),
}

impl Neutralization {
    pub fn is_neutral(&self) -> bool {
        !matches!(self, Neutralization::None)
    }

    pub fn group_field(&self) -> Option<&str> {
        match self {
            Neutralization::Group(field) => Some(field),
            _ => None,
        }
    }
}

impl fmt::Display for Neutralization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Neutralization::None => write!(f, "none"),
            Neutralization::Market => write!(f, "market"),
            Neutralization::Group(field) => write!(f, "group({})", field),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PositionConfig {
    pub weighting: Weighting,
    /// Largest absolute weight of a single name.
    pub max_weight: f64,
    /// Largest sum of absolute weights.
    pub gross_cap: f64,
    pub neutralization: Neutralization,
    /// Largest Σ|Δw| per date; `None` leaves turnover unconstrained.
    pub max_turnover: Option<f64>,
    /// Fewest defined scores needed to take positions on a date.
    pub min_names: usize,
}

impl PositionConfig {
    /// Reject combinations no date could satisfy.
    pub fn validate(&self) -> Result<(), AlphasimError> {
        let fail = |reason: String| Err(AlphasimError::Configuration { reason });
        if !(self.gross_cap > 0.0 && self.gross_cap.is_finite()) {
            return fail(format!("gross_cap must be positive, got {}", self.gross_cap));
        }
        if !(self.max_weight > 0.0 && self.max_weight.is_finite()) {
            return fail(format!("max_weight must be positive, got {}", self.max_weight));
        }
        if let Some(cap) = self.max_turnover {
            if !(cap > 0.0 && cap.is_finite()) {
                return fail(format!(
                    "max_turnover of {} never lets a position open",
                    cap
                ));
            }
        }
        if self.min_names == 0 {
            return fail("min_names must be at least 1".to_string());
        }
        if self.neutralization.is_neutral() && self.min_names < 2 {
            return fail(format!(
                "{} neutralization needs min_names of at least 2",
                self.neutralization
            ));
        }
        Ok(())
    }
}

/// Per-date conditions worth reporting. None of them abort a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DateFlags {
    /// Fewer than `min_names` defined scores.
    pub thin: bool,
    /// The proposal could not meet a hard constraint and was degraded.
    pub constraint_violation: bool,
    /// The proposal was blended towards the previous weights.
    pub turnover_capped: bool,
}

impl DateFlags {
    pub fn is_flagged(&self) -> bool {
        self.thin || self.constraint_violation
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub weights: WeightMap,
    pub flags: DateFlags,
}

#[derive(Debug, Clone)]
pub struct PositionBuilder {
    config: PositionConfig,
}

impl PositionBuilder {
    pub fn new(config: PositionConfig) -> Result<Self, AlphasimError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PositionConfig {
        &self.config
    }

    /// Target weights for one date.
    ///
    /// `groups` holds each instrument's group label when neutralizing by
    /// group; names without a label are left out of that date.
    pub fn build(
        &self,
        scores: &ScoreMap,
        groups: &BTreeMap<InstrumentId, Option<f64>>,
        previous: &WeightMap,
    ) -> Proposal {
        let mut flags = DateFlags::default();
        let group_mode = self.config.neutralization.group_field().is_some();

        let defined: Vec<(InstrumentId, f64)> = scores
            .iter()
            .filter_map(|(id, s)| s.map(|v| (id.clone(), v)))
            .filter(|(id, _)| !group_mode || groups.get(id).copied().flatten().is_some())
            .collect();

        let mut proposal: WeightMap = scores.keys().map(|id| (id.clone(), 0.0)).collect();

        if defined.len() < self.config.min_names {
            flags.thin = true;
        } else {
            let raw = self.raw_weights(&defined, groups);
            match self.scale(raw) {
                Some(scaled) => proposal.extend(scaled),
                None => flags.constraint_violation = true,
            }
        }

        let weights = match self.config.max_turnover {
            Some(cap) => {
                let (blended, capped) = cap_turnover(previous, &proposal, cap);
                flags.turnover_capped = capped;
                blended
            }
            None => proposal,
        };

        Proposal { weights, flags }
    }

    fn raw_weights(
        &self,
        defined: &[(InstrumentId, f64)],
        groups: &BTreeMap<InstrumentId, Option<f64>>,
    ) -> Vec<(InstrumentId, f64)> {
        let mut raw: Vec<(InstrumentId, f64)> = match self.config.weighting {
            Weighting::Proportional => defined.to_vec(),
            Weighting::Rank => {
                let ranks = ranks(defined.iter().map(|(_, v)| *v));
                defined
                    .iter()
                    .zip(ranks)
                    .map(|((id, _), r)| (id.clone(), r))
                    .collect()
            }
        };

        match &self.config.neutralization {
            Neutralization::None => {}
            Neutralization::Market => demean(&mut raw),
            Neutralization::Group(_) => {
                let mut by_group: BTreeMap<u64, Vec<(InstrumentId, f64)>> = BTreeMap::new();
                for (id, w) in raw {
                    let label = groups.get(&id).copied().flatten().unwrap_or(f64::NAN);
                    by_group.entry(label.to_bits()).or_default().push((id, w));
                }
                raw = by_group
                    .into_values()
                    .flat_map(|mut members| {
                        demean(&mut members);
                        members
                    })
                    .collect();
            }
        }
        raw
    }

    /// Scale raw weights to the caps. `None` when a neutral book cannot be
    /// balanced.
    fn scale(&self, raw: Vec<(InstrumentId, f64)>) -> Option<Vec<(InstrumentId, f64)>> {
        let cap = self.config.gross_cap;
        let max_w = self.config.max_weight;

        if self.config.neutralization.group_field().is_some() {
            return scale_uniform(raw, cap, max_w);
        }

        if !self.config.neutralization.is_neutral() {
            let magnitudes: Vec<f64> = raw.iter().map(|(_, w)| w.abs()).collect();
            if magnitudes.iter().sum::<f64>() < EPSILON {
                return Some(Vec::new());
            }
            let filled = water_fill(&magnitudes, cap, max_w);
            return Some(
                raw.into_iter()
                    .zip(filled)
                    .map(|((id, w), m)| (id, m.copysign(w)))
                    .collect(),
            );
        }

        let (longs, shorts): (Vec<_>, Vec<_>) = raw
            .into_iter()
            .filter(|(_, w)| w.abs() >= EPSILON)
            .partition(|(_, w)| *w > 0.0);
        if longs.is_empty() || shorts.is_empty() {
            return None;
        }

        // Both sides must carry the same gross for the book to net to zero.
        let side = (cap / 2.0)
            .min(longs.len() as f64 * max_w)
            .min(shorts.len() as f64 * max_w);

        let mut out = Vec::with_capacity(longs.len() + shorts.len());
        for (members, sign) in [(longs, 1.0), (shorts, -1.0)] {
            let magnitudes: Vec<f64> = members.iter().map(|(_, w)| w.abs()).collect();
            let filled = water_fill(&magnitudes, side, max_w);
            out.extend(
                members
                    .into_iter()
                    .zip(filled)
                    .map(|((id, _), m)| (id, sign * m)),
            );
        }
        Some(out)
    }
}

/// Multiply every weight by the largest factor that keeps gross within `cap`
/// and each name within `max_w`. Any zero-sum subset stays zero-sum.
fn scale_uniform(
    raw: Vec<(InstrumentId, f64)>,
    cap: f64,
    max_w: f64,
) -> Option<Vec<(InstrumentId, f64)>> {
    let gross: f64 = raw.iter().map(|(_, w)| w.abs()).sum();
    let largest = raw.iter().map(|(_, w)| w.abs()).fold(0.0, f64::max);
    if gross < EPSILON {
        return None;
    }
    let factor = (cap / gross).min(max_w / largest);
    Some(
        raw.into_iter()
            .filter(|(_, w)| w.abs() >= EPSILON)
            .map(|(id, w)| (id, w * factor))
            .collect(),
    )
}

/// Evenly spaced ranks in `[0, 1]` in input order; ties share their average.
fn ranks(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let values: Vec<f64> = values.collect();
    let m = values.len();
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut out = vec![0.5; m];
    let mut i = 0;
    while i < m {
        let mut j = i;
        while j + 1 < m && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        if m > 1 {
            let avg = (i + j) as f64 / 2.0 / (m - 1) as f64;
            for &k in &order[i..=j] {
                out[k] = avg;
            }
        }
        i = j + 1;
    }
    out
}

fn demean(weights: &mut [(InstrumentId, f64)]) {
    if weights.is_empty() {
        return;
    }
    let mean = weights.iter().map(|(_, w)| w).sum::<f64>() / weights.len() as f64;
    for (_, w) in weights.iter_mut() {
        *w -= mean;
    }
}

/// Distribute `target` across names in proportion to `magnitudes`, no name
/// above `max_w`. Clipped excess is handed to the unclipped names; when every
/// name is clipped the total falls short of `target`.
pub fn water_fill(magnitudes: &[f64], target: f64, max_w: f64) -> Vec<f64> {
    let mut out = vec![0.0; magnitudes.len()];
    let mut clipped = vec![false; magnitudes.len()];

    loop {
        let n_clipped = clipped.iter().filter(|c| **c).count();
        let remaining = target - n_clipped as f64 * max_w;
        let free_sum: f64 = magnitudes
            .iter()
            .zip(&clipped)
            .filter(|(_, c)| !**c)
            .map(|(m, _)| *m)
            .sum();

        if remaining <= 0.0 || free_sum < EPSILON {
            for (o, c) in out.iter_mut().zip(&clipped) {
                *o = if *c { max_w } else { 0.0 };
            }
            return out;
        }

        let scale = remaining / free_sum;
        let mut newly_clipped = false;
        for i in 0..magnitudes.len() {
            if clipped[i] {
                out[i] = max_w;
            } else {
                let w = magnitudes[i] * scale;
                if w > max_w + EPSILON {
                    clipped[i] = true;
                    newly_clipped = true;
                }
                out[i] = w.min(max_w);
            }
        }
        if !newly_clipped {
            return out;
        }
    }
}

/// Shrink the move from `previous` to `proposal` so its turnover is at most
/// `cap`. Returns the weights and whether shrinking happened.
pub fn cap_turnover(previous: &WeightMap, proposal: &WeightMap, cap: f64) -> (WeightMap, bool) {
    let t = turnover(previous, proposal);
    if t <= cap + EPSILON {
        return (proposal.clone(), false);
    }
    let alpha = cap / t;
    let mut blended: WeightMap = previous
        .iter()
        .map(|(id, &w)| (id.clone(), w * (1.0 - alpha)))
        .collect();
    for (id, &p) in proposal {
        *blended.entry(id.clone()).or_insert(0.0) += alpha * p;
    }
    (blended, true)
}
