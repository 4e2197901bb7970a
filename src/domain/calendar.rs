//! Trading calendar: the ordered set of valid observation dates.

use crate::domain::error::{AlphasimError, DataGapError, GapKind};
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq)]
pub struct TradingCalendar {
    dates: Vec<NaiveDate>,
    index: HashMap<NaiveDate, usize>,
}

impl TradingCalendar {
    /// Build a calendar from strictly increasing dates.
    pub fn new(dates: Vec<NaiveDate>) -> Result<Self, AlphasimError> {
        if let Some(w) = dates.windows(2).find(|w| w[0] >= w[1]) {
            return Err(AlphasimError::DataSource {
                reason: format!(
                    "trading calendar is not strictly increasing at {} -> {}",
                    w[0], w[1]
                ),
            });
        }
        let index = dates.iter().enumerate().map(|(i, &d)| (d, i)).collect();
        Ok(Self { dates, index })
    }

    /// Build a calendar from unordered, possibly duplicated dates.
    pub fn from_unsorted(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        let unique: BTreeSet<NaiveDate> = dates.into_iter().collect();
        let dates: Vec<NaiveDate> = unique.into_iter().collect();
        let index = dates.iter().enumerate().map(|(i, &d)| (d, i)).collect();
        Self { dates, index }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn first(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.index.contains_key(&date)
    }

    pub fn position(&self, date: NaiveDate) -> Option<usize> {
        self.index.get(&date).copied()
    }

    /// Position of `date`, or a `NotInCalendar` gap.
    pub fn require(&self, date: NaiveDate) -> Result<usize, DataGapError> {
        self.position(date)
            .ok_or_else(|| DataGapError::new(date, GapKind::NotInCalendar))
    }

    /// The calendar date `lag` sessions before `date`.
    pub fn shift_back(&self, date: NaiveDate, lag: usize) -> Option<NaiveDate> {
        let pos = self.position(date)?;
        pos.checked_sub(lag).map(|i| self.dates[i])
    }

    /// Dates inside `[start, end]`. Past-the-end requests are not an error
    /// here; see [`TradingCalendar::coverage_gap`].
    pub fn range(&self, start: NaiveDate, end: NaiveDate) -> &[NaiveDate] {
        let lo = self.dates.partition_point(|d| *d < start);
        let hi = self.dates.partition_point(|d| *d <= end);
        if lo >= hi { &[] } else { &self.dates[lo..hi] }
    }

    /// Prefix of the calendar up to and including `date`.
    pub fn up_to(&self, date: NaiveDate) -> &[NaiveDate] {
        let hi = self.dates.partition_point(|d| *d <= date);
        &self.dates[..hi]
    }

    /// First date of `[start, end]` the calendar cannot serve, if any.
    ///
    /// A range starting before the first entry gaps at `start`; a range
    /// running past the last entry gaps on the day after the last entry.
    pub fn coverage_gap(&self, start: NaiveDate, end: NaiveDate) -> Option<DataGapError> {
        let (first, last) = match (self.first(), self.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return Some(DataGapError::new(start, GapKind::NotInCalendar)),
        };
        if start < first {
            return Some(DataGapError::new(start, GapKind::NotInCalendar));
        }
        if end > last {
            let boundary = last.succ_opt().unwrap_or(end);
            return Some(DataGapError::new(boundary, GapKind::BeyondCalendar));
        }
        None
    }

    /// Sessions per year implied by the calendar's own spacing.
    pub fn periods_per_year(&self) -> Option<f64> {
        let (first, last) = (self.first()?, self.last()?);
        let span_days = (last - first).num_days();
        if self.dates.len() < 2 || span_days <= 0 {
            return None;
        }
        let years = span_days as f64 / 365.25;
        Some((self.dates.len() - 1) as f64 / years)
    }
}
