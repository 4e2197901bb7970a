//! Point-in-time market data store.
//!
//! Every (instrument, date) row keeps all of its revisions. A revision is
//! visible to a reader only once its `published` date is on or before the
//! reader's as-of date, so restated values never leak into earlier dates.

use crate::domain::calendar::TradingCalendar;
use crate::domain::error::{AlphasimError, DataGapError, GapKind};
use crate::domain::universe::{InstrumentId, UniverseFilter};
use crate::ports::calendar_port::CalendarPort;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// One record as delivered by a data source.
///
/// A field absent from `values` is "not reported by this record"; a field
/// present with `None` is reported as missing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub instrument: InstrumentId,
    pub date: NaiveDate,
    pub published: NaiveDate,
    pub values: BTreeMap<String, Option<f64>>,
}

impl RawRecord {
    /// A record available on its own observation date.
    pub fn new(instrument: &str, date: NaiveDate) -> Self {
        Self {
            instrument: InstrumentId::new(instrument),
            date,
            published: date,
            values: BTreeMap::new(),
        }
    }

    pub fn published(mut self, published: NaiveDate) -> Self {
        self.published = published;
        self
    }

    pub fn with(mut self, field: &str, value: Option<f64>) -> Self {
        self.values.insert(field.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Revision {
    published: NaiveDate,
    values: BTreeMap<String, Option<f64>>,
}

/// Fields visible for one (instrument, date) as of that date.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub instrument: InstrumentId,
    pub date: NaiveDate,
    pub values: BTreeMap<String, Option<f64>>,
}

impl MarketSnapshot {
    /// `None` when the field is missing or not a finite number.
    pub fn get(&self, field: &str) -> Option<f64> {
        self.values
            .get(field)
            .copied()
            .flatten()
            .filter(|v| v.is_finite())
    }
}

/// What to pull from the ports when building a store.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub instruments: Vec<InstrumentId>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub fields: Vec<String>,
    /// Sessions of history needed before `start`.
    pub lookback: usize,
    pub price_field: String,
    pub filter: UniverseFilter,
}

#[derive(Debug, Clone)]
pub struct MarketDataStore {
    calendar: TradingCalendar,
    price_field: String,
    filter: UniverseFilter,
    rows: BTreeMap<InstrumentId, BTreeMap<NaiveDate, Vec<Revision>>>,
}

impl MarketDataStore {
    /// Build a store from in-memory records. Records dated outside the
    /// calendar are dropped.
    pub fn from_records(
        calendar: TradingCalendar,
        price_field: &str,
        filter: UniverseFilter,
        records: impl IntoIterator<Item = RawRecord>,
    ) -> Self {
        let mut rows: BTreeMap<InstrumentId, BTreeMap<NaiveDate, Vec<Revision>>> = BTreeMap::new();
        let mut dropped = 0usize;

        for record in records {
            if !calendar.contains(record.date) {
                dropped += 1;
                continue;
            }
            rows.entry(record.instrument)
                .or_default()
                .entry(record.date)
                .or_default()
                .push(Revision {
                    published: record.published,
                    values: record.values,
                });
        }

        // Stable sort keeps delivery order among same-day revisions.
        for by_date in rows.values_mut() {
            for revisions in by_date.values_mut() {
                revisions.sort_by_key(|r| r.published);
            }
        }

        if dropped > 0 {
            warn!(dropped, "dropped records dated outside the trading calendar");
        }

        Self {
            calendar,
            price_field: price_field.to_string(),
            filter,
            rows,
        }
    }

    /// Load everything a run needs from the data and calendar ports.
    ///
    /// Instruments with no records in range are skipped with a warning; the
    /// load fails only when none remain.
    pub fn load(
        data_port: &dyn DataPort,
        calendar_port: &dyn CalendarPort,
        request: &LoadRequest,
    ) -> Result<Self, AlphasimError> {
        let calendar = TradingCalendar::new(calendar_port.trading_days()?)?;

        let in_range = calendar.range(request.start, request.end);
        let fetch_start = in_range
            .first()
            .and_then(|&d| {
                let pos = calendar.position(d)?;
                Some(calendar.dates()[pos.saturating_sub(request.lookback)])
            })
            .unwrap_or(request.start);
        let fetch_end = in_range.last().copied().unwrap_or(request.end);

        let mut fields: BTreeSet<String> = request.fields.iter().cloned().collect();
        fields.insert(request.price_field.clone());
        fields.extend(request.filter.fields());
        let fields: Vec<String> = fields.into_iter().collect();

        info!(
            instruments = request.instruments.len(),
            from = %fetch_start,
            to = %fetch_end,
            fields = fields.len(),
            "fetching history"
        );
        let records =
            data_port.fetch_history(&request.instruments, fetch_start, fetch_end, &fields)?;

        let store = Self::from_records(
            calendar,
            &request.price_field,
            request.filter.clone(),
            records,
        );

        let mut loaded = 0usize;
        for instrument in &request.instruments {
            match store.rows.get(instrument) {
                Some(by_date) if !by_date.is_empty() => {
                    debug!(%instrument, rows = by_date.len(), "loaded");
                    loaded += 1;
                }
                _ => warn!(%instrument, "skipping instrument: no data in range"),
            }
        }

        if loaded == 0 {
            return Err(AlphasimError::NoData {
                instrument: "all".to_string(),
                start: fetch_start,
                end: fetch_end,
            });
        }

        if loaded < request.instruments.len() {
            info!(
                loaded,
                requested = request.instruments.len(),
                "backtesting a partial universe"
            );
        }

        Ok(store)
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub fn price_field(&self) -> &str {
        &self.price_field
    }

    pub fn instruments(&self) -> impl Iterator<Item = &InstrumentId> {
        self.rows.keys()
    }

    /// Every field name carried by at least one record.
    pub fn fields(&self) -> BTreeSet<String> {
        self.rows
            .values()
            .flat_map(|by_date| by_date.values())
            .flatten()
            .flat_map(|revision| revision.values.keys().cloned())
            .collect()
    }

    /// Value of `field` for `(instrument, date)` as known on `as_of`.
    pub fn value_as_of(
        &self,
        instrument: &InstrumentId,
        field: &str,
        date: NaiveDate,
        as_of: NaiveDate,
    ) -> Option<f64> {
        if date > as_of {
            return None;
        }
        let revisions = self.rows.get(instrument)?.get(&date)?;
        revisions
            .iter()
            .rev()
            .filter(|r| r.published <= as_of)
            .find_map(|r| r.values.get(field))
            .copied()
            .flatten()
            .filter(|v| v.is_finite())
    }

    /// Snapshot of `(instrument, date)` as of `date`.
    ///
    /// `Ok(None)` when the instrument has nothing visible on the date.
    pub fn snapshot(
        &self,
        instrument: &InstrumentId,
        date: NaiveDate,
    ) -> Result<Option<MarketSnapshot>, DataGapError> {
        self.calendar.require(date)?;

        let revisions = match self.rows.get(instrument).and_then(|r| r.get(&date)) {
            Some(revs) => revs,
            None => return Ok(None),
        };

        let mut values = BTreeMap::new();
        let mut visible = false;
        for revision in revisions.iter().filter(|r| r.published <= date) {
            visible = true;
            for (field, value) in &revision.values {
                values.insert(field.clone(), *value);
            }
        }

        Ok(visible.then(|| MarketSnapshot {
            instrument: instrument.clone(),
            date,
            values,
        }))
    }

    /// Tradable instruments on `date`: those with a defined price, narrowed
    /// by the universe filter.
    pub fn universe(&self, date: NaiveDate) -> Result<BTreeSet<InstrumentId>, DataGapError> {
        self.calendar.require(date)?;

        let priced: Vec<(InstrumentId, Option<f64>)> = self
            .rows
            .keys()
            .filter(|id| self.value_as_of(id, &self.price_field, date, date).is_some())
            .map(|id| {
                let rank_value = self
                    .filter
                    .top_n
                    .as_ref()
                    .and_then(|t| self.value_as_of(id, &t.field, date, date));
                (id.clone(), rank_value)
            })
            .collect();

        let members: BTreeSet<InstrumentId> = self.filter.select(priced).into_iter().collect();
        if members.is_empty() {
            return Err(DataGapError::new(date, GapKind::EmptyUniverse));
        }
        Ok(members)
    }

    /// Close-to-close return on the price field into `date`.
    pub fn instrument_return(&self, instrument: &InstrumentId, date: NaiveDate) -> Option<f64> {
        let prev = self.calendar.shift_back(date, 1)?;
        let p1 = self.value_as_of(instrument, &self.price_field, date, date)?;
        let p0 = self.value_as_of(instrument, &self.price_field, prev, date)?;
        (p0 > 0.0).then(|| p1 / p0 - 1.0)
    }

    /// History of `instrument` windowed to dates `<= date`, read as of `date`.
    pub fn history<'a>(
        &'a self,
        instrument: &'a InstrumentId,
        date: NaiveDate,
    ) -> Result<HistoryView<'a>, DataGapError> {
        self.calendar.require(date)?;
        Ok(HistoryView {
            store: self,
            instrument,
            dates: self.calendar.up_to(date),
            as_of: date,
        })
    }
}

/// Read-only window over one instrument's history.
///
/// The window ends at its as-of date; there is no way to reach a later date
/// through it.
#[derive(Debug, Clone, Copy)]
pub struct HistoryView<'a> {
    store: &'a MarketDataStore,
    instrument: &'a InstrumentId,
    dates: &'a [NaiveDate],
    as_of: NaiveDate,
}

impl<'a> HistoryView<'a> {
    pub fn instrument(&self) -> &InstrumentId {
        self.instrument
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    /// Number of sessions in the window, the current one included.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Value of `field` `lag` sessions back (0 = current session).
    pub fn value(&self, field: &str, lag: usize) -> Option<f64> {
        let idx = self.dates.len().checked_sub(lag.checked_add(1)?)?;
        self.store
            .value_as_of(self.instrument, field, self.dates[idx], self.as_of)
    }
}
