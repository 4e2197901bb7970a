//! CSV file data adapters.
//!
//! Market data lives in one wide file per instrument, `<ID>.csv`:
//!
//! ```text
//! date,published,close,volume,sector
//! 2024-01-02,,101.5,120000,3
//! 2024-01-02,2024-01-09,101.7,,
//! ```
//!
//! `published` is optional and defaults to the row's date. An empty cell
//! means the row does not report the field, so an earlier revision stays
//! visible; `NaN` reports the value as missing. The trading calendar is a
//! separate file with one date per row.

use crate::domain::config_validation::DATE_FORMAT;
use crate::domain::error::AlphasimError;
use crate::domain::market_data::RawRecord;
use crate::domain::universe::InstrumentId;
use crate::ports::calendar_port::CalendarPort;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const DATE_COLUMN: &str = "date";
const PUBLISHED_COLUMN: &str = "published";
const CALENDAR_STEM: &str = "calendar";

fn data_error(path: &Path, reason: impl std::fmt::Display) -> AlphasimError {
    AlphasimError::DataSource {
        reason: format!("{}: {}", path.display(), reason),
    }
}

fn parse_date(path: &Path, line: u64, value: &str) -> Result<NaiveDate, AlphasimError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| data_error(path, format!("line {}: invalid date '{}': {}", line, value, e)))
}

/// Cell value: `None` when the cell is empty, `Some(None)` for `NaN`.
fn parse_cell(path: &Path, line: u64, value: &str) -> Result<Option<Option<f64>>, AlphasimError> {
    if value.is_empty() {
        return Ok(None);
    }
    if value.eq_ignore_ascii_case("nan") {
        return Ok(Some(None));
    }
    value
        .parse::<f64>()
        .map(|v| Some(Some(v)))
        .map_err(|_| data_error(path, format!("line {}: invalid number '{}'", line, value)))
}

/// Reads `<ID>.csv` files from one directory.
pub struct CsvAdapter {
    directory: PathBuf,
}

impl CsvAdapter {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    fn csv_path(&self, instrument: &InstrumentId) -> PathBuf {
        self.directory.join(format!("{}.csv", instrument))
    }

    /// Every row of `instrument` within `[start, end]`. A missing file yields
    /// no rows. An empty `fields` keeps every column.
    fn read_instrument(
        &self,
        instrument: &InstrumentId,
        start: NaiveDate,
        end: NaiveDate,
        fields: &[String],
    ) -> Result<Vec<RawRecord>, AlphasimError> {
        let path = self.csv_path(instrument);
        if !path.exists() {
            debug!(%instrument, path = %path.display(), "no data file");
            return Ok(Vec::new());
        }

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&path)
            .map_err(|e| data_error(&path, e))?;
        let headers = rdr.headers().map_err(|e| data_error(&path, e))?.clone();

        let date_idx = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(DATE_COLUMN))
            .ok_or_else(|| data_error(&path, "missing date column"))?;
        let published_idx = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(PUBLISHED_COLUMN));
        let columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != date_idx && Some(*i) != published_idx)
            .map(|(i, h)| (i, h.to_string()))
            .filter(|(_, h)| fields.is_empty() || fields.contains(h))
            .collect();

        let mut records = Vec::new();
        for result in rdr.records() {
            let row = result.map_err(|e| data_error(&path, e))?;
            let line = row.position().map(|p| p.line()).unwrap_or(0);

            let date = parse_date(&path, line, row.get(date_idx).unwrap_or(""))?;
            if date < start || date > end {
                continue;
            }
            let published = match published_idx.and_then(|i| row.get(i)) {
                Some(p) if !p.is_empty() => parse_date(&path, line, p)?,
                _ => date,
            };
            if published < date {
                return Err(data_error(
                    &path,
                    format!("line {}: published {} precedes date {}", line, published, date),
                ));
            }

            let mut values = BTreeMap::new();
            for (idx, name) in &columns {
                if let Some(value) = parse_cell(&path, line, row.get(*idx).unwrap_or(""))? {
                    values.insert(name.clone(), value);
                }
            }

            records.push(RawRecord {
                instrument: instrument.clone(),
                date,
                published,
                values,
            });
        }

        records.sort_by_key(|r| (r.date, r.published));
        Ok(records)
    }
}

impl DataPort for CsvAdapter {
    fn fetch_history(
        &self,
        instruments: &[InstrumentId],
        start_date: NaiveDate,
        end_date: NaiveDate,
        fields: &[String],
    ) -> Result<Vec<RawRecord>, AlphasimError> {
        let mut records = Vec::new();
        for instrument in instruments {
            records.extend(self.read_instrument(instrument, start_date, end_date, fields)?);
        }
        Ok(records)
    }

    fn list_instruments(&self) -> Result<Vec<InstrumentId>, AlphasimError> {
        let entries =
            fs::read_dir(&self.directory).map_err(|e| data_error(&self.directory, e))?;

        let mut instruments = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| data_error(&self.directory, e))?.path();
            let is_csv = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            if !is_csv {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.eq_ignore_ascii_case(CALENDAR_STEM) {
                    instruments.push(InstrumentId::new(stem));
                }
            }
        }

        instruments.sort();
        Ok(instruments)
    }

    fn data_range(
        &self,
        instrument: &InstrumentId,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, AlphasimError> {
        let records =
            self.read_instrument(instrument, NaiveDate::MIN, NaiveDate::MAX, &[])?;
        let dates: BTreeSet<NaiveDate> = records.iter().map(|r| r.date).collect();
        Ok(match (dates.first(), dates.last()) {
            (Some(&first), Some(&last)) => Some((first, last, dates.len())),
            _ => None,
        })
    }
}

/// Trading calendar file: one `YYYY-MM-DD` per row, optional `date` header.
pub struct CsvCalendarAdapter {
    path: PathBuf,
}

impl CsvCalendarAdapter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl CalendarPort for CsvCalendarAdapter {
    fn trading_days(&self) -> Result<Vec<NaiveDate>, AlphasimError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| data_error(&self.path, e))?;

        let mut dates = Vec::new();
        for result in rdr.records() {
            let row = result.map_err(|e| data_error(&self.path, e))?;
            let line = row.position().map(|p| p.line()).unwrap_or(0);
            let value = row.get(0).unwrap_or("");
            if value.is_empty() || (line == 1 && value.eq_ignore_ascii_case(DATE_COLUMN)) {
                continue;
            }
            dates.push(parse_date(&self.path, line, value)?);
        }
        Ok(dates)
    }
}
