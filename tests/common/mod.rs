#![allow(dead_code)]

use alphasim::adapters::file_config_adapter::FileConfigAdapter;
use alphasim::domain::error::AlphasimError;
use alphasim::domain::market_data::{MarketDataStore, RawRecord};
use alphasim::domain::run_config::RunConfig;
use alphasim::domain::universe::InstrumentId;
use alphasim::ports::calendar_port::CalendarPort;
use alphasim::ports::data_port::DataPort;
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};

pub fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

pub struct MockDataPort {
    pub records: Vec<RawRecord>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_records(mut self, records: Vec<RawRecord>) -> Self {
        self.records.extend(records);
        self
    }

    pub fn with_error(mut self, code: &str, reason: &str) -> Self {
        self.errors.insert(code.to_uppercase(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_history(
        &self,
        instruments: &[InstrumentId],
        start_date: NaiveDate,
        end_date: NaiveDate,
        fields: &[String],
    ) -> Result<Vec<RawRecord>, AlphasimError> {
        for id in instruments {
            if let Some(reason) = self.errors.get(id.as_str()) {
                return Err(AlphasimError::DataSource {
                    reason: reason.clone(),
                });
            }
        }
        Ok(self
            .records
            .iter()
            .filter(|r| instruments.contains(&r.instrument))
            .filter(|r| r.date >= start_date && r.date <= end_date)
            .map(|r| {
                let mut r = r.clone();
                r.values.retain(|k, _| fields.contains(k));
                r
            })
            .collect())
    }

    fn list_instruments(&self) -> Result<Vec<InstrumentId>, AlphasimError> {
        let ids: BTreeSet<InstrumentId> = self.records.iter().map(|r| r.instrument.clone()).collect();
        Ok(ids.into_iter().collect())
    }

    fn data_range(
        &self,
        instrument: &InstrumentId,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, AlphasimError> {
        let dates: BTreeSet<NaiveDate> = self
            .records
            .iter()
            .filter(|r| &r.instrument == instrument)
            .map(|r| r.date)
            .collect();
        Ok(dates
            .first()
            .zip(dates.last())
            .map(|(&f, &l)| (f, l, dates.len())))
    }
}

pub struct MockCalendar {
    pub dates: Vec<NaiveDate>,
}

impl MockCalendar {
    pub fn days(days: &[u32]) -> Self {
        Self {
            dates: days.iter().map(|&x| d(x)).collect(),
        }
    }
}

impl CalendarPort for MockCalendar {
    fn trading_days(&self) -> Result<Vec<NaiveDate>, AlphasimError> {
        Ok(self.dates.clone())
    }
}

/// Daily closes for `code` starting on `days[0]`, plus a constant `score`.
pub fn series(code: &str, days: &[u32], closes: &[f64], score: Option<f64>) -> Vec<RawRecord> {
    days.iter()
        .zip(closes)
        .map(|(&day, &close)| {
            RawRecord::new(code, d(day))
                .with("close", Some(close))
                .with("score", score)
        })
        .collect()
}

pub const DAYS: [u32; 4] = [2, 3, 4, 5];

/// A, B and C over four sessions with constant scores 1, 0 and -1.
pub fn three_instruments() -> Vec<RawRecord> {
    let mut records = series("AAA", &DAYS, &[100.0, 101.0, 103.0, 102.0], Some(1.0));
    records.extend(series("BBB", &DAYS, &[10.0, 10.0, 10.0, 10.0], Some(0.0)));
    records.extend(series("CCC", &DAYS, &[50.0, 50.5, 50.0, 51.0], Some(-1.0)));
    records
}

pub const BASE_INI: &str = "\
[run]
start_date = 2024-01-02
end_date = 2024-01-05
instruments = AAA, BBB, CCC

[alpha]
expression = score

[positions]
weighting = proportional
max_weight = 0.5
gross_cap = 1.0
neutralization = market
min_names = 2

[costs]
model = fixed
bps = 0

[metrics]
annualization = 252

[data]
directory = /unused
";

pub fn run_config(content: &str) -> RunConfig {
    let adapter = FileConfigAdapter::from_string(content).unwrap();
    RunConfig::from_config(&adapter).unwrap()
}

/// Load a store for `config` from in-memory records and calendar days.
pub fn load_store(
    config: &RunConfig,
    records: Vec<RawRecord>,
    days: &[u32],
    fields: &[&str],
    lookback: usize,
) -> MarketDataStore {
    let port = MockDataPort::new().with_records(records);
    let calendar = MockCalendar::days(days);
    let request = config.load_request(fields.iter().map(|f| f.to_string()).collect(), lookback);
    MarketDataStore::load(&port, &calendar, &request).unwrap()
}
