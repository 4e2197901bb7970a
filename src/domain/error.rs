//! Domain error types.
//!
//! Per-field and per-instrument absence is not an error: it travels as
//! `Option::None` through scoring and weighting. Only calendar- or
//! universe-wide gaps abort a run.

use chrono::NaiveDate;

/// A parse error with position information for alpha expressions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Why a required date could not be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum GapKind {
    /// The date has no entry in the trading calendar.
    NotInCalendar,
    /// The requested range extends past the last calendar entry.
    BeyondCalendar,
    /// The date is in the calendar but no instrument has data on it.
    EmptyUniverse,
}

impl std::fmt::Display for GapKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GapKind::NotInCalendar => write!(f, "no trading calendar entry"),
            GapKind::BeyondCalendar => write!(f, "past the end of the trading calendar"),
            GapKind::EmptyUniverse => write!(f, "no instrument has data"),
        }
    }
}

/// A calendar- or universe-level data gap. Fatal for the run at `date`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[error("data gap on {date}: {kind}")]
pub struct DataGapError {
    pub date: NaiveDate,
    pub kind: GapKind,
}

impl DataGapError {
    pub fn new(date: NaiveDate, kind: GapKind) -> Self {
        Self { date, kind }
    }
}

/// Top-level error type for alphasim.
#[derive(Debug, thiserror::Error)]
pub enum AlphasimError {
    #[error("data source error: {reason}")]
    DataSource { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("contradictory configuration: {reason}")]
    Configuration { reason: String },

    #[error(transparent)]
    ExpressionParse(#[from] ParseError),

    #[error("invalid signal: {reason}")]
    SignalInvalid { reason: String },

    #[error(transparent)]
    DataGap(#[from] DataGapError),

    #[error("no data for {instrument} between {start} and {end}")]
    NoData {
        instrument: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&AlphasimError> for std::process::ExitCode {
    fn from(err: &AlphasimError) -> Self {
        let code: u8 = match err {
            AlphasimError::Io(_) => 1,
            AlphasimError::ConfigParse { .. }
            | AlphasimError::ConfigMissing { .. }
            | AlphasimError::ConfigInvalid { .. }
            | AlphasimError::Configuration { .. } => 2,
            AlphasimError::DataSource { .. } => 3,
            AlphasimError::ExpressionParse(_) | AlphasimError::SignalInvalid { .. } => 4,
            AlphasimError::NoData { .. } => 5,
            AlphasimError::DataGap(_) => 6,
        };
        std::process::ExitCode::from(code)
    }
}
