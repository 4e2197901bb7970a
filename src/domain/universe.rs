//! Instrument identifiers and universe selection.
//!
//! Parses instrument lists from configuration and describes how the tradable
//! set for a date is narrowed beyond plain data availability.

use std::collections::HashSet;
use std::fmt;

/// Stable instrument identifier, upper-cased on construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct InstrumentId(String);

impl InstrumentId {
    pub fn new(code: &str) -> Self {
        Self(code.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstrumentId {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in instrument list")]
    EmptyToken,

    #[error("duplicate instrument: {0}")]
    DuplicateInstrument(String),
}

pub fn parse_instruments(input: &str) -> Result<Vec<InstrumentId>, UniverseError> {
    let mut instruments = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        let id = InstrumentId::new(trimmed);
        if !seen.insert(id.clone()) {
            return Err(UniverseError::DuplicateInstrument(id.0));
        }
        instruments.push(id);
    }

    Ok(instruments)
}

/// Per-date narrowing of the data-defined universe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniverseFilter {
    /// Keep only the `n` names with the largest value of `field` on the date.
    pub top_n: Option<TopN>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopN {
    pub n: usize,
    pub field: String,
}

impl UniverseFilter {
    pub fn is_active(&self) -> bool {
        self.top_n.is_some()
    }

    /// Fields the filter reads from the store.
    pub fn fields(&self) -> Vec<String> {
        self.top_n.iter().map(|t| t.field.clone()).collect()
    }

    /// Select members from `(instrument, ranking value)` candidates.
    ///
    /// Candidates without a ranking value are dropped when `top_n` is set.
    /// Ties are broken by instrument id so selection is deterministic.
    pub fn select(&self, mut candidates: Vec<(InstrumentId, Option<f64>)>) -> Vec<InstrumentId> {
        match &self.top_n {
            None => candidates.into_iter().map(|(id, _)| id).collect(),
            Some(top) => {
                candidates.retain(|(_, v)| v.is_some_and(f64::is_finite));
                candidates.sort_by(|a, b| {
                    let (va, vb) = (a.1.unwrap_or(f64::MIN), b.1.unwrap_or(f64::MIN));
                    vb.total_cmp(&va).then_with(|| a.0.cmp(&b.0))
                });
                candidates.truncate(top.n);
                let mut selected: Vec<InstrumentId> =
                    candidates.into_iter().map(|(id, _)| id).collect();
                selected.sort();
                selected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(codes: &[&str]) -> Vec<InstrumentId> {
        codes.iter().map(|c| InstrumentId::new(c)).collect()
    }

    #[test]
    fn test_parse_instruments_basic() {
        let result = parse_instruments("AAPL,MSFT,IBM").unwrap();
        assert_eq!(result, ids(&["AAPL", "MSFT", "IBM"]));
    }

    #[test]
    fn test_parse_instruments_whitespace_and_case() {
        let result = parse_instruments("  aapl , Msft ,ibm").unwrap();
        assert_eq!(result, ids(&["AAPL", "MSFT", "IBM"]));
    }

    #[test]
    fn test_parse_instruments_empty_token() {
        let result = parse_instruments("AAPL,,IBM");
        assert!(matches!(result, Err(UniverseError::EmptyToken)));
    }

    #[test]
    fn test_parse_instruments_duplicate() {
        let result = parse_instruments("AAPL,IBM,aapl");
        assert!(matches!(result, Err(UniverseError::DuplicateInstrument(s)) if s == "AAPL"));
    }

    #[test]
    fn test_filter_inactive_keeps_everything() {
        let filter = UniverseFilter::default();
        let selected = filter.select(vec![
            (InstrumentId::new("B"), None),
            (InstrumentId::new("A"), Some(1.0)),
        ]);
        assert_eq!(selected, ids(&["B", "A"]));
    }

    #[test]
    fn test_filter_top_n_by_value() {
        let filter = UniverseFilter {
            top_n: Some(TopN {
                n: 2,
                field: "volume".into(),
            }),
        };
        let selected = filter.select(vec![
            (InstrumentId::new("A"), Some(10.0)),
            (InstrumentId::new("B"), Some(30.0)),
            (InstrumentId::new("C"), None),
            (InstrumentId::new("D"), Some(20.0)),
        ]);
        assert_eq!(selected, ids(&["B", "D"]));
    }

    #[test]
    fn test_filter_top_n_ties_break_by_id() {
        let filter = UniverseFilter {
            top_n: Some(TopN {
                n: 1,
                field: "volume".into(),
            }),
        };
        let selected = filter.select(vec![
            (InstrumentId::new("Z"), Some(5.0)),
            (InstrumentId::new("M"), Some(5.0)),
        ]);
        assert_eq!(selected, ids(&["M"]));
    }
}
