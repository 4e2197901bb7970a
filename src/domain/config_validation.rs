//! Typed access to configuration values.
//!
//! Every getter distinguishes a missing key (`ConfigMissing`) from a value
//! that does not parse (`ConfigInvalid`).

use crate::domain::error::AlphasimError;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;
use std::str::FromStr;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn missing(section: &str, key: &str) -> AlphasimError {
    AlphasimError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

pub fn invalid(section: &str, key: &str, reason: impl Into<String>) -> AlphasimError {
    AlphasimError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

pub fn require_str(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, AlphasimError> {
    config
        .get_nonempty(section, key)
        .ok_or_else(|| missing(section, key))
}

fn parse_as<T: FromStr>(
    value: &str,
    section: &str,
    key: &str,
    what: &str,
) -> Result<T, AlphasimError> {
    value
        .parse::<T>()
        .map_err(|_| invalid(section, key, format!("expected {}, found '{}'", what, value)))
}

pub fn optional_f64(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<f64>, AlphasimError> {
    match config.get_nonempty(section, key) {
        None => Ok(None),
        Some(v) => {
            let parsed: f64 = parse_as(&v, section, key, "a number")?;
            if !parsed.is_finite() {
                return Err(invalid(section, key, "must be finite"));
            }
            Ok(Some(parsed))
        }
    }
}

pub fn require_f64(config: &dyn ConfigPort, section: &str, key: &str) -> Result<f64, AlphasimError> {
    optional_f64(config, section, key)?.ok_or_else(|| missing(section, key))
}

pub fn optional_usize(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<usize>, AlphasimError> {
    config
        .get_nonempty(section, key)
        .map(|v| parse_as(&v, section, key, "a non-negative integer"))
        .transpose()
}

pub fn require_usize(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<usize, AlphasimError> {
    optional_usize(config, section, key)?.ok_or_else(|| missing(section, key))
}

pub fn require_date(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<NaiveDate, AlphasimError> {
    let value = require_str(config, section, key)?;
    NaiveDate::parse_from_str(&value, DATE_FORMAT).map_err(|_| {
        invalid(
            section,
            key,
            format!("invalid {} format, expected YYYY-MM-DD", key),
        )
    })
}

/// Value that must be one of `choices` (case-insensitive), returned lower-cased.
pub fn optional_choice(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    choices: &[&str],
) -> Result<Option<String>, AlphasimError> {
    match config.get_nonempty(section, key) {
        None => Ok(None),
        Some(v) => {
            let lower = v.to_lowercase();
            if choices.contains(&lower.as_str()) {
                Ok(Some(lower))
            } else {
                Err(invalid(
                    section,
                    key,
                    format!("expected one of {}, found '{}'", choices.join(", "), v),
                ))
            }
        }
    }
}

pub fn require_choice(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    choices: &[&str],
) -> Result<String, AlphasimError> {
    optional_choice(config, section, key, choices)?.ok_or_else(|| missing(section, key))
}

/// Comma-separated list of non-empty tokens.
pub fn optional_list(config: &dyn ConfigPort, section: &str, key: &str) -> Option<Vec<String>> {
    config.get_nonempty(section, key).map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}
