//! Resolved run configuration.
//!
//! Constraint values (weighting caps, minimum names, the cost model) have no
//! defaults: leaving one out is an error, never a guess. Optional switches
//! (delay, decay, neutralization, turnover cap, universe filter) are off
//! unless set. The `[checks]` section is optional as a whole, but once any
//! threshold is given all four are required.

use crate::domain::config_validation::{
    invalid, missing, optional_choice, optional_f64, optional_list, optional_usize,
    require_choice, require_date, require_f64, require_str, require_usize,
};
use crate::domain::checks::CheckConfig;
use crate::domain::cost::{CostModel, parse_curve};
use crate::domain::error::AlphasimError;
use crate::domain::market_data::LoadRequest;
use crate::domain::metrics::{Annualization, MetricsConfig};
use crate::domain::position_builder::{Neutralization, PositionConfig, Weighting};
use crate::domain::signal::EvaluatorSettings;
use crate::domain::universe::{InstrumentId, TopN, UniverseFilter, parse_instruments};
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;
use std::path::PathBuf;

/// Placeholder a batch template substitutes with each data field.
pub const TEMPLATE_PLACEHOLDER: &str = "{data}";

#[derive(Debug, Clone, PartialEq)]
pub enum AlphaSource {
    Expression(String),
    /// An expression containing `{data}`, run once per field.
    Template { template: String, fields: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataConfig {
    pub directory: PathBuf,
    pub calendar: PathBuf,
    pub price_field: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub instruments: Vec<InstrumentId>,
    pub evaluator: EvaluatorSettings,
    pub universe: UniverseFilter,
    pub alpha: AlphaSource,
    pub positions: PositionConfig,
    pub costs: CostModel,
    pub metrics: MetricsConfig,
    pub checks: Option<CheckConfig>,
    pub data: DataConfig,
}

impl RunConfig {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, AlphasimError> {
        let start_date = require_date(config, "run", "start_date")?;
        let end_date = require_date(config, "run", "end_date")?;
        if start_date > end_date {
            return Err(invalid(
                "run",
                "start_date",
                "start_date must not be after end_date",
            ));
        }

        let instruments = parse_instruments(&require_str(config, "run", "instruments")?)
            .map_err(|e| invalid("run", "instruments", e.to_string()))?;

        let decay = optional_usize(config, "run", "decay")?.unwrap_or(0);
        if decay == 1 {
            return Err(invalid(
                "run",
                "decay",
                "decay must be 0 (off) or at least 2",
            ));
        }
        let evaluator = EvaluatorSettings {
            delay: optional_usize(config, "run", "delay")?.unwrap_or(0),
            decay,
        };

        let config = RunConfig {
            start_date,
            end_date,
            instruments,
            evaluator,
            universe: build_universe(config)?,
            alpha: build_alpha(config)?,
            positions: build_positions(config)?,
            costs: build_costs(config)?,
            metrics: build_metrics(config)?,
            checks: build_checks(config)?,
            data: build_data(config)?,
        };
        config.positions.validate()?;
        if let Some(checks) = &config.checks {
            checks.validate()?;
        }
        Ok(config)
    }

    /// The expression for a single backtest; templates need the batch runner.
    pub fn expression(&self) -> Result<&str, AlphasimError> {
        match &self.alpha {
            AlphaSource::Expression(e) => Ok(e),
            AlphaSource::Template { .. } => Err(missing("alpha", "expression")),
        }
    }

    /// Data request covering the run range plus `lookback` sessions of warmup.
    pub fn load_request(&self, fields: Vec<String>, lookback: usize) -> LoadRequest {
        let mut fields = fields;
        if let Some(group) = self.positions.neutralization.group_field() {
            fields.push(group.to_string());
        }
        LoadRequest {
            instruments: self.instruments.clone(),
            start: self.start_date,
            end: self.end_date,
            fields,
            lookback,
            price_field: self.data.price_field.clone(),
            filter: self.universe.clone(),
        }
    }

    /// Every resolved setting as `(key, value)` pairs, defaults included.
    pub fn resolved(&self) -> Vec<(&'static str, String)> {
        let instruments: Vec<&str> = self.instruments.iter().map(|i| i.as_str()).collect();
        let mut out = vec![
            ("run.start_date", self.start_date.to_string()),
            ("run.end_date", self.end_date.to_string()),
            ("run.instruments", instruments.join(", ")),
            ("run.delay", self.evaluator.delay.to_string()),
            ("run.decay", self.evaluator.decay.to_string()),
        ];
        out.push((
            "universe.top_n",
            match &self.universe.top_n {
                Some(t) => format!("{} by {}", t.n, t.field),
                None => "off".to_string(),
            },
        ));
        match &self.alpha {
            AlphaSource::Expression(e) => out.push(("alpha.expression", e.clone())),
            AlphaSource::Template { template, fields } => {
                out.push(("alpha.template", template.clone()));
                out.push(("alpha.fields", fields.join(", ")));
            }
        }
        out.extend([
            ("positions.weighting", self.positions.weighting.to_string()),
            ("positions.max_weight", self.positions.max_weight.to_string()),
            ("positions.gross_cap", self.positions.gross_cap.to_string()),
            (
                "positions.neutralization",
                self.positions.neutralization.to_string(),
            ),
            (
                "positions.max_turnover",
                self.positions
                    .max_turnover
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "off".to_string()),
            ),
            ("positions.min_names", self.positions.min_names.to_string()),
            ("costs.model", self.costs.to_string()),
            ("metrics.risk_free_rate", self.metrics.risk_free_rate.to_string()),
            ("metrics.annualization", self.metrics.annualization.to_string()),
            (
                "checks",
                match &self.checks {
                    Some(c) => format!(
                        "sharpe >= {}, fitness >= {}, turnover {}..{}",
                        c.min_sharpe, c.min_fitness, c.min_turnover, c.max_turnover
                    ),
                    None => "off".to_string(),
                },
            ),
            ("data.directory", self.data.directory.display().to_string()),
            ("data.calendar", self.data.calendar.display().to_string()),
            ("data.price_field", self.data.price_field.clone()),
        ]);
        out
    }

    pub fn log_resolved(&self) {
        for (key, value) in self.resolved() {
            tracing::info!(key, value = %value, "config");
        }
    }
}

fn build_universe(config: &dyn ConfigPort) -> Result<UniverseFilter, AlphasimError> {
    let top_n = match optional_usize(config, "universe", "top_n")? {
        None => None,
        Some(0) => return Err(invalid("universe", "top_n", "top_n must be positive")),
        Some(n) => Some(TopN {
            n,
            field: require_str(config, "universe", "rank_field")?,
        }),
    };
    Ok(UniverseFilter { top_n })
}

fn build_alpha(config: &dyn ConfigPort) -> Result<AlphaSource, AlphasimError> {
    let expression = config.get_nonempty("alpha", "expression");
    let template = config.get_nonempty("alpha", "template");
    match (expression, template) {
        (Some(_), Some(_)) => Err(AlphasimError::Configuration {
            reason: "[alpha] sets both expression and template".to_string(),
        }),
        (Some(e), None) => Ok(AlphaSource::Expression(e)),
        (None, Some(template)) => {
            if !template.contains(TEMPLATE_PLACEHOLDER) {
                return Err(invalid(
                    "alpha",
                    "template",
                    format!("template must contain {}", TEMPLATE_PLACEHOLDER),
                ));
            }
            let fields = optional_list(config, "alpha", "fields")
                .filter(|f| !f.is_empty())
                .ok_or_else(|| missing("alpha", "fields"))?;
            Ok(AlphaSource::Template { template, fields })
        }
        (None, None) => Err(missing("alpha", "expression")),
    }
}

fn build_positions(config: &dyn ConfigPort) -> Result<PositionConfig, AlphasimError> {
    let weighting = match require_choice(config, "positions", "weighting", &["rank", "proportional"])?
        .as_str()
    {
        "rank" => Weighting::Rank,
        _ => Weighting::Proportional,
    };

    let neutralization = match optional_choice(
        config,
        "positions",
        "neutralization",
        &["none", "market", "group"],
    )?
    .as_deref()
    {
        None | Some("none") => Neutralization::None,
        Some("market") => Neutralization::Market,
        _ => Neutralization::Group(require_str(config, "positions", "group_field")?),
    };

    Ok(PositionConfig {
        weighting,
        max_weight: require_f64(config, "positions", "max_weight")?,
        gross_cap: require_f64(config, "positions", "gross_cap")?,
        neutralization,
        max_turnover: optional_f64(config, "positions", "max_turnover")?,
        min_names: require_usize(config, "positions", "min_names")?,
    })
}

fn build_costs(config: &dyn ConfigPort) -> Result<CostModel, AlphasimError> {
    let model = match require_choice(config, "costs", "model", &["fixed", "curve"])?.as_str() {
        "fixed" => CostModel::FixedBps(require_f64(config, "costs", "bps")?),
        _ => {
            let curve = require_str(config, "costs", "curve")?;
            CostModel::Curve(parse_curve(&curve).map_err(|e| invalid("costs", "curve", e))?)
        }
    };
    let key = match model {
        CostModel::FixedBps(_) => "bps",
        CostModel::Curve(_) => "curve",
    };
    model.validate().map_err(|e| invalid("costs", key, e))?;
    Ok(model)
}

fn build_metrics(config: &dyn ConfigPort) -> Result<MetricsConfig, AlphasimError> {
    let annualization = match config.get_nonempty("metrics", "annualization") {
        None => Annualization::FromCalendar,
        Some(v) if v.eq_ignore_ascii_case("calendar") => Annualization::FromCalendar,
        Some(v) => {
            let periods: f64 = v.parse().map_err(|_| {
                invalid(
                    "metrics",
                    "annualization",
                    format!("expected 'calendar' or periods per year, found '{}'", v),
                )
            })?;
            if !(periods > 0.0 && periods.is_finite()) {
                return Err(invalid(
                    "metrics",
                    "annualization",
                    "periods per year must be positive",
                ));
            }
            Annualization::Fixed(periods)
        }
    };
    Ok(MetricsConfig {
        risk_free_rate: optional_f64(config, "metrics", "risk_free_rate")?.unwrap_or(0.0),
        annualization,
    })
}

const CHECK_KEYS: [&str; 4] = ["min_sharpe", "min_fitness", "min_turnover", "max_turnover"];

fn build_checks(config: &dyn ConfigPort) -> Result<Option<CheckConfig>, AlphasimError> {
    if CHECK_KEYS
        .iter()
        .all(|key| config.get_nonempty("checks", key).is_none())
    {
        return Ok(None);
    }
    Ok(Some(CheckConfig {
        min_sharpe: require_f64(config, "checks", "min_sharpe")?,
        min_fitness: require_f64(config, "checks", "min_fitness")?,
        min_turnover: require_f64(config, "checks", "min_turnover")?,
        max_turnover: require_f64(config, "checks", "max_turnover")?,
    }))
}

fn build_data(config: &dyn ConfigPort) -> Result<DataConfig, AlphasimError> {
    let directory = PathBuf::from(require_str(config, "data", "directory")?);
    let calendar = config
        .get_nonempty("data", "calendar")
        .map(PathBuf::from)
        .unwrap_or_else(|| directory.join("calendar.csv"));
    Ok(DataConfig {
        directory,
        calendar,
        price_field: config
            .get_nonempty("data", "price_field")
            .unwrap_or_else(|| "close".to_string()),
    })
}
