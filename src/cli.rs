//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

use crate::adapters::csv_adapter::{CsvAdapter, CsvCalendarAdapter};
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{BacktestReport, run_backtest};
use crate::domain::batch::{BatchEntry, expand_template, parse_jobs, run_batch};
use crate::domain::checks::CheckOutcome;
use crate::domain::config_validation::require_str;
use crate::domain::error::AlphasimError;
use crate::domain::market_data::MarketDataStore;
use crate::domain::metrics::Summary;
use crate::domain::run_config::{AlphaSource, RunConfig};
use crate::domain::signal::{ExpressionSignal, SignalDefinition};
use crate::domain::simulation::{CancelToken, RunState};
use crate::domain::universe::{InstrumentId, parse_instruments};
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

const KNOWN_SECTIONS: [&str; 8] = [
    "run",
    "universe",
    "alpha",
    "positions",
    "costs",
    "metrics",
    "checks",
    "data",
];

#[derive(Parser, Debug)]
#[command(name = "alphasim", about = "Cross-sectional alpha backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Backtest the configured alpha expression
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Override [alpha] expression
        #[arg(short, long)]
        expression: Option<String>,
        /// Write per-date records as CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Resolve and print the configuration without loading data
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the configured template once per data field
    Batch {
        #[arg(short, long)]
        config: PathBuf,
        /// Write one summary row per field as CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration and its alpha expression
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show data range for instrument(s)
    Info {
        #[arg(short, long)]
        config: PathBuf,
        /// Comma-separated instruments; defaults to [run] instruments
        #[arg(long)]
        instruments: Option<String>,
    },
    /// List instruments available in the data directory
    ListSymbols {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Data directory, instead of [data] directory
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Backtest {
            config,
            expression,
            output,
            dry_run,
        } => {
            if dry_run {
                run_dry_run(&config, expression.as_deref())
            } else {
                run_single(&config, expression.as_deref(), output.as_ref())
            }
        }
        Command::Batch { config, output } => run_batch_command(&config, output.as_ref()),
        Command::Validate { config } => run_validate(&config),
        Command::Info {
            config,
            instruments,
        } => run_info(&config, instruments.as_deref()),
        Command::ListSymbols { config, data_dir } => {
            run_list_symbols(config.as_ref(), data_dir.as_ref())
        }
    };
    result.unwrap_or_else(|code| code)
}

/// Print `err` and turn it into its exit code.
fn fail(err: AlphasimError) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::from(&err)
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(fail)
}

fn load_run_config(path: &PathBuf) -> Result<(FileConfigAdapter, RunConfig), ExitCode> {
    info!(path = %path.display(), "loading config");
    let adapter = load_config(path)?;
    let config = RunConfig::from_config(&adapter).map_err(fail)?;
    Ok((adapter, config))
}

fn parse_signal(source: &str) -> Result<ExpressionSignal, ExitCode> {
    ExpressionSignal::parse(source).map_err(|e| {
        eprintln!(
            "error: failed to parse expression:\n{}",
            e.display_with_context(source)
        );
        ExitCode::from(&AlphasimError::from(e))
    })
}

fn resolve_expression<'a>(
    config: &'a RunConfig,
    expression_override: Option<&'a str>,
) -> Result<&'a str, ExitCode> {
    match expression_override {
        Some(e) => Ok(e),
        None => config.expression().map_err(fail),
    }
}

fn load_store(config: &RunConfig, fields: Vec<String>, lookback: usize) -> Result<MarketDataStore, ExitCode> {
    let data_port = CsvAdapter::new(config.data.directory.clone());
    let calendar_port = CsvCalendarAdapter::new(config.data.calendar.clone());
    // One extra session so the first simulated date has a prior price.
    let request = config.load_request(fields, lookback.saturating_add(1));
    MarketDataStore::load(&data_port, &calendar_port, &request).map_err(fail)
}

fn run_single(
    config_path: &PathBuf,
    expression_override: Option<&str>,
    output_path: Option<&PathBuf>,
) -> Result<ExitCode, ExitCode> {
    let (_, config) = load_run_config(config_path)?;
    config.log_resolved();

    let source = resolve_expression(&config, expression_override)?;
    let signal = parse_signal(source)?;

    let fields: Vec<String> = signal.required_fields().into_iter().collect();
    let store = load_store(&config, fields, signal.lookback().saturating_add(config.evaluator.delay))?;

    let report = run_backtest(&store, &signal, &config, &CancelToken::new()).map_err(fail)?;
    print_report(&report);

    if let Some(output) = output_path {
        let output = output.display().to_string();
        CsvReportAdapter::new()
            .write(&report, &output)
            .map_err(fail)?;
        eprintln!("\nRecords written to: {}", output);
    }

    Ok(match report.outcome.failure() {
        Some(gap) => fail(AlphasimError::DataGap(gap.clone())),
        None => ExitCode::SUCCESS,
    })
}

fn run_batch_command(config_path: &PathBuf, output_path: Option<&PathBuf>) -> Result<ExitCode, ExitCode> {
    let (_, config) = load_run_config(config_path)?;
    config.log_resolved();

    let (template, fields) = match &config.alpha {
        AlphaSource::Template { template, fields } => (template.clone(), fields.clone()),
        AlphaSource::Expression(_) => {
            return Err(fail(AlphasimError::ConfigMissing {
                section: "alpha".into(),
                key: "template".into(),
            }));
        }
    };

    let jobs = expand_template(&template, &fields);
    let signals = parse_jobs(&jobs).map_err(fail)?;
    let required: Vec<String> = signals
        .iter()
        .flat_map(|s| s.required_fields())
        .collect();
    let lookback = signals.iter().map(|s| s.lookback()).max().unwrap_or(0);
    let store = load_store(&config, required, lookback.saturating_add(config.evaluator.delay))?;

    let entries = run_batch(&store, &jobs, &config, &CancelToken::new()).map_err(fail)?;
    print_batch(&entries);

    if let Some(output) = output_path {
        let output = output.display().to_string();
        CsvReportAdapter::new()
            .write_batch(&entries, &output)
            .map_err(fail)?;
        eprintln!("\nBatch summary written to: {}", output);
    }

    Ok(if entries.iter().all(|e| e.result.is_ok()) {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(4)
    })
}

pub fn run_dry_run(config_path: &PathBuf, expression_override: Option<&str>) -> Result<ExitCode, ExitCode> {
    let (_, config) = load_run_config(config_path)?;
    eprintln!("Config validated successfully");

    eprintln!("\nResolved configuration:");
    for (key, value) in config.resolved() {
        eprintln!("  {:<26} {}", key, value);
    }

    let sources: Vec<String> = match (expression_override, &config.alpha) {
        (Some(e), _) => vec![e.to_string()],
        (None, AlphaSource::Expression(e)) => vec![e.clone()],
        (None, AlphaSource::Template { template, fields }) => expand_template(template, fields)
            .into_iter()
            .map(|job| job.expression)
            .collect(),
    };
    for source in &sources {
        let signal = parse_signal(source)?;
        print_signal(&signal);
    }

    eprintln!("\nDry run complete: configuration is valid");
    Ok(ExitCode::SUCCESS)
}

fn run_validate(config_path: &PathBuf) -> Result<ExitCode, ExitCode> {
    eprintln!("Validating config: {}", config_path.display());
    let (adapter, config) = load_run_config(config_path)?;

    for section in adapter.sections() {
        if !KNOWN_SECTIONS.contains(&section.as_str()) {
            eprintln!("warning: unknown section [{}] is ignored", section);
        }
    }

    match &config.alpha {
        AlphaSource::Expression(source) => {
            let signal = parse_signal(source)?;
            print_signal(&signal);
        }
        AlphaSource::Template { template, fields } => {
            eprintln!("\nTemplate: {}", template);
            for job in expand_template(template, fields) {
                let signal = parse_signal(&job.expression)?;
                print_signal(&signal);
            }
        }
    }

    eprintln!("\nConfiguration is valid.");
    Ok(ExitCode::SUCCESS)
}

fn run_info(config_path: &PathBuf, instruments: Option<&str>) -> Result<ExitCode, ExitCode> {
    let adapter = load_config(config_path)?;
    let directory = require_str(&adapter, "data", "directory")
        .map_err(fail)?;
    let data_port = CsvAdapter::new(PathBuf::from(directory));

    let instruments: Vec<InstrumentId> = match instruments {
        Some(list) => parse_instruments(list).map_err(|e| {
            eprintln!("error: invalid --instruments: {e}");
            ExitCode::from(2)
        })?,
        None => {
            let list = require_str(&adapter, "run", "instruments")
                .map_err(fail)?;
            parse_instruments(&list).map_err(|e| {
                fail(AlphasimError::ConfigInvalid {
                    section: "run".into(),
                    key: "instruments".into(),
                    reason: e.to_string(),
                })
            })?
        }
    };

    for instrument in &instruments {
        match data_port.data_range(instrument) {
            Ok(Some((first, last, count))) => {
                println!("{}: {} rows, {} to {}", instrument, count, first, last);
            }
            Ok(None) => eprintln!("{}: no data found", instrument),
            Err(e) => eprintln!("error querying {}: {}", instrument, e),
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_list_symbols(config_path: Option<&PathBuf>, data_dir: Option<&PathBuf>) -> Result<ExitCode, ExitCode> {
    let directory = match (data_dir, config_path) {
        (Some(dir), _) => dir.clone(),
        (None, Some(path)) => {
            let adapter = load_config(path)?;
            PathBuf::from(
                require_str(&adapter, "data", "directory")
                    .map_err(fail)?,
            )
        }
        (None, None) => {
            eprintln!("error: --config or --data-dir is required for list-symbols");
            return Err(ExitCode::from(1));
        }
    };

    let instruments = CsvAdapter::new(directory.clone())
        .list_instruments()
        .map_err(fail)?;
    if instruments.is_empty() {
        eprintln!("No instruments found in {}", directory.display());
    } else {
        for instrument in &instruments {
            println!("{}", instrument);
        }
        eprintln!("{} instruments found", instruments.len());
    }
    Ok(ExitCode::SUCCESS)
}

fn print_signal(signal: &ExpressionSignal) {
    let fields: Vec<String> = signal.required_fields().into_iter().collect();
    eprintln!("\nAlpha:");
    eprintln!("  Parsed:   {}", signal.expression());
    eprintln!("  Raw:      {}", signal.name());
    eprintln!("  Fields:   {}", fields.join(", "));
    eprintln!("  Lookback: {} sessions", signal.lookback());
}

fn pct(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}%", v * 100.0))
        .unwrap_or_else(|| "n/a".to_string())
}

fn num(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.3}", v))
        .unwrap_or_else(|| "n/a".to_string())
}

pub fn print_summary(summary: &Summary) {
    eprintln!("Periods:          {}", summary.periods);
    eprintln!("Cumulative:       {}", pct(summary.cumulative_return));
    eprintln!("Annualized:       {}", pct(summary.annual_return));
    eprintln!("Volatility:       {}", pct(summary.annual_volatility));
    eprintln!("Sharpe Ratio:     {}", num(summary.sharpe));
    match &summary.max_drawdown {
        Some(dd) => eprintln!(
            "Max Drawdown:     -{:.1}% ({} to {})",
            dd.depth * 100.0,
            dd.peak,
            dd.trough
        ),
        None => eprintln!("Max Drawdown:     n/a"),
    }
    eprintln!("Avg Turnover:     {}", pct(summary.avg_turnover));
    eprintln!("Mean IC:          {}", num(summary.mean_ic));
    eprintln!("Total Cost:       {}", pct(summary.total_cost));
    eprintln!("Fitness:          {}", num(summary.fitness));
    eprintln!("Flagged Dates:    {}", summary.flagged_dates);
    for check in &summary.checks {
        eprintln!(
            "{:<17} {} ({} vs {})",
            format!("{}:", check.name),
            check.outcome,
            num(check.value),
            check.limit
        );
    }
}

/// `PASS`, the failed check names, or empty without checks.
fn check_status(summary: &Summary) -> String {
    match summary.passed() {
        None => String::new(),
        Some(true) => "  checks PASS".to_string(),
        Some(false) => {
            let failed: Vec<&str> = summary
                .checks
                .iter()
                .filter(|c| c.outcome == CheckOutcome::Fail)
                .map(|c| c.name.as_str())
                .collect();
            format!("  checks FAIL {}", failed.join(","))
        }
    }
}

fn print_report(report: &BacktestReport) {
    eprintln!("\n=== Results: {} ===", report.signal);
    match &report.outcome.state {
        RunState::Failed(gap) => eprintln!(
            "Run stopped at {} ({}); {} dates completed",
            gap.date,
            gap.kind,
            report.outcome.records.len()
        ),
        RunState::Cancelled(date) => eprintln!("Run cancelled at {}", date),
        _ => {}
    }
    print_summary(&report.summary);
    eprintln!("Trades:           {}", report.outcome.trades.len());
}

fn print_batch(entries: &[BatchEntry]) {
    eprintln!("\n=== Batch Results ===");
    for entry in entries {
        match &entry.result {
            Ok(report) => eprintln!(
                "  {:<16} sharpe {:>8}  fitness {:>8}  turnover {:>8}{}{}",
                entry.job.field,
                num(report.summary.sharpe),
                num(report.summary.fitness),
                pct(report.summary.avg_turnover),
                check_status(&report.summary),
                match report.outcome.failure() {
                    Some(gap) => format!("  (stopped at {})", gap.date),
                    None => String::new(),
                }
            ),
            Err(e) => eprintln!("  {:<16} rejected: {}", entry.job.field, e),
        }
    }
}
