//! Integration tests for the full backtest pipeline.
//!
//! Tests cover:
//! - End-to-end run of a constant signal over three instruments
//! - Failure one session past the end of the trading calendar
//! - Idempotence of repeated runs
//! - Point-in-time invariance under late revisions
//! - Degenerate dates with too few defined scores
//! - Group neutralization, batch runs and the report port
//! - Weight, neutrality and turnover invariants under random scores

mod common;

use alphasim::domain::backtest::{BacktestReport, run_backtest};
use alphasim::domain::batch::{expand_template, run_batch};
use alphasim::domain::error::{AlphasimError, GapKind};
use alphasim::domain::market_data::{MarketDataStore, RawRecord};
use alphasim::domain::position_builder::{Neutralization, PositionBuilder, PositionConfig, Weighting};
use alphasim::domain::signal::{ExpressionSignal, ScoreMap};
use alphasim::domain::simulation::{CancelToken, RunState};
use alphasim::domain::universe::InstrumentId;
use alphasim::domain::portfolio::{WeightMap, gross_exposure, net_exposure, turnover};
use alphasim::ports::report_port::ReportPort;
use approx::assert_relative_eq;
use common::*;
use std::cell::RefCell;
use std::collections::BTreeMap;

fn backtest(store: &MarketDataStore, expression: &str, ini: &str) -> BacktestReport {
    let config = run_config(ini);
    let signal = ExpressionSignal::parse(expression).unwrap();
    run_backtest(store, &signal, &config, &CancelToken::new()).unwrap()
}

fn base_store() -> MarketDataStore {
    let config = run_config(BASE_INI);
    load_store(&config, three_instruments(), &DAYS, &["score"], 1)
}

mod end_to_end {
    use super::*;

    #[test]
    fn constant_signal_holds_half_long_half_short() {
        let store = base_store();
        let report = backtest(&store, "score", BASE_INI);
        let outcome = &report.outcome;

        assert_eq!(outcome.state, RunState::Completed);
        assert_eq!(outcome.records.len(), 4);

        // Entry on the first date, nothing traded afterwards.
        assert_eq!(outcome.trades.len(), 2);
        let entries: BTreeMap<String, f64> = outcome
            .trades
            .iter()
            .map(|t| (t.instrument.to_string(), t.to_weight))
            .collect();
        assert_relative_eq!(entries["AAA"], 0.5);
        assert_relative_eq!(entries["CCC"], -0.5);
        assert!(outcome.trades.iter().all(|t| t.date == d(2)));

        assert_relative_eq!(outcome.records[0].turnover, 1.0);
        for record in &outcome.records {
            assert_relative_eq!(record.gross_exposure, 1.0);
            assert_relative_eq!(record.net_exposure, 0.0, epsilon = 1e-12);
            assert_eq!(record.long_count, 1);
            assert_eq!(record.short_count, 1);
        }
        for record in &outcome.records[1..] {
            assert_eq!(record.turnover, 0.0);
        }

        // AAA +1.98%, CCC -0.99% into the third date.
        let expected = 0.5 * (103.0 / 101.0 - 1.0) - 0.5 * (50.0 / 50.5 - 1.0);
        assert_relative_eq!(outcome.records[2].net_return, expected, epsilon = 1e-12);

        let sharpe = report.summary.sharpe.unwrap();
        assert!(sharpe.is_finite());
        assert_eq!(report.summary.periods, 4);
        assert_relative_eq!(report.summary.avg_turnover.unwrap(), 0.25);
        assert_eq!(report.summary.flagged_dates, 0);
    }

    #[test]
    fn equity_curve_compounds_net_returns() {
        let store = base_store();
        let report = backtest(&store, "score", BASE_INI);
        let curve = &report.outcome.equity_curve;
        assert_eq!(curve.len(), 4);
        let mut equity = 1.0;
        for (point, record) in curve.iter().zip(&report.outcome.records) {
            equity *= 1.0 + record.net_return;
            assert_relative_eq!(point.equity, equity, epsilon = 1e-12);
            assert_eq!(point.date, record.date);
        }
    }
}

mod alpha_checks {
    use super::*;
    use alphasim::domain::checks::{CheckName, CheckOutcome};

    fn with_checks(max_turnover: &str) -> String {
        format!(
            "{}\n[checks]\nmin_sharpe = -1000\nmin_fitness = -1000\nmin_turnover = 0.1\nmax_turnover = {}\n",
            BASE_INI, max_turnover
        )
    }

    #[test]
    fn summary_grades_turnover_band() {
        let store = base_store();
        let report = backtest(&store, "score", &with_checks("0.2"));
        let checks = &report.summary.checks;
        assert_eq!(checks.len(), 4);
        let outcome = |name: CheckName| checks.iter().find(|c| c.name == name).unwrap().outcome;
        assert_eq!(outcome(CheckName::LowSharpe), CheckOutcome::Pass);
        assert_eq!(outcome(CheckName::LowFitness), CheckOutcome::Pass);
        assert_eq!(outcome(CheckName::LowTurnover), CheckOutcome::Pass);
        // Average turnover is 0.25.
        assert_eq!(outcome(CheckName::HighTurnover), CheckOutcome::Fail);
        assert_eq!(report.summary.passed(), Some(false));

        let report = backtest(&store, "score", &with_checks("0.5"));
        assert_eq!(report.summary.passed(), Some(true));
    }

    #[test]
    fn no_checks_section_leaves_summary_ungraded() {
        let report = backtest(&base_store(), "score", BASE_INI);
        assert!(report.summary.checks.is_empty());
        assert_eq!(report.summary.passed(), None);
    }
}

mod calendar_boundary {
    use super::*;

    #[test]
    fn one_day_past_calendar_reports_boundary_date() {
        let ini = BASE_INI.replace("end_date = 2024-01-05", "end_date = 2024-01-06");
        let config = run_config(&ini);
        let store = load_store(&config, three_instruments(), &DAYS, &["score"], 1);
        let report = backtest(&store, "score", &ini);

        let gap = report.outcome.failure().unwrap();
        assert_eq!(gap.date, d(6));
        assert_eq!(gap.kind, GapKind::BeyondCalendar);

        // Every covered date is intact.
        assert_eq!(report.outcome.records.len(), 4);
        assert_eq!(report.outcome.records.last().unwrap().date, d(5));
        assert!(report.summary.sharpe.is_some());
    }

    #[test]
    fn gap_converts_to_exit_code_six() {
        let store = base_store();
        let ini = BASE_INI.replace("end_date = 2024-01-05", "end_date = 2024-01-06");
        let report = backtest(&store, "score", &ini);
        let err = AlphasimError::DataGap(report.outcome.failure().unwrap().clone());
        // ExitCode has no PartialEq; compare the debug form.
        assert_eq!(
            format!("{:?}", std::process::ExitCode::from(&err)),
            format!("{:?}", std::process::ExitCode::from(6))
        );
    }

    #[test]
    fn universe_without_prices_fails_on_that_date() {
        let config = run_config(BASE_INI);
        let mut records = three_instruments();
        for r in records.iter_mut().filter(|r| r.date == d(4)) {
            r.values.insert("close".into(), None);
        }
        let store = load_store(&config, records, &DAYS, &["score"], 1);
        let report = backtest(&store, "score", BASE_INI);

        let gap = report.outcome.failure().unwrap();
        assert_eq!(gap.date, d(4));
        assert_eq!(gap.kind, GapKind::EmptyUniverse);
        assert_eq!(report.outcome.records.len(), 2);
    }
}

mod idempotence {
    use super::*;

    #[test]
    fn repeated_runs_are_byte_identical() {
        let ini = BASE_INI.replace("min_names = 2", "min_names = 2\nmax_turnover = 0.6");
        let store = base_store();
        let first = backtest(&store, "rank(-returns(close, 1))", &ini);
        let second = backtest(&store, "rank(-returns(close, 1))", &ini);
        assert_eq!(
            format!("{:?}", first.outcome.records),
            format!("{:?}", second.outcome.records)
        );
        assert_eq!(first.summary, second.summary);
    }
}

mod point_in_time {
    use super::*;

    fn revisions() -> Vec<RawRecord> {
        vec![
            RawRecord::new("AAA", d(2))
                .published(d(4))
                .with("close", Some(90.0)),
            RawRecord::new("BBB", d(3))
                .published(d(5))
                .with("close", Some(12.0))
                .with("score", Some(5.0)),
        ]
    }

    #[test]
    fn late_revisions_do_not_change_earlier_views() {
        let config = run_config(BASE_INI);
        let plain = load_store(&config, three_instruments(), &DAYS, &["score"], 1);
        let mut records = three_instruments();
        records.extend(revisions());
        let revised = load_store(&config, records, &DAYS, &["score"], 1);

        for as_of in [d(2), d(3)] {
            for id in ["AAA", "BBB", "CCC"].map(InstrumentId::new) {
                let a = plain.history(&id, as_of).unwrap();
                let b = revised.history(&id, as_of).unwrap();
                for lag in 0..a.len() {
                    assert_eq!(a.value("close", lag), b.value("close", lag));
                    assert_eq!(a.value("score", lag), b.value("score", lag));
                }
            }
        }

        // Visible once published.
        let aaa = InstrumentId::new("AAA");
        assert_eq!(revised.value_as_of(&aaa, "close", d(2), d(4)), Some(90.0));
        assert_eq!(revised.value_as_of(&aaa, "close", d(2), d(3)), Some(100.0));
    }

    #[test]
    fn late_revisions_do_not_change_earlier_records() {
        let config = run_config(BASE_INI);
        let plain = load_store(&config, three_instruments(), &DAYS, &["score"], 1);
        let mut records = three_instruments();
        records.extend(revisions());
        let revised = load_store(&config, records, &DAYS, &["score"], 1);

        let expression = "ts_mean(score, 1) - returns(close, 1)";
        let a = backtest(&plain, expression, BASE_INI);
        let b = backtest(&revised, expression, BASE_INI);
        assert_eq!(a.outcome.records[..2], b.outcome.records[..2]);
    }
}

mod degenerate_dates {
    use super::*;

    #[test]
    fn too_few_scores_gives_flat_book_and_no_turnover() {
        let config = run_config(BASE_INI);
        let mut records = three_instruments();
        // Only AAA is scorable on the first date.
        for r in records
            .iter_mut()
            .filter(|r| r.date == d(2) && r.instrument.as_str() != "AAA")
        {
            r.values.insert("score".into(), None);
        }
        let store = load_store(&config, records, &DAYS, &["score"], 1);
        let report = backtest(&store, "score", BASE_INI);

        let first = &report.outcome.records[0];
        assert!(first.flags.thin);
        assert_eq!(first.scored, 1);
        assert_eq!(first.universe_size, 3);
        assert_eq!(first.gross_exposure, 0.0);
        assert_eq!(first.turnover, 0.0);

        let second = &report.outcome.records[1];
        assert!(!second.flags.thin);
        assert_relative_eq!(second.turnover, 1.0);
        assert_eq!(report.summary.flagged_dates, 1);
    }

    #[test]
    fn unknown_field_is_rejected_at_registration() {
        let store = base_store();
        let config = run_config(BASE_INI);
        let signal = ExpressionSignal::parse("rank(vwap)").unwrap();
        let err = run_backtest(&store, &signal, &config, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, AlphasimError::SignalInvalid { ref reason } if reason.contains("vwap")));
    }
}

mod group_neutral {
    use super::*;

    #[test]
    fn each_group_nets_to_zero() {
        let ini = BASE_INI
            .replace("instruments = AAA, BBB, CCC", "instruments = AAA, BBB, CCC, DDD")
            .replace(
                "neutralization = market",
                "neutralization = group\ngroup_field = sector",
            );
        let config = run_config(&ini);
        let mut records = Vec::new();
        for (code, score, sector) in [("AAA", 1.0, 1.0), ("BBB", -1.0, 1.0), ("CCC", 2.0, 2.0), ("DDD", -2.0, 2.0)] {
            records.extend(
                series(code, &DAYS, &[10.0, 10.5, 10.2, 10.4], Some(score))
                    .into_iter()
                    .map(|r| r.with("sector", Some(sector))),
            );
        }
        let store = load_store(&config, records, &DAYS, &["score"], 1);
        let report = backtest(&store, "score", &ini);

        let weights: BTreeMap<String, f64> = report
            .outcome
            .trades
            .iter()
            .filter(|t| t.date == d(2))
            .map(|t| (t.instrument.to_string(), t.to_weight))
            .collect();
        assert_relative_eq!(weights["AAA"] + weights["BBB"], 0.0, epsilon = 1e-12);
        assert_relative_eq!(weights["CCC"] + weights["DDD"], 0.0, epsilon = 1e-12);
        assert_relative_eq!(weights["AAA"], 1.0 / 6.0, epsilon = 1e-12);
        assert_relative_eq!(weights["CCC"], 2.0 / 6.0, epsilon = 1e-12);
        assert!(report.outcome.records.iter().all(|r| r.gross_exposure <= 1.0 + 1e-12));
    }
}

mod batch_runs {
    use super::*;

    #[test]
    fn template_runs_once_per_field() {
        let store = base_store();
        let config = run_config(BASE_INI);
        let jobs = expand_template("ts_mean({data}, 1)", &["score".to_string(), "close".to_string()]);
        let entries = run_batch(&store, &jobs, &config, &CancelToken::new()).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].job.field, "score");
        assert_eq!(entries[1].job.field, "close");

        // The score job matches a direct run of the same expression.
        let direct = backtest(&store, "ts_mean(score, 1)", BASE_INI);
        let batched = entries[0].result.as_ref().unwrap();
        assert_eq!(batched.outcome.records, direct.outcome.records);
    }

    #[test]
    fn unknown_field_rejects_only_that_job() {
        let store = base_store();
        let config = run_config(BASE_INI);
        let jobs = expand_template("rank({data})", &["score".to_string(), "vwap".to_string()]);
        let entries = run_batch(&store, &jobs, &config, &CancelToken::new()).unwrap();
        assert!(entries[0].result.is_ok());
        assert!(matches!(
            entries[1].result,
            Err(AlphasimError::SignalInvalid { .. })
        ));
    }
}

struct RecordingReport {
    calls: RefCell<Vec<(String, usize)>>,
}

impl RecordingReport {
    fn new() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl ReportPort for RecordingReport {
    fn write(&self, report: &BacktestReport, output_path: &str) -> Result<(), AlphasimError> {
        self.calls
            .borrow_mut()
            .push((output_path.to_string(), report.outcome.records.len()));
        Ok(())
    }

    fn write_batch(
        &self,
        entries: &[alphasim::domain::batch::BatchEntry],
        output_path: &str,
    ) -> Result<(), AlphasimError> {
        self.calls
            .borrow_mut()
            .push((output_path.to_string(), entries.len()));
        Ok(())
    }
}

mod report_port {
    use super::*;

    #[test]
    fn report_receives_full_record_series() {
        let store = base_store();
        let report = backtest(&store, "score", BASE_INI);
        let port = RecordingReport::new();
        port.write(&report, "records.csv").unwrap();
        assert_eq!(port.calls.borrow().as_slice(), &[("records.csv".to_string(), 4)]);
    }
}

mod data_loading {
    use super::*;

    #[test]
    fn instruments_without_data_are_skipped() {
        let ini = BASE_INI.replace("instruments = AAA, BBB, CCC", "instruments = AAA, BBB, CCC, ZZZ");
        let config = run_config(&ini);
        let store = load_store(&config, three_instruments(), &DAYS, &["score"], 1);
        assert_eq!(store.instruments().count(), 3);
    }

    #[test]
    fn data_source_errors_propagate() {
        let config = run_config(BASE_INI);
        let port = MockDataPort::new()
            .with_records(three_instruments())
            .with_error("BBB", "connection reset");
        let request = config.load_request(vec!["score".into()], 1);
        let err = MarketDataStore::load(&port, &MockCalendar::days(&DAYS), &request).unwrap_err();
        assert!(matches!(err, AlphasimError::DataSource { .. }));
    }

    #[test]
    fn no_data_at_all_is_an_error() {
        let config = run_config(BASE_INI);
        let request = config.load_request(vec!["score".into()], 1);
        let err = MarketDataStore::load(&MockDataPort::new(), &MockCalendar::days(&DAYS), &request)
            .unwrap_err();
        assert!(matches!(err, AlphasimError::NoData { .. }));
    }
}

mod invariants {
    use super::*;
    use proptest::prelude::*;

    const NAMES: [&str; 6] = ["A", "B", "C", "D", "E", "F"];

    fn scores(values: &[Option<f64>]) -> ScoreMap {
        NAMES
            .iter()
            .zip(values)
            .map(|(n, v)| (InstrumentId::new(n), *v))
            .collect()
    }

    fn builder(weighting: Weighting, neutral: bool, cap: f64, max_weight: f64, max_turnover: f64) -> PositionBuilder {
        PositionBuilder::new(PositionConfig {
            weighting,
            max_weight,
            gross_cap: cap,
            neutralization: if neutral {
                Neutralization::Market
            } else {
                Neutralization::None
            },
            max_turnover: Some(max_turnover),
            min_names: 2,
        })
        .unwrap()
    }

    fn score_vec() -> impl Strategy<Value = Vec<Option<f64>>> {
        prop::collection::vec(prop::option::weighted(0.8, -5.0f64..5.0), NAMES.len())
    }

    proptest! {
        #[test]
        fn weights_respect_caps_across_dates(
            dates in prop::collection::vec(score_vec(), 1..8),
            rank in any::<bool>(),
            neutral in any::<bool>(),
            cap in 0.2f64..2.0,
            max_weight in 0.05f64..1.0,
            max_turnover in 0.05f64..2.0,
        ) {
            let weighting = if rank { Weighting::Rank } else { Weighting::Proportional };
            let builder = builder(weighting, neutral, cap, max_weight, max_turnover);
            let groups = BTreeMap::new();
            let mut previous = WeightMap::new();

            for values in &dates {
                let proposal = builder.build(&scores(values), &groups, &previous);
                let weights = proposal.weights;

                prop_assert!(gross_exposure(&weights) <= cap + 1e-9);
                prop_assert!(weights.values().all(|w| w.abs() <= max_weight + 1e-9));
                prop_assert!(turnover(&previous, &weights) <= max_turnover + 1e-9);
                if neutral {
                    prop_assert!(net_exposure(&weights).abs() < 1e-9);
                }
                previous = weights;
            }
        }
    }
}
