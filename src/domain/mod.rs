//! Core domain types and logic.

pub mod backtest;
pub mod batch;
pub mod calendar;
pub mod checks;
pub mod config_validation;
pub mod cost;
pub mod error;
pub mod expression;
pub mod expression_eval;
pub mod expression_parser;
pub mod market_data;
pub mod metrics;
pub mod portfolio;
pub mod position_builder;
pub mod run_config;
pub mod signal;
pub mod simulation;
pub mod universe;
