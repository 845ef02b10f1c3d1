//! Core domain types and logic.

pub mod asof;
pub mod backtest;
pub mod cache;
pub mod calendar;
pub mod config_validation;
pub mod error;
pub mod liquidity;
pub mod metrics;
pub mod ohlcv;
pub mod portfolio;
pub mod screening;
pub mod strategy;
pub mod turnover;
pub mod universe;
pub mod volatility;
