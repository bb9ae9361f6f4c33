//! Quantline Core: price data, indicators and data-quality gating.
//!
//! This crate holds everything a pipeline stage needs that is not about
//! scheduling:
//! - Domain types (daily bars, ordered price series)
//! - Indicator library (SMA, EMA, RSI, MACD, volatility, daily returns)
//! - Indicator dataset assembly and the data-quality validator
//! - Data providers (Yahoo Finance, CSV import, synthetic) and the raw Parquet store

pub mod data;
pub mod dataset;
pub mod domain;
pub mod indicators;
pub mod validate;
