//! Data-quality gate between transform and save.
//!
//! Rules are checked rule by rule over all rows, and the first violation
//! wins:
//! 1. `low <= high`, then `low <= close <= high`
//! 2. every defined RSI lies in [0, 100]
//! 3. no undefined or non-finite cell once a column's warm-up is satisfied
//!
//! The validator never repairs or mutates values.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::dataset::{Column, IndicatorDataset, MarketRegime};

/// Which rule a dataset broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityRule {
    LowAboveHigh,
    CloseOutsideRange,
    RsiOutOfRange,
    MissingValue { column: Column },
}

impl QualityRule {
    pub fn code(&self) -> &'static str {
        match self {
            QualityRule::LowAboveHigh => "LOW_ABOVE_HIGH",
            QualityRule::CloseOutsideRange => "CLOSE_OUTSIDE_RANGE",
            QualityRule::RsiOutOfRange => "RSI_OUT_OF_RANGE",
            QualityRule::MissingValue { .. } => "MISSING_VALUE",
        }
    }
}

impl fmt::Display for QualityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityRule::MissingValue { column } => write!(f, "MISSING_VALUE({column})"),
            other => f.write_str(other.code()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{rule} at row {row} ({date}): {detail}")]
pub struct DataQualityError {
    pub rule: QualityRule,
    pub row: usize,
    pub date: NaiveDate,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Summary numbers persisted alongside the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub data_points: usize,
    pub date_range: Option<DateRange>,
    pub avg_daily_volume: f64,
    pub volatility_mean: Option<f64>,
    /// Share of computed cells that are undefined, in percent.
    pub missing_data_pct: f64,
    pub current_market_regime: Option<MarketRegime>,
    pub current_rsi: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub info_messages: Vec<String>,
    pub warnings: Vec<String>,
    pub metrics: QualityMetrics,
}

/// A dataset that passed every rule, plus the report describing it.
#[derive(Debug, Clone)]
pub struct ValidatedDataset {
    pub dataset: IndicatorDataset,
    pub report: ValidationReport,
}

impl ValidatedDataset {
    pub fn check(dataset: IndicatorDataset) -> Result<Self, DataQualityError> {
        let report = validate(&dataset)?;
        Ok(Self { dataset, report })
    }
}

/// Run every rule against `dataset`.
pub fn validate(dataset: &IndicatorDataset) -> Result<ValidationReport, DataQualityError> {
    check_price_ranges(dataset)?;
    check_rsi_bounds(dataset)?;
    check_missing_values(dataset)?;
    Ok(build_report(dataset))
}

fn check_price_ranges(dataset: &IndicatorDataset) -> Result<(), DataQualityError> {
    for (i, row) in dataset.rows.iter().enumerate() {
        if row.low > row.high {
            return Err(DataQualityError {
                rule: QualityRule::LowAboveHigh,
                row: i,
                date: row.date,
                detail: format!("low {} is above high {}", row.low, row.high),
            });
        }
    }
    for (i, row) in dataset.rows.iter().enumerate() {
        if row.close < row.low || row.close > row.high {
            return Err(DataQualityError {
                rule: QualityRule::CloseOutsideRange,
                row: i,
                date: row.date,
                detail: format!(
                    "close {} outside [{}, {}]",
                    row.close, row.low, row.high
                ),
            });
        }
    }
    Ok(())
}

fn check_rsi_bounds(dataset: &IndicatorDataset) -> Result<(), DataQualityError> {
    for (i, row) in dataset.rows.iter().enumerate() {
        if let Some(rsi) = row.rsi {
            if rsi.is_finite() && !(0.0..=100.0).contains(&rsi) {
                return Err(DataQualityError {
                    rule: QualityRule::RsiOutOfRange,
                    row: i,
                    date: row.date,
                    detail: format!("rsi {rsi} outside [0, 100]"),
                });
            }
        }
    }
    Ok(())
}

fn check_missing_values(dataset: &IndicatorDataset) -> Result<(), DataQualityError> {
    let warmups: Vec<(Column, usize)> = Column::ALL
        .iter()
        .map(|&c| (c, dataset.warmup(c)))
        .collect();

    for (i, row) in dataset.rows.iter().enumerate() {
        for &(column, warmup) in &warmups {
            if i < warmup {
                continue;
            }
            let missing = match column {
                Column::MarketRegime => row.market_regime.is_none(),
                numeric => !row.value(numeric).is_some_and(f64::is_finite),
            };
            if missing {
                let detail = match row.value(column) {
                    Some(v) => format!("{column} is {v} after {warmup} warm-up rows"),
                    None => format!("{column} is undefined after {warmup} warm-up rows"),
                };
                return Err(DataQualityError {
                    rule: QualityRule::MissingValue { column },
                    row: i,
                    date: row.date,
                    detail,
                });
            }
        }
    }
    Ok(())
}

fn build_report(dataset: &IndicatorDataset) -> ValidationReport {
    let n = dataset.len();

    let info_messages = Column::ALL
        .iter()
        .filter_map(|&column| {
            let gap = dataset.warmup(column).min(n);
            (gap > 0).then(|| format!("{column}: first {gap} rows undefined (warm-up)"))
        })
        .collect();

    let zero_volume: Vec<NaiveDate> = dataset
        .rows
        .iter()
        .filter(|r| r.volume == 0)
        .map(|r| r.date)
        .collect();
    let mut warnings = Vec::new();
    if let Some(first) = zero_volume.first() {
        warnings.push(format!(
            "{} rows with zero volume (first on {first})",
            zero_volume.len()
        ));
    }

    let avg_daily_volume = if n == 0 {
        0.0
    } else {
        dataset.rows.iter().map(|r| r.volume as f64).sum::<f64>() / n as f64
    };

    let vols: Vec<f64> = dataset.rows.iter().filter_map(|r| r.volatility).collect();
    let volatility_mean = (!vols.is_empty()).then(|| vols.iter().sum::<f64>() / vols.len() as f64);

    let total_cells = n * Column::ALL.len();
    let undefined_cells: usize = dataset
        .rows
        .iter()
        .map(|row| Column::ALL.iter().filter(|&&c| !row.is_defined(c)).count())
        .sum();
    let missing_data_pct = if total_cells == 0 {
        0.0
    } else {
        undefined_cells as f64 / total_cells as f64 * 100.0
    };

    let date_range = match (dataset.rows.first(), dataset.rows.last()) {
        (Some(first), Some(last)) => Some(DateRange {
            start: first.date,
            end: last.date,
        }),
        _ => None,
    };
    let last = dataset.rows.last();

    ValidationReport {
        is_valid: true,
        info_messages,
        warnings,
        metrics: QualityMetrics {
            data_points: n,
            date_range,
            avg_daily_volume,
            volatility_mean,
            missing_data_pct,
            current_market_regime: last.and_then(|r| r.market_regime),
            current_rsi: last.and_then(|r| r.rsi),
        },
    }
}
