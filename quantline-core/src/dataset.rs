//! IndicatorDataset: a price series with every computed column attached.
//!
//! Each computed cell is `None` while the column's window is not yet
//! satisfied and `Some(value)` afterwards. A `Some(NaN)` is therefore a
//! computation error, never a warm-up gap.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::PriceSeries;
use crate::indicators::{
    DailyReturn, Indicator, IndicatorConfig, Macd, MacdLine, Rsi, Sma, Volatility,
};

/// Trend regime derived from the two simple moving averages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRegime {
    Bullish,
    Bearish,
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketRegime::Bullish => write!(f, "Bullish"),
            MarketRegime::Bearish => write!(f, "Bearish"),
        }
    }
}

/// Computed columns, in the order the validator inspects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    DailyReturn,
    SmaShort,
    SmaLong,
    Rsi,
    Macd,
    MacdSignal,
    Volatility,
    MarketRegime,
}

impl Column {
    pub const ALL: [Column; 8] = [
        Column::DailyReturn,
        Column::SmaShort,
        Column::SmaLong,
        Column::Rsi,
        Column::Macd,
        Column::MacdSignal,
        Column::Volatility,
        Column::MarketRegime,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Column::DailyReturn => "daily_return",
            Column::SmaShort => "sma_short",
            Column::SmaLong => "sma_long",
            Column::Rsi => "rsi",
            Column::Macd => "macd",
            Column::MacdSignal => "macd_signal",
            Column::Volatility => "volatility",
            Column::MarketRegime => "market_regime",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One dated row: the bar plus its indicator cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorRow {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub adj_close: f64,
    pub daily_return: Option<f64>,
    pub sma_short: Option<f64>,
    pub sma_long: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub volatility: Option<f64>,
    pub market_regime: Option<MarketRegime>,
}

impl IndicatorRow {
    /// Numeric value of a column; `None` for the regime column or an
    /// undefined cell.
    pub fn value(&self, column: Column) -> Option<f64> {
        match column {
            Column::DailyReturn => self.daily_return,
            Column::SmaShort => self.sma_short,
            Column::SmaLong => self.sma_long,
            Column::Rsi => self.rsi,
            Column::Macd => self.macd,
            Column::MacdSignal => self.macd_signal,
            Column::Volatility => self.volatility,
            Column::MarketRegime => None,
        }
    }

    /// Whether the cell holds anything at all (a NaN counts as present).
    pub fn is_defined(&self, column: Column) -> bool {
        match column {
            Column::MarketRegime => self.market_regime.is_some(),
            other => self.value(other).is_some(),
        }
    }
}

/// The transform stage's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorDataset {
    pub symbol: String,
    pub config: IndicatorConfig,
    pub rows: Vec<IndicatorRow>,
}

impl IndicatorDataset {
    /// Compute every column for `series`. Pure and deterministic.
    pub fn compute(series: &PriceSeries, config: &IndicatorConfig) -> Self {
        let bars = series.bars();

        let daily_return = defined_after(&DailyReturn, bars);
        let sma_short = defined_after(&Sma::new(config.sma_short_window), bars);
        let sma_long = defined_after(&Sma::new(config.sma_long_window), bars);
        let rsi = defined_after(&Rsi::new(config.rsi_period), bars);
        let macd = defined_after(
            &Macd::new(
                config.macd_fast,
                config.macd_slow,
                config.macd_signal,
                MacdLine::Macd,
            ),
            bars,
        );
        let macd_signal = defined_after(
            &Macd::new(
                config.macd_fast,
                config.macd_slow,
                config.macd_signal,
                MacdLine::Signal,
            ),
            bars,
        );
        let volatility = defined_after(&Volatility::new(config.volatility_window), bars);

        let rows = bars
            .iter()
            .enumerate()
            .map(|(i, bar)| IndicatorRow {
                date: bar.date,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
                adj_close: bar.adj_close,
                daily_return: daily_return[i],
                sma_short: sma_short[i],
                sma_long: sma_long[i],
                rsi: rsi[i],
                macd: macd[i],
                macd_signal: macd_signal[i],
                volatility: volatility[i],
                market_regime: regime(sma_short[i], sma_long[i]),
            })
            .collect();

        Self {
            symbol: series.symbol().to_string(),
            config: *config,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of leading rows in which `column` is legitimately undefined.
    pub fn warmup(&self, column: Column) -> usize {
        let c = &self.config;
        let macd_line = c.macd_fast.max(c.macd_slow).saturating_sub(1);
        match column {
            Column::DailyReturn => 1,
            Column::SmaShort => c.sma_short_window.saturating_sub(1),
            Column::SmaLong => c.sma_long_window.saturating_sub(1),
            Column::Rsi => c.rsi_period.max(1),
            Column::Macd => macd_line,
            Column::MacdSignal => macd_line + c.macd_signal.saturating_sub(1),
            Column::Volatility => c.volatility_window.max(2),
            Column::MarketRegime => c
                .sma_short_window
                .max(c.sma_long_window)
                .saturating_sub(1),
        }
    }

    /// Snapshot of the most recent row.
    pub fn latest_metrics(&self) -> Option<LatestMetrics> {
        let last = self.rows.last()?;
        Some(LatestMetrics {
            date: last.date,
            last_price: last.close,
            daily_return: last.daily_return,
            current_rsi: last.rsi,
            market_regime: last.market_regime,
            volatility: last.volatility,
            sma_short: last.sma_short,
            sma_long: last.sma_long,
            macd: last.macd,
            signal_line: last.macd_signal,
        })
    }
}

/// Most recent values, persisted next to the dataset for quick reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestMetrics {
    pub date: NaiveDate,
    pub last_price: f64,
    pub daily_return: Option<f64>,
    pub current_rsi: Option<f64>,
    pub market_regime: Option<MarketRegime>,
    pub volatility: Option<f64>,
    pub sma_short: Option<f64>,
    pub sma_long: Option<f64>,
    pub macd: Option<f64>,
    pub signal_line: Option<f64>,
}

/// Run an indicator and mark its warm-up positions as undefined.
fn defined_after(indicator: &dyn Indicator, bars: &[crate::domain::Bar]) -> Vec<Option<f64>> {
    let lookback = indicator.lookback();
    indicator
        .compute(bars)
        .into_iter()
        .enumerate()
        .map(|(i, v)| if i < lookback { None } else { Some(v) })
        .collect()
}

fn regime(short: Option<f64>, long: Option<f64>) -> Option<MarketRegime> {
    match (short, long) {
        (Some(s), Some(l)) if s.is_finite() && l.is_finite() => Some(if s > l {
            MarketRegime::Bullish
        } else {
            MarketRegime::Bearish
        }),
        _ => None,
    }
}
