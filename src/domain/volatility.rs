//! Trailing return volatility of a single security.
//!
//! Volatility is the population standard deviation (divide by N) of the daily
//! returns observed within an inclusive window of months. A security with
//! fewer observations than the coverage policy requires is skipped rather
//! than failed.

use crate::domain::asof::AsOfSeries;
use crate::domain::calendar::YearMonth;
use crate::domain::error::ScreeningSkip;
use crate::domain::ohlcv::PriceBar;

pub const DEFAULT_MIN_COVERAGE: f64 = 0.8;
pub const DEFAULT_PERIODS_PER_MONTH: u32 = 20;

/// How many observations a lookback window must hold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoveragePolicy {
    /// Fraction of the expected observation count that must be present.
    pub min_coverage: f64,
    /// Assumed return observations per month.
    pub periods_per_month: u32,
}

impl Default for CoveragePolicy {
    fn default() -> Self {
        Self {
            min_coverage: DEFAULT_MIN_COVERAGE,
            periods_per_month: DEFAULT_PERIODS_PER_MONTH,
        }
    }
}

impl CoveragePolicy {
    pub fn expected_observations(&self, lookback_months: u32) -> usize {
        lookback_months as usize * self.periods_per_month as usize
    }

    pub fn required_observations(&self, lookback_months: u32) -> usize {
        let exact = self.min_coverage * self.expected_observations(lookback_months) as f64;
        // 0.8 * 20 must give 16, not 17.
        (exact - 1e-9).ceil().max(0.0) as usize
    }
}

/// Inclusive range of months.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthWindow {
    pub start: YearMonth,
    pub end: YearMonth,
}

impl MonthWindow {
    /// Window ending at `end` and starting `lookback_months` months earlier.
    pub fn trailing(end: YearMonth, lookback_months: u32) -> Option<Self> {
        Some(Self {
            start: end.minus_months(lookback_months)?,
            end,
        })
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn population_stdev(values: &[f64]) -> Option<f64> {
    let avg = mean(values)?;
    let variance =
        values.iter().map(|v| (v - avg) * (v - avg)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

pub fn compute_volatility(
    code: &str,
    returns: &AsOfSeries,
    lookback_months: u32,
    window: MonthWindow,
    policy: &CoveragePolicy,
) -> Result<f64, ScreeningSkip> {
    let observations: Vec<f64> = returns
        .range(window.start.first_day(), window.end.last_day())
        .map(|(_, r)| r)
        .collect();

    let required = policy.required_observations(lookback_months);
    if observations.len() < required {
        return Err(ScreeningSkip::InsufficientData {
            code: code.to_string(),
            observations: observations.len(),
            required,
        });
    }

    population_stdev(&observations).ok_or_else(|| ScreeningSkip::InsufficientData {
        code: code.to_string(),
        observations: 0,
        required,
    })
}

/// Simple daily returns `close[t] / close[t-1] - 1` keyed by `t`. Bars without
/// a close are skipped; the return spans the gap.
pub fn daily_returns<I>(bars: I) -> AsOfSeries
where
    I: IntoIterator<Item = PriceBar>,
{
    let mut previous: Option<f64> = None;
    let mut returns = AsOfSeries::new();
    for bar in bars {
        let Some(close) = bar.close else { continue };
        if let Some(prev) = previous {
            if prev != 0.0 {
                returns.insert(bar.date, close / prev - 1.0);
            }
        }
        previous = Some(close);
    }
    returns
}
