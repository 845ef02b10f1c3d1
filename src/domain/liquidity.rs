//! Quarterly liquidity statistics.
//!
//! The index maps a calendar quarter (keyed by its first month) to the median
//! daily dollar volume of each security over that quarter. Statistics are
//! read with a reporting lag: a rebalancing month sees the quarter that
//! contained the date `lag_days` before the month's first day.

use crate::domain::calendar::YearMonth;
use crate::domain::error::LowvolError;
use crate::domain::ohlcv::PriceBar;
use crate::ports::data_port::LiquidityRepository;
use chrono::{Days, NaiveDate};
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_QUARTER_LAG_DAYS: u32 = 63;

/// One precomputed statistic row.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidityRecord {
    pub quarter_start: YearMonth,
    pub quarter_end: YearMonth,
    pub code: String,
    pub volume: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LiquidityIndex {
    quarters: HashMap<YearMonth, HashMap<String, u64>>,
}

impl LiquidityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample. `quarter` may be any month of the quarter.
    pub fn insert(&mut self, quarter: YearMonth, code: &str, volume: u64) {
        self.quarters
            .entry(quarter.quarter_start())
            .or_default()
            .insert(code.to_string(), volume);
    }

    pub fn has_quarter(&self, quarter: YearMonth) -> bool {
        self.quarters.contains_key(&quarter.quarter_start())
    }

    pub fn quarter_count(&self) -> usize {
        self.quarters.len()
    }
}

impl FromIterator<LiquidityRecord> for LiquidityIndex {
    fn from_iter<T: IntoIterator<Item = LiquidityRecord>>(iter: T) -> Self {
        let mut index = LiquidityIndex::new();
        for record in iter {
            index.insert(record.quarter_start, &record.code, record.volume);
        }
        index
    }
}

impl LiquidityRepository for LiquidityIndex {
    fn median_volume(&self, quarter: YearMonth, code: &str) -> u64 {
        self.quarters
            .get(&quarter.quarter_start())
            .and_then(|codes| codes.get(code))
            .copied()
            .unwrap_or(0)
    }
}

/// Quarter whose statistics are considered published on the first day of
/// `month`.
pub fn reported_quarter(month: YearMonth, lag_days: u32) -> YearMonth {
    let as_of = month
        .first_day()
        .checked_sub_days(Days::new(u64::from(lag_days)))
        .unwrap_or(NaiveDate::MIN);
    YearMonth::from_date(as_of).quarter_start()
}

/// Median of a sample; mean of the two middle values for even counts.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median daily dollar volume per calendar quarter for one security.
///
/// Bars must be strictly increasing in date; anything else aborts with
/// `InconsistentOrdering`. Bars missing close or volume are ignored. Rows come
/// back in quarter order.
pub fn quarterly_median_dollar_volume<I>(
    source_name: &str,
    code: &str,
    bars: I,
) -> Result<Vec<LiquidityRecord>, LowvolError>
where
    I: IntoIterator<Item = PriceBar>,
{
    let mut samples: BTreeMap<YearMonth, Vec<f64>> = BTreeMap::new();
    let mut previous: Option<NaiveDate> = None;

    for bar in bars {
        if let Some(prev) = previous {
            if bar.date <= prev {
                return Err(LowvolError::InconsistentOrdering {
                    source_name: source_name.to_string(),
                    previous: prev,
                    found: bar.date,
                });
            }
        }
        previous = Some(bar.date);

        if let Some(dollar_volume) = bar.dollar_volume() {
            samples
                .entry(YearMonth::from_date(bar.date).quarter_start())
                .or_default()
                .push(dollar_volume);
        }
    }

    Ok(samples
        .into_iter()
        .filter_map(|(quarter, volumes)| {
            median(&volumes).map(|m| LiquidityRecord {
                quarter_start: quarter,
                quarter_end: quarter.quarter_end(),
                code: code.to_string(),
                volume: m as u64,
            })
        })
        .collect())
}
