//! Sorted date-to-value store with as-of lookup.
//!
//! Backs prices, dividends, benchmark levels and daily returns. Lookups are
//! O(log n) through the ordered map; `get` before the earliest observation is
//! an error, never a default.

use crate::domain::error::{LowvolError, NoDataError};
use chrono::NaiveDate;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AsOfSeries {
    values: BTreeMap<NaiveDate, f64>,
}

impl AsOfSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from observations that must be strictly increasing in date.
    /// `source_name` labels the ordering error.
    pub fn from_sorted<I>(source_name: &str, observations: I) -> Result<Self, LowvolError>
    where
        I: IntoIterator<Item = (NaiveDate, f64)>,
    {
        let mut values = BTreeMap::new();
        let mut previous: Option<NaiveDate> = None;
        for (date, value) in observations {
            if let Some(prev) = previous {
                if date <= prev {
                    return Err(LowvolError::InconsistentOrdering {
                        source_name: source_name.to_string(),
                        previous: prev,
                        found: date,
                    });
                }
            }
            previous = Some(date);
            values.insert(date, value);
        }
        Ok(Self { values })
    }

    /// Replace the value stored at `date`.
    pub fn insert(&mut self, date: NaiveDate, value: f64) {
        self.values.insert(date, value);
    }

    /// Add `value` to whatever is already stored at `date`.
    pub fn accumulate(&mut self, date: NaiveDate, value: f64) {
        *self.values.entry(date).or_insert(0.0) += value;
    }

    /// Value at the greatest stored date `<= date`.
    pub fn get(&self, date: NaiveDate) -> Result<f64, NoDataError> {
        self.get_dated(date).map(|(_, v)| v)
    }

    /// Like [`AsOfSeries::get`], also returning the date the value was observed on.
    pub fn get_dated(&self, date: NaiveDate) -> Result<(NaiveDate, f64), NoDataError> {
        self.values
            .range(..=date)
            .next_back()
            .map(|(d, v)| (*d, *v))
            .ok_or(NoDataError {
                date,
                earliest: self.earliest(),
            })
    }

    /// Sum of values dated within `[start, end]`, bounds included.
    pub fn range_sum(&self, start: NaiveDate, end: NaiveDate) -> f64 {
        self.range(start, end).map(|(_, v)| v).sum()
    }

    /// Observations dated within `[start, end]` in date order.
    pub fn range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        // BTreeMap::range panics on an inverted interval.
        let bounds = if start <= end { Some(start..=end) } else { None };
        bounds
            .into_iter()
            .flat_map(move |b| self.values.range(b))
            .map(|(d, v)| (*d, *v))
    }

    pub fn earliest(&self) -> Option<NaiveDate> {
        self.values.keys().next().copied()
    }

    pub fn latest(&self) -> Option<NaiveDate> {
        self.values.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.values.iter().map(|(d, v)| (*d, *v))
    }
}

impl FromIterator<(NaiveDate, f64)> for AsOfSeries {
    fn from_iter<T: IntoIterator<Item = (NaiveDate, f64)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
