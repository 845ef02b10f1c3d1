//! Calendar arithmetic: year-month period keys, calendar quarters and the
//! rebalancing schedule.

use chrono::{Datelike, Months, NaiveDate};
use std::fmt;
use std::str::FromStr;

/// A calendar month, rendered as the fixed-width `YYYYMM` key used by the
/// statistic stores. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth(NaiveDate);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid period key {value:?}: expected YYYYMM or YYYY-MM")]
pub struct PeriodParseError {
    pub value: String,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(YearMonth)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        YearMonth(date.with_day(1).unwrap_or(date))
    }

    pub fn year(self) -> i32 {
        self.0.year()
    }

    pub fn month(self) -> u32 {
        self.0.month()
    }

    pub fn first_day(self) -> NaiveDate {
        self.0
    }

    pub fn last_day(self) -> NaiveDate {
        self.0
            .checked_add_months(Months::new(1))
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn plus_months(self, n: u32) -> Option<Self> {
        self.0.checked_add_months(Months::new(n)).map(YearMonth)
    }

    pub fn minus_months(self, n: u32) -> Option<Self> {
        self.0.checked_sub_months(Months::new(n)).map(YearMonth)
    }

    /// First month of the calendar quarter containing this month.
    pub fn quarter_start(self) -> Self {
        let offset = (self.month() - 1) % 3;
        self.minus_months(offset).unwrap_or(self)
    }

    /// Last month of the calendar quarter containing this month.
    pub fn quarter_end(self) -> Self {
        let start = self.quarter_start();
        start.plus_months(2).unwrap_or(start)
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date >= self.first_day() && date <= self.last_day()
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year(), self.month())
    }
}

impl FromStr for YearMonth {
    type Err = PeriodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || PeriodParseError {
            value: s.to_string(),
        };
        let trimmed = s.trim();
        let (year, month) = match trimmed.split_once('-') {
            Some((y, m)) if y.len() == 4 && m.len() == 2 => (y, m),
            Some(_) => return Err(err()),
            None if trimmed.len() == 6 => trimmed.split_at(4),
            None => return Err(err()),
        };
        if !year.bytes().chain(month.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let year: i32 = year.parse().map_err(|_| err())?;
        let month: u32 = month.parse().map_err(|_| err())?;
        YearMonth::new(year, month).ok_or_else(err)
    }
}

/// One rebalancing period; both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} through {}", self.start, self.end)
    }
}

/// Rebalancing schedule: `count` periods of `step` months each, starting on
/// the first day of `start`. Each period ends on the last calendar day of its
/// final month.
pub fn month_range(start: YearMonth, count: usize, step: u32) -> MonthRange {
    MonthRange {
        next: Some(start),
        remaining: count,
        step: step.max(1),
    }
}

#[derive(Debug, Clone)]
pub struct MonthRange {
    next: Option<YearMonth>,
    remaining: usize,
    step: u32,
}

impl Iterator for MonthRange {
    type Item = Period;

    fn next(&mut self) -> Option<Period> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.next?;
        let last_month = current.plus_months(self.step - 1)?;
        self.remaining -= 1;
        self.next = current.plus_months(self.step);
        Some(Period {
            start: current.first_day(),
            end: last_month.last_day(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}
