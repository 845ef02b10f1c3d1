//! Tradable universe per rebalancing month.
//!
//! A [`Universe`] starts from a preinitialized list of eligible securities and
//! keeps, for one month at a time, the subset liquid enough to trade. Each
//! `init_month` replaces the previous snapshot.

use crate::domain::calendar::YearMonth;
use crate::domain::error::LowvolError;
use crate::domain::liquidity::{DEFAULT_QUARTER_LAG_DAYS, reported_quarter};
use crate::ports::data_port::LiquidityRepository;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Read access to a set of security codes.
pub trait SecurityUniverse {
    fn securities(&self) -> Result<&[String], LowvolError>;

    fn size(&self) -> Result<usize, LowvolError> {
        Ok(self.securities()?.len())
    }
}

/// A fixed list of codes, always initialized.
#[derive(Debug, Clone, Default)]
pub struct StaticUniverse {
    codes: Vec<String>,
}

impl StaticUniverse {
    pub fn new(codes: Vec<String>) -> Self {
        Self {
            codes: dedup_codes(codes),
        }
    }
}

impl SecurityUniverse for StaticUniverse {
    fn securities(&self) -> Result<&[String], LowvolError> {
        Ok(&self.codes)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniverseSnapshot {
    pub month: YearMonth,
    pub quarter: YearMonth,
    pub codes: Vec<String>,
}

pub struct Universe {
    eligible: Vec<String>,
    eligible_set: HashSet<String>,
    liquidity: Arc<dyn LiquidityRepository>,
    quarter_lag_days: u32,
    snapshot: Option<UniverseSnapshot>,
}

impl Universe {
    pub fn new(eligible: Vec<String>, liquidity: Arc<dyn LiquidityRepository>) -> Self {
        let eligible = dedup_codes(eligible);
        info!("preinitialized a universe of {} securities", eligible.len());
        let eligible_set = eligible.iter().cloned().collect();
        Self {
            eligible,
            eligible_set,
            liquidity,
            quarter_lag_days: DEFAULT_QUARTER_LAG_DAYS,
            snapshot: None,
        }
    }

    pub fn with_quarter_lag(mut self, days: u32) -> Self {
        self.quarter_lag_days = days;
        self
    }

    /// Select every eligible security whose median dollar volume over the
    /// most recently reported quarter is at least `min_dollar_volume`.
    /// Securities without a sample for that quarter are never selected.
    pub fn init_month(&mut self, month: YearMonth, min_dollar_volume: f64) -> &[String] {
        info!("initializing universe with liquid securities for month {month}");
        let quarter = reported_quarter(month, self.quarter_lag_days);
        info!("selection based on data from quarter: {quarter}");

        let codes: Vec<String> = self
            .eligible
            .iter()
            .filter(|code| {
                let volume = self.liquidity.median_volume(quarter, code);
                volume > 0 && volume as f64 >= min_dollar_volume
            })
            .cloned()
            .collect();
        debug!(
            "{} of {} eligible securities pass {:.0} dollar volume",
            codes.len(),
            self.eligible.len(),
            min_dollar_volume
        );

        let snapshot = self.snapshot.insert(UniverseSnapshot {
            month,
            quarter,
            codes,
        });
        &snapshot.codes
    }

    pub fn snapshot(&self) -> Option<&UniverseSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn is_eligible(&self, code: &str) -> bool {
        self.eligible_set.contains(code)
    }

    pub fn eligible_count(&self) -> usize {
        self.eligible.len()
    }
}

impl SecurityUniverse for Universe {
    fn securities(&self) -> Result<&[String], LowvolError> {
        self.snapshot
            .as_ref()
            .map(|s| s.codes.as_slice())
            .ok_or(LowvolError::NotInitialized)
    }
}

fn dedup_codes(codes: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    codes
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty() && seen.insert(c.clone()))
        .collect()
}
