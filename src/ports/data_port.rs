//! Market data repository ports.
//!
//! The core only reads through these traits; ingestion adapters own the
//! storage format. Implementations must be shareable across the screening
//! worker pool.

use crate::domain::asof::AsOfSeries;
use crate::domain::calendar::YearMonth;
use crate::domain::error::LowvolError;
use chrono::NaiveDate;
use std::sync::Arc;

pub trait PriceRepository: Send + Sync {
    /// Close price as of `date` (most recent observation at or before it).
    fn get_price(&self, date: NaiveDate, code: &str) -> Result<f64, LowvolError>;
}

pub trait DividendRepository: Send + Sync {
    /// Sum of dividends per share paid within `[date_start, date_end]`.
    fn get_total(
        &self,
        date_start: NaiveDate,
        date_end: NaiveDate,
        code: &str,
    ) -> Result<f64, LowvolError>;
}

pub trait BenchmarkRepository: Send + Sync {
    /// Benchmark index level as of `date`.
    fn get_level(&self, date: NaiveDate) -> Result<f64, LowvolError>;
}

pub trait LiquidityRepository: Send + Sync {
    /// Median dollar volume of `code` over the quarter starting at
    /// `quarter`; 0 when no sample exists.
    fn median_volume(&self, quarter: YearMonth, code: &str) -> u64;
}

pub trait PerformanceRepository: Send + Sync {
    /// Daily returns of `code` keyed by date. Unknown codes yield an empty
    /// series.
    fn returns(&self, code: &str) -> Result<Arc<AsOfSeries>, LowvolError>;
}

/// Shared handles to every repository the backtest reads.
#[derive(Clone)]
pub struct MarketData {
    pub prices: Arc<dyn PriceRepository>,
    pub dividends: Arc<dyn DividendRepository>,
    pub benchmark: Arc<dyn BenchmarkRepository>,
    pub liquidity: Arc<dyn LiquidityRepository>,
    pub performances: Arc<dyn PerformanceRepository>,
}

impl MarketData {
    /// Bundle a single adapter implementing every repository.
    pub fn from_adapter<A>(adapter: Arc<A>) -> Self
    where
        A: PriceRepository
            + DividendRepository
            + BenchmarkRepository
            + LiquidityRepository
            + PerformanceRepository
            + 'static,
    {
        Self {
            prices: adapter.clone(),
            dividends: adapter.clone(),
            benchmark: adapter.clone(),
            liquidity: adapter.clone(),
            performances: adapter,
        }
    }
}
