//! In-memory adapters used by tests and small programmatic runs.

use crate::domain::asof::AsOfSeries;
use crate::domain::calendar::YearMonth;
use crate::domain::error::{LowvolError, NoDataError};
use crate::domain::liquidity::LiquidityIndex;
use crate::domain::ohlcv::PriceBar;
use crate::domain::volatility::daily_returns;
use crate::ports::cache_port::KeyValueStore;
use crate::ports::data_port::{
    BenchmarkRepository, DividendRepository, LiquidityRepository, PerformanceRepository,
    PriceRepository,
};
use chrono::NaiveDate;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Key-value store held in a map. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, LowvolError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), LowvolError> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Every market data repository backed by maps filled through builder calls.
#[derive(Debug, Default)]
pub struct InMemoryMarketData {
    prices: HashMap<String, AsOfSeries>,
    dividends: HashMap<String, AsOfSeries>,
    benchmark: AsOfSeries,
    liquidity: LiquidityIndex,
    returns: HashMap<String, Arc<AsOfSeries>>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_price(&mut self, code: &str, date: NaiveDate, close: f64) {
        self.prices
            .entry(code.to_string())
            .or_default()
            .insert(date, close);
    }

    pub fn add_dividend(&mut self, code: &str, date: NaiveDate, amount: f64) {
        self.dividends
            .entry(code.to_string())
            .or_default()
            .accumulate(date, amount);
    }

    pub fn add_benchmark(&mut self, date: NaiveDate, level: f64) {
        self.benchmark.insert(date, level);
    }

    pub fn set_liquidity(&mut self, quarter: YearMonth, code: &str, volume: u64) {
        self.liquidity.insert(quarter, code, volume);
    }

    pub fn set_returns(&mut self, code: &str, returns: AsOfSeries) {
        self.returns.insert(code.to_string(), Arc::new(returns));
    }

    /// Fill daily returns for every priced code that has none yet.
    pub fn derive_returns(&mut self) {
        for (code, series) in &self.prices {
            if self.returns.contains_key(code) {
                continue;
            }
            let bars = series
                .iter()
                .map(|(date, close)| PriceBar::new(date, close, 0.0));
            self.returns
                .insert(code.clone(), Arc::new(daily_returns(bars)));
        }
    }
}

impl PriceRepository for InMemoryMarketData {
    fn get_price(&self, date: NaiveDate, code: &str) -> Result<f64, LowvolError> {
        let series_name = format!("price:{code}");
        let series = self.prices.get(code).ok_or_else(|| {
            LowvolError::no_data(series_name.as_str(), NoDataError { date, earliest: None })
        })?;
        series
            .get(date)
            .map_err(|e| LowvolError::no_data(series_name.as_str(), e))
    }
}

impl DividendRepository for InMemoryMarketData {
    fn get_total(
        &self,
        date_start: NaiveDate,
        date_end: NaiveDate,
        code: &str,
    ) -> Result<f64, LowvolError> {
        Ok(self
            .dividends
            .get(code)
            .map_or(0.0, |s| s.range_sum(date_start, date_end)))
    }
}

impl BenchmarkRepository for InMemoryMarketData {
    fn get_level(&self, date: NaiveDate) -> Result<f64, LowvolError> {
        self.benchmark
            .get(date)
            .map_err(|e| LowvolError::no_data("benchmark", e))
    }
}

impl LiquidityRepository for InMemoryMarketData {
    fn median_volume(&self, quarter: YearMonth, code: &str) -> u64 {
        self.liquidity.median_volume(quarter, code)
    }
}

impl PerformanceRepository for InMemoryMarketData {
    fn returns(&self, code: &str) -> Result<Arc<AsOfSeries>, LowvolError> {
        Ok(self.returns.get(code).cloned().unwrap_or_default())
    }
}
