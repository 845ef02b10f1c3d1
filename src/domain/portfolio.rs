//! Share positions plus residual cash, and the order execution that builds
//! them from target weights.

use crate::domain::error::LowvolError;
use crate::ports::data_port::PriceRepository;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::debug;

/// Long-only holdings: whole share counts per code and the cash left over.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Portfolio {
    pub positions: BTreeMap<String, i64>,
    pub cash: f64,
}

impl Portfolio {
    pub fn cash_only(cash: f64) -> Self {
        Portfolio {
            positions: BTreeMap::new(),
            cash,
        }
    }

    pub fn shares(&self, code: &str) -> i64 {
        self.positions.get(code).copied().unwrap_or(0)
    }

    pub fn has_position(&self, code: &str) -> bool {
        self.positions.contains_key(code)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.positions.keys().map(String::as_str)
    }

    /// Dollar amount of each position at `date` close.
    pub fn amounts(
        &self,
        prices: &dyn PriceRepository,
        date: NaiveDate,
        period_start: NaiveDate,
    ) -> Result<BTreeMap<String, f64>, LowvolError> {
        self.positions
            .iter()
            .map(|(code, &shares)| {
                let price = price_at(prices, code, date, period_start)?;
                Ok((code.clone(), shares as f64 * price))
            })
            .collect()
    }

    /// Positions at `date` close plus cash.
    pub fn valuation(
        &self,
        prices: &dyn PriceRepository,
        date: NaiveDate,
        period_start: NaiveDate,
    ) -> Result<f64, LowvolError> {
        let positions: f64 = self.amounts(prices, date, period_start)?.values().sum();
        Ok(positions + self.cash)
    }
}

/// Close price used by the backtest. A missing or non-positive price is a
/// `PriceUnavailable` error naming the period.
pub fn price_at(
    prices: &dyn PriceRepository,
    code: &str,
    date: NaiveDate,
    period_start: NaiveDate,
) -> Result<f64, LowvolError> {
    let unavailable = || LowvolError::PriceUnavailable {
        period_start,
        code: code.to_string(),
        date,
    };
    match prices.get_price(date, code) {
        Ok(price) if price.is_finite() && price > 0.0 => Ok(price),
        Ok(_) | Err(LowvolError::NoData { .. }) => Err(unavailable()),
        Err(e) => Err(e),
    }
}

/// Buy whole shares at `date` close: `round(weight * cash / price)` per code.
///
/// Every price is resolved before any position is taken, so a missing price
/// fails the whole construction.
pub fn execute_orders(
    weights: &BTreeMap<String, f64>,
    available_cash: f64,
    prices: &dyn PriceRepository,
    date: NaiveDate,
) -> Result<Portfolio, LowvolError> {
    let quotes: BTreeMap<&str, f64> = weights
        .keys()
        .map(|code| Ok((code.as_str(), price_at(prices, code, date, date)?)))
        .collect::<Result<_, LowvolError>>()?;

    let mut portfolio = Portfolio::cash_only(available_cash);
    for (code, weight) in weights {
        let price = quotes[code.as_str()];
        let shares = (weight * available_cash / price).round().max(0.0) as i64;
        debug!("{code}: {shares} shares at {price:.2}");
        portfolio.cash -= shares as f64 * price;
        portfolio.positions.insert(code.clone(), shares);
    }
    Ok(portfolio)
}
