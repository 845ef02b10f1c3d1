//! Rebalancing backtest loop.
//!
//! Periods run strictly in order. Each period selects the low-volatility
//! cohort of the month's liquid universe, buys it in whole shares at the
//! period start, accrues dividends over the holding period and revalues at the
//! period end against the benchmark. The previous portfolio is the only state
//! carried from one period to the next.

use crate::domain::calendar::{MonthRange, Period, YearMonth, month_range};
use crate::domain::error::LowvolError;
use crate::domain::portfolio::{Portfolio, execute_orders, price_at};
use crate::domain::screening::{ScreenResult, Screening};
use crate::domain::strategy::{EqualWeight, WeightingPolicy, normalized};
use crate::domain::turnover::{Turnover, compute_turnover};
use crate::domain::universe::Universe;
use crate::ports::data_port::MarketData;
use chrono::NaiveDate;
use tracing::{debug, info};

/// Cash a run starts with when `[backtest] initial_cash` is absent.
pub const DEFAULT_INITIAL_CASH: f64 = 1_000_000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub start_period: YearMonth,
    pub period_count: usize,
    pub step_months: u32,
    pub initial_cash: f64,
    pub lookback_months: u32,
    pub selection_size: usize,
    pub liquidity_threshold: f64,
}

impl BacktestConfig {
    pub fn periods(&self) -> MonthRange {
        month_range(self.start_period, self.period_count, self.step_months)
    }
}

/// Everything computed for one rebalancing period.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodResult {
    pub period: Period,
    pub universe_size: usize,
    pub screen: ScreenResult,
    /// Holdings after the period's dividends were credited to cash.
    pub portfolio: Portfolio,
    /// `None` for the first period.
    pub turnover: Option<Turnover>,
    pub amount_invested: f64,
    pub dividends: f64,
    pub valuation: f64,
    pub portfolio_return: f64,
    pub benchmark_return: f64,
}

impl PeriodResult {
    pub fn excess_return(&self) -> f64 {
        self.portfolio_return - self.benchmark_return
    }
}

pub struct BacktestEngine<'a> {
    market: &'a MarketData,
    screening: &'a Screening,
    universe: Universe,
    weighting: Box<dyn WeightingPolicy>,
}

impl<'a> BacktestEngine<'a> {
    /// Engine over `universe`, equally weighting the selected cohort.
    pub fn new(market: &'a MarketData, screening: &'a Screening, universe: Universe) -> Self {
        Self {
            market,
            screening,
            universe,
            weighting: Box::new(EqualWeight),
        }
    }

    pub fn with_weighting(mut self, weighting: impl WeightingPolicy + 'static) -> Self {
        self.weighting = Box::new(weighting);
        self
    }

    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    pub async fn run(&mut self, config: &BacktestConfig) -> Result<Vec<PeriodResult>, LowvolError> {
        info!(
            "backtest from {} over {} periods of {} months, weighting: {}",
            config.start_period,
            config.period_count,
            config.step_months,
            self.weighting.name()
        );
        let mut results: Vec<PeriodResult> = Vec::with_capacity(config.period_count);
        for period in config.periods() {
            let previous = results.last().map(|r| &r.portfolio);
            let result = self.run_period(config, period, previous).await?;
            info!(
                "period {}: valuation {:.2}, return {:.2}%, benchmark {:.2}%",
                period,
                result.valuation,
                result.portfolio_return * 100.0,
                result.benchmark_return * 100.0
            );
            results.push(result);
        }
        Ok(results)
    }

    async fn run_period(
        &mut self,
        config: &BacktestConfig,
        period: Period,
        previous: Option<&Portfolio>,
    ) -> Result<PeriodResult, LowvolError> {
        info!("creating portfolio for period {period}");
        let market = self.market;
        let prices = market.prices.as_ref();

        let month = YearMonth::from_date(period.start);
        let universe_size = self
            .universe
            .init_month(month, config.liquidity_threshold)
            .len();
        info!("{universe_size} securities in universe for {month}");

        let as_of = YearMonth::from_date(day_before(period.start));
        let screen = self
            .screening
            .compute_volatilities(
                &self.universe,
                as_of,
                config.lookback_months,
                config.selection_size,
            )
            .await?;
        debug!("selected {} candidates", screen.low.len());

        let amount_invested = match previous {
            None => config.initial_cash,
            Some(prev) => prev.valuation(prices, day_before(period.start), period.start)?,
        };
        info!("amount invested: {amount_invested:.2}");

        let weights = normalized(&self.weighting.weights(&screen.low));
        let mut portfolio = execute_orders(&weights, amount_invested, prices, period.start)?;
        debug!(
            "{} positions, residual cash {:.2}",
            portfolio.position_count(),
            portfolio.cash
        );

        let turnover = previous
            .map(|prev| {
                compute_turnover(&portfolio, prev, |code| {
                    price_at(prices, code, period.start, period.start)
                })
            })
            .transpose()?;
        if let Some(t) = &turnover {
            info!(
                "turnover: {} added ({:.0}), {} dropped ({:.0}), {} adjusted ({:.0})",
                t.additions.len(),
                t.added_amount(),
                t.deletions.len(),
                t.dropped_amount(),
                t.adjustments.len(),
                t.adjusted_amount()
            );
        }

        let dividends = self.accrue_dividends(&portfolio, period)?;
        portfolio.cash += dividends;

        let valuation = portfolio.valuation(prices, period.end, period.start)?;
        let portfolio_return = if amount_invested > 0.0 {
            valuation / amount_invested - 1.0
        } else {
            0.0
        };
        let benchmark_return = self.benchmark_return(period)?;

        Ok(PeriodResult {
            period,
            universe_size,
            screen,
            portfolio,
            turnover,
            amount_invested,
            dividends,
            valuation,
            portfolio_return,
            benchmark_return,
        })
    }

    fn accrue_dividends(&self, portfolio: &Portfolio, period: Period) -> Result<f64, LowvolError> {
        let mut total = 0.0;
        for (code, &shares) in &portfolio.positions {
            let per_share = self
                .market
                .dividends
                .get_total(period.start, period.end, code)?;
            if per_share != 0.0 {
                debug!("{code}: dividends {per_share:.4} per share");
            }
            total += per_share * shares as f64;
        }
        Ok(total)
    }

    fn benchmark_return(&self, period: Period) -> Result<f64, LowvolError> {
        let start = self.market.benchmark.get_level(period.start)?;
        let end = self.market.benchmark.get_level(period.end)?;
        if !(start > 0.0) {
            return Err(LowvolError::DataSource {
                reason: format!("benchmark level {start} on {} is not positive", period.start),
            });
        }
        Ok((end - start) / start)
    }
}

/// Run a complete backtest over `universe` with equal weighting.
pub async fn run_backtest(
    market: &MarketData,
    screening: &Screening,
    universe: Universe,
    config: &BacktestConfig,
) -> Result<Vec<PeriodResult>, LowvolError> {
    BacktestEngine::new(market, screening, universe)
        .run(config)
        .await
}

fn day_before(date: NaiveDate) -> NaiveDate {
    date.pred_opt().unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_adapter::{InMemoryMarketData, InMemoryStore};
    use crate::domain::asof::AsOfSeries;
    use crate::domain::screening::ScreeningConfig;
    use crate::domain::universe::SecurityUniverse;
    use approx::assert_relative_eq;
    use chrono::Days;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ym(y: i32, m: u32) -> YearMonth {
        YearMonth::new(y, m).unwrap()
    }

    fn alternating(amplitude: f64) -> AsOfSeries {
        let start = date(2007, 11, 1);
        (0..200)
            .map(|i| {
                let r = if i % 2 == 0 { amplitude } else { -amplitude };
                (start.checked_add_days(Days::new(i)).unwrap(), r)
            })
            .collect()
    }

    /// A and B liquid in Q4 2007; B swapped for C in Q1 2008.
    fn market() -> MarketData {
        let mut data = InMemoryMarketData::new();
        data.set_returns("A", alternating(0.01));
        data.set_returns("B", alternating(0.02));
        data.set_returns("C", alternating(0.015));

        data.set_liquidity(ym(2007, 10), "A", 50_000_000);
        data.set_liquidity(ym(2007, 10), "B", 20_000_000);
        data.set_liquidity(ym(2007, 10), "C", 1_000);
        data.set_liquidity(ym(2008, 1), "A", 50_000_000);
        data.set_liquidity(ym(2008, 1), "C", 30_000_000);

        data.add_price("A", date(2007, 12, 31), 100.0);
        data.add_price("B", date(2007, 12, 31), 50.0);
        data.add_price("C", date(2007, 12, 31), 20.0);
        data.add_price("A", date(2008, 3, 31), 110.0);
        data.add_price("B", date(2008, 3, 31), 45.0);
        data.add_price("C", date(2008, 3, 31), 25.0);
        data.add_price("A", date(2008, 6, 30), 120.0);
        data.add_price("C", date(2008, 6, 30), 26.0);

        data.add_dividend("A", date(2008, 2, 15), 1.0);

        data.add_benchmark(date(2007, 12, 31), 2000.0);
        data.add_benchmark(date(2008, 3, 31), 2100.0);
        data.add_benchmark(date(2008, 6, 30), 2205.0);
        MarketData::from_adapter(Arc::new(data))
    }

    fn screening(market: &MarketData) -> Screening {
        Screening::new(
            market.performances.clone(),
            Arc::new(InMemoryStore::new()),
            ScreeningConfig::default(),
        )
    }

    fn universe(market: &MarketData) -> Universe {
        let codes = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        Universe::new(codes, market.liquidity.clone())
    }

    fn config(period_count: usize) -> BacktestConfig {
        BacktestConfig {
            start_period: ym(2008, 1),
            period_count,
            step_months: 3,
            initial_cash: 1_000_000.0,
            lookback_months: 1,
            selection_size: 2,
            liquidity_threshold: 10_000_000.0,
        }
    }

    #[tokio::test]
    async fn first_period_buys_equal_weights() {
        let market = market();
        let screening = screening(&market);
        let results = run_backtest(&market, &screening, universe(&market), &config(1))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        let first = &results[0];
        assert_eq!(first.period.start, date(2008, 1, 1));
        assert_eq!(first.period.end, date(2008, 3, 31));
        assert_eq!(first.universe_size, 2);
        assert_eq!(first.screen.low, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(first.portfolio.shares("A"), 5000);
        assert_eq!(first.portfolio.shares("B"), 10000);
        assert!(first.turnover.is_none());
        assert_relative_eq!(first.dividends, 5000.0);
        assert_relative_eq!(first.portfolio.cash, 5000.0);
        assert_relative_eq!(first.valuation, 5000.0 * 110.0 + 10000.0 * 45.0 + 5000.0);
        assert_relative_eq!(first.portfolio_return, 0.005, epsilon = 1e-12);
        assert_relative_eq!(first.benchmark_return, 0.05);
    }

    #[tokio::test]
    async fn second_period_reinvests_and_reports_turnover() {
        let market = market();
        let screening = screening(&market);
        let results = run_backtest(&market, &screening, universe(&market), &config(2))
            .await
            .unwrap();

        let second = &results[1];
        assert_eq!(second.period.start, date(2008, 4, 1));
        assert_relative_eq!(second.amount_invested, 1_005_000.0);
        // 502500 / 110 = 4568.18, 502500 / 25 = 20100
        assert_eq!(second.portfolio.shares("A"), 4568);
        assert_eq!(second.portfolio.shares("C"), 20100);
        assert_relative_eq!(second.portfolio.cash, 20.0, epsilon = 1e-6);

        let turnover = second.turnover.as_ref().unwrap();
        assert_eq!(turnover.additions["C"].shares, 20100);
        assert_eq!(turnover.deletions["B"].shares, -10000);
        assert_relative_eq!(turnover.dropped_amount(), 450_000.0);
        assert_eq!(turnover.adjustments["A"].shares, -432);
        assert_relative_eq!(second.benchmark_return, 0.05, epsilon = 1e-12);
    }

    #[tokio::test]
    async fn missing_start_price_aborts_run() {
        let mut data = InMemoryMarketData::new();
        data.set_returns("A", alternating(0.01));
        data.set_liquidity(ym(2007, 10), "A", 50_000_000);
        data.add_benchmark(date(2007, 12, 31), 2000.0);
        let market = MarketData::from_adapter(Arc::new(data));
        let screening = screening(&market);
        let universe = Universe::new(vec!["A".into()], market.liquidity.clone());

        let result = run_backtest(&market, &screening, universe, &config(1)).await;
        match result {
            Err(LowvolError::PriceUnavailable {
                period_start,
                code,
                date: d,
            }) => {
                assert_eq!(period_start, date(2008, 1, 1));
                assert_eq!(code, "A");
                assert_eq!(d, date(2008, 1, 1));
            }
            other => panic!("expected PriceUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_universe_holds_cash() {
        let market = market();
        let screening = screening(&market);
        let universe = Universe::new(vec!["ZZZ".into()], market.liquidity.clone());
        let results = run_backtest(&market, &screening, universe, &config(1))
            .await
            .unwrap();

        let first = &results[0];
        assert_eq!(first.universe_size, 0);
        assert!(first.portfolio.is_empty());
        assert_relative_eq!(first.valuation, 1_000_000.0);
        assert_relative_eq!(first.portfolio_return, 0.0);
    }

    struct Concentrated;

    impl WeightingPolicy for Concentrated {
        fn name(&self) -> &str {
            "first only"
        }

        fn weights(&self, candidates: &[String]) -> BTreeMap<String, f64> {
            candidates.iter().take(1).map(|c| (c.clone(), 3.0)).collect()
        }
    }

    #[tokio::test]
    async fn weighting_policy_is_pluggable() {
        let market = market();
        let screening = screening(&market);
        let mut engine =
            BacktestEngine::new(&market, &screening, universe(&market)).with_weighting(Concentrated);
        let results = engine.run(&config(1)).await.unwrap();
        assert_eq!(results[0].portfolio.shares("A"), 10000);
        assert!(!results[0].portfolio.has_position("B"));
        assert_eq!(engine.universe().securities().unwrap().len(), 2);
    }

    #[test]
    fn config_schedule() {
        let periods: Vec<Period> = config(2).periods().collect();
        assert_eq!(periods.len(), 2);
        assert_eq!(periods[1].end, date(2008, 6, 30));
    }
}
