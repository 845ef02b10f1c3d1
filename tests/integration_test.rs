//! Integration tests for the rebalancing pipeline.
//!
//! Tests cover:
//! - Two-period backtest over in-memory repositories with hand-checked numbers
//! - Run summary over the same backtest
//! - Universe reinitialization between periods
//! - Screening cache reuse across runs sharing a store
//! - Failures that abort a run (missing prices, missing benchmark)

mod common;

use approx::assert_relative_eq;
use common::*;
use lowvol::adapters::memory_adapter::{InMemoryMarketData, InMemoryStore};
use lowvol::domain::asof::AsOfSeries;
use lowvol::domain::backtest::{BacktestEngine, run_backtest};
use lowvol::domain::error::LowvolError;
use lowvol::domain::metrics::Summary;
use lowvol::domain::screening::{Screening, ScreeningConfig, volatility_cache_key};
use lowvol::domain::universe::{SecurityUniverse, StaticUniverse};
use lowvol::domain::volatility::CoveragePolicy;
use lowvol::ports::cache_port::KeyValueStore;
use lowvol::ports::data_port::{MarketData, PerformanceRepository};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

mod full_backtest_pipeline {
    use super::*;

    #[tokio::test]
    async fn two_periods_with_hand_checked_numbers() {
        let market = into_market(three_security_market());
        let screening = in_memory_screening(&market);
        let results = run_backtest(
            &market,
            &screening,
            universe(&market, &["A", "B", "C"]),
            &quarterly_config(2),
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 2);

        let first = &results[0];
        assert_eq!(first.screen.low, codes(&["A", "B"]));
        assert_eq!(first.portfolio.shares("A"), 5000);
        assert_eq!(first.portfolio.shares("B"), 10000);
        assert_relative_eq!(first.dividends, 5000.0);
        assert_relative_eq!(first.valuation, 1_005_000.0);

        let second = &results[1];
        assert_eq!(second.period.start, date(2008, 4, 1));
        assert_eq!(second.period.end, date(2008, 6, 30));
        assert_eq!(second.screen.low, codes(&["A", "C"]));
        assert_relative_eq!(second.amount_invested, 1_005_000.0);
        assert_relative_eq!(second.dividends, 0.0);
        // 4568 * 120 + 20100 * 26 + 20
        assert_relative_eq!(second.valuation, 1_070_780.0, epsilon = 1e-6);
        assert_relative_eq!(
            second.portfolio_return,
            1_070_780.0 / 1_005_000.0 - 1.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(second.benchmark_return, 0.05, epsilon = 1e-12);
    }

    #[tokio::test]
    async fn summary_compounds_the_run() {
        let market = into_market(three_security_market());
        let screening = in_memory_screening(&market);
        let config = quarterly_config(2);
        let results = run_backtest(
            &market,
            &screening,
            universe(&market, &["A", "B", "C"]),
            &config,
        )
        .await
        .unwrap();

        let summary = Summary::compute(&results, config.initial_cash);
        assert_eq!(summary.periods, 2);
        assert_relative_eq!(summary.final_valuation, 1_070_780.0, epsilon = 1e-6);
        assert_relative_eq!(summary.total_return, 0.07078, epsilon = 1e-9);
        assert_relative_eq!(summary.benchmark_return, 0.1025, epsilon = 1e-12);
        assert_eq!(summary.periods_outperformed, 1);
        assert_relative_eq!(summary.dividends, 5000.0);
        assert_relative_eq!(summary.dropped_amount, 450_000.0);
        assert_relative_eq!(summary.added_amount, 502_500.0);
        assert_relative_eq!(summary.max_drawdown, 0.0);
    }

    #[tokio::test]
    async fn universe_is_reinitialized_each_period() {
        let market = into_market(three_security_market());
        let screening = in_memory_screening(&market);
        let mut engine =
            BacktestEngine::new(&market, &screening, universe(&market, &["A", "B", "C"]));
        let results = engine.run(&quarterly_config(2)).await.unwrap();

        assert_eq!(results[0].universe_size, 2);
        assert_eq!(results[1].universe_size, 2);
        let snapshot = engine.universe().snapshot().unwrap();
        assert_eq!(snapshot.month, ym(2008, 4));
        assert_eq!(snapshot.quarter, ym(2008, 1));
        assert_eq!(engine.universe().securities().unwrap(), codes(&["A", "C"]));
    }
}

mod screening_cache {
    use super::*;

    struct CountingReturns {
        inner: Arc<dyn PerformanceRepository>,
        calls: AtomicUsize,
    }

    impl PerformanceRepository for CountingReturns {
        fn returns(&self, code: &str) -> Result<Arc<AsOfSeries>, LowvolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.returns(code)
        }
    }

    #[tokio::test]
    async fn second_screen_over_shared_store_reads_cache() {
        let market = into_market(three_security_market());
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let counting = Arc::new(CountingReturns {
            inner: market.performances.clone(),
            calls: AtomicUsize::new(0),
        });
        let universe = StaticUniverse::new(codes(&["A", "B", "C"]));

        let first = Screening::new(counting.clone(), store.clone(), ScreeningConfig::default());
        let computed = first.volatilities(&universe, ym(2007, 12), 1).await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 3);

        let second = Screening::new(counting.clone(), store.clone(), ScreeningConfig::default());
        let cached = second.volatilities(&universe, ym(2007, 12), 1).await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 3);
        assert_eq!(computed, cached);

        let key = volatility_cache_key(ym(2007, 12), 1, &CoveragePolicy::default());
        assert!(store.get(key.as_str()).unwrap().is_some());
    }

    #[tokio::test]
    async fn different_lookback_is_a_separate_entry() {
        let market = into_market(three_security_market());
        let store = Arc::new(InMemoryStore::new());
        let screening = Screening::new(
            market.performances.clone(),
            store.clone(),
            ScreeningConfig::default(),
        );
        let universe = StaticUniverse::new(codes(&["A"]));

        screening.volatilities(&universe, ym(2007, 12), 1).await.unwrap();
        screening.volatilities(&universe, ym(2007, 12), 2).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn sqlite_store_serves_a_fresh_screening() {
        use lowvol::adapters::sqlite_adapter::SqliteStore;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        let market = into_market(three_security_market());
        let universe = StaticUniverse::new(codes(&["A", "B", "C"]));

        let computed = {
            let store = Arc::new(SqliteStore::open(&path, 2).unwrap());
            Screening::new(market.performances.clone(), store, ScreeningConfig::default())
                .volatilities(&universe, ym(2007, 12), 1)
                .await
                .unwrap()
        };

        let empty = into_market(InMemoryMarketData::new());
        let store = Arc::new(SqliteStore::open(&path, 2).unwrap());
        let reopened = Screening::new(empty.performances.clone(), store, ScreeningConfig::default())
            .volatilities(&universe, ym(2007, 12), 1)
            .await
            .unwrap();
        assert_eq!(computed, reopened);
        assert_eq!(reopened.len(), 3);
    }
}

mod aborted_runs {
    use super::*;

    #[tokio::test]
    async fn unpriced_selection_names_security_and_period() {
        let mut data = three_security_market();
        data.set_liquidity(ym(2007, 10), "D", 90_000_000);
        data.set_returns("D", alternating_returns(0.001, 200));
        data.add_price("D", date(2008, 1, 2), 10.0);
        let market = into_market(data);
        let screening = in_memory_screening(&market);

        let result = run_backtest(
            &market,
            &screening,
            universe(&market, &["A", "D"]),
            &quarterly_config(1),
        )
        .await;
        match result {
            Err(LowvolError::PriceUnavailable {
                period_start,
                code,
                date: d,
            }) => {
                assert_eq!(period_start, date(2008, 1, 1));
                assert_eq!(code, "D");
                assert_eq!(d, date(2008, 1, 1));
            }
            other => panic!("expected PriceUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_benchmark_level_is_no_data() {
        let mut data = InMemoryMarketData::new();
        data.set_returns("A", alternating_returns(0.01, 200));
        data.set_liquidity(ym(2007, 10), "A", 50_000_000);
        data.add_price("A", date(2007, 12, 31), 100.0);
        data.add_benchmark(date(2008, 2, 1), 2000.0);
        let market = into_market(data);
        let screening = in_memory_screening(&market);

        let result = run_backtest(
            &market,
            &screening,
            universe(&market, &["A"]),
            &quarterly_config(1),
        )
        .await;
        assert!(matches!(result, Err(LowvolError::NoData { .. })));
    }

    #[tokio::test]
    async fn short_history_is_skipped_not_fatal() {
        let mut data = three_security_market();
        data.set_returns("B", alternating_returns(0.02, 5));
        let market = MarketData::from_adapter(Arc::new(data));
        let screening = in_memory_screening(&market);

        let results = run_backtest(
            &market,
            &screening,
            universe(&market, &["A", "B"]),
            &quarterly_config(1),
        )
        .await
        .unwrap();
        assert_eq!(results[0].universe_size, 2);
        assert_eq!(results[0].screen.low, codes(&["A"]));
        assert_eq!(results[0].portfolio.shares("A"), 10000);
    }
}
