#![allow(dead_code)]

use chrono::{Days, NaiveDate};
use lowvol::adapters::memory_adapter::{InMemoryMarketData, InMemoryStore};
use lowvol::domain::asof::AsOfSeries;
use lowvol::domain::backtest::BacktestConfig;
use lowvol::domain::calendar::YearMonth;
use lowvol::domain::screening::{Screening, ScreeningConfig};
use lowvol::domain::universe::Universe;
use lowvol::ports::data_port::MarketData;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn ym(y: i32, m: u32) -> YearMonth {
    YearMonth::new(y, m).unwrap()
}

pub fn codes(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Daily returns alternating `+amplitude`, `-amplitude` from 2007-11-01.
pub fn alternating_returns(amplitude: f64, days: u64) -> AsOfSeries {
    let start = date(2007, 11, 1);
    (0..days)
        .map(|i| {
            let r = if i % 2 == 0 { amplitude } else { -amplitude };
            (start.checked_add_days(Days::new(i)).unwrap(), r)
        })
        .collect()
}

/// Three securities over two quarterly periods starting 2008-01.
///
/// A and B are liquid for the January universe; B drops out and C enters for
/// April. Volatility ranks A < C < B.
pub fn three_security_market() -> InMemoryMarketData {
    let mut data = InMemoryMarketData::new();
    data.set_returns("A", alternating_returns(0.01, 200));
    data.set_returns("B", alternating_returns(0.02, 200));
    data.set_returns("C", alternating_returns(0.015, 200));

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
    data
}

pub fn into_market(data: InMemoryMarketData) -> MarketData {
    MarketData::from_adapter(Arc::new(data))
}

pub fn in_memory_screening(market: &MarketData) -> Screening {
    Screening::new(
        market.performances.clone(),
        Arc::new(InMemoryStore::new()),
        ScreeningConfig::default(),
    )
}

pub fn universe(market: &MarketData, list: &[&str]) -> Universe {
    Universe::new(codes(list), market.liquidity.clone())
}

pub fn quarterly_config(period_count: usize) -> BacktestConfig {
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

/// Daily bars from 2007-10-01 whose close alternates between `base` and
/// `base + swing`, with a constant volume.
pub fn oscillating_bars(base: f64, swing: f64, volume: f64, days: u64) -> Vec<(NaiveDate, f64, f64)> {
    let start = date(2007, 10, 1);
    (0..days)
        .map(|i| {
            let close = if i % 2 == 0 { base } else { base + swing };
            (start.checked_add_days(Days::new(i)).unwrap(), close, volume)
        })
        .collect()
}

pub fn write_file(path: &Path, content: &str) {
    let mut file = fs::File::create(path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
}

pub fn write_price_file(dir: &Path, code: &str, bars: &[(NaiveDate, f64, f64)]) {
    let mut content = String::from("date,open,high,low,close,volume\n");
    for (d, close, volume) in bars {
        content.push_str(&format!(
            "{},{close},{close},{close},{close},{volume}\n",
            d.format("%Y-%m-%d")
        ));
    }
    write_file(&dir.join(format!("{code}.csv")), &content);
}

/// On-disk data set mirroring the layout a config's `[data]` section names.
pub struct CsvFixture {
    pub root: PathBuf,
    pub prices_dir: PathBuf,
    pub dividends: PathBuf,
    pub benchmark: PathBuf,
    pub liquidity: PathBuf,
    pub equities: PathBuf,
}

impl CsvFixture {
    /// A (calm, liquid), B (volatile, liquid) and C (calm, illiquid) priced
    /// daily through June 2008. The liquidity file is left for the caller.
    pub fn create(root: &Path) -> Self {
        let prices_dir = root.join("prices");
        fs::create_dir_all(&prices_dir).unwrap();
        write_price_file(&prices_dir, "A", &oscillating_bars(100.0, 1.0, 1_000_000.0, 274));
        write_price_file(&prices_dir, "B", &oscillating_bars(50.0, 2.0, 1_000_000.0, 274));
        write_price_file(&prices_dir, "C", &oscillating_bars(20.0, 0.1, 100.0, 274));

        let fixture = Self {
            root: root.to_path_buf(),
            dividends: root.join("dividends.csv"),
            benchmark: root.join("benchmark.csv"),
            liquidity: root.join("liquidity.csv"),
            equities: root.join("equities.csv"),
            prices_dir,
        };
        write_file(&fixture.equities, "code\nA\nB\nC\n");
        write_file(&fixture.dividends, "code,date,amount\nA,2008-02-15,0.5\n");
        write_file(
            &fixture.benchmark,
            "date,level\n2007-12-31,2000\n2008-03-31,2100\n2008-06-30,2205\n",
        );
        fixture
    }

    pub fn config_ini(&self, extra: &str) -> String {
        format!(
            "[data]\nprices_dir = {}\ndividends = {}\nbenchmark = {}\nliquidity = {}\nequities = {}\n\n\
             [backtest]\nstart_period = 200801\nperiod_count = 1\nstep_months = 3\n\
             initial_cash = 1000000\nlookback_months = 1\nselection_size = 1\n\
             liquidity_threshold = 10000000\n\n{extra}",
            self.prices_dir.display(),
            self.dividends.display(),
            self.benchmark.display(),
            self.liquidity.display(),
            self.equities.display(),
        )
    }

    pub fn write_config(&self, extra: &str) -> PathBuf {
        let path = self.root.join("lowvol.ini");
        write_file(&path, &self.config_ini(extra));
        path
    }
}
