//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::adapters::csv_adapter::{self, CsvMarketData, DataPaths};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::memory_adapter::InMemoryStore;
use crate::domain::backtest::{BacktestConfig, DEFAULT_INITIAL_CASH, PeriodResult, run_backtest};
use crate::domain::calendar::YearMonth;
use crate::domain::config_validation::{
    validate_all, validate_data_config, validate_screening_config,
};
use crate::domain::error::LowvolError;
use crate::domain::liquidity::DEFAULT_QUARTER_LAG_DAYS;
use crate::domain::metrics::Summary;
use crate::domain::screening::{
    DEFAULT_TASK_TIMEOUT, DEFAULT_WORKERS, Screening, ScreeningConfig, rank_by_volatility,
};
use crate::domain::universe::{SecurityUniverse, Universe};
use crate::domain::volatility::{
    CoveragePolicy, DEFAULT_MIN_COVERAGE, DEFAULT_PERIODS_PER_MONTH,
};
use crate::ports::cache_port::KeyValueStore;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::MarketData;

#[derive(Parser, Debug)]
#[command(name = "lowvol", about = "Low-volatility rebalancing backtester")]
pub struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the rebalancing backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// First rebalancing month (YYYYMM), overriding the config
        #[arg(long)]
        start_period: Option<YearMonth>,
        /// Number of periods, overriding the config
        #[arg(long)]
        periods: Option<usize>,
    },
    /// Rank the liquid universe by trailing volatility
    Screen {
        #[arg(short, long)]
        config: PathBuf,
        /// Last month of the lookback window (YYYYMM)
        #[arg(long)]
        period: YearMonth,
        /// Universe month; defaults to the month after --period
        #[arg(long)]
        month: Option<YearMonth>,
    },
    /// Compute quarterly median dollar volume from the price files
    LiquidityStats {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate a configuration file and print the rebalancing schedule
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Backtest {
            config,
            start_period,
            periods,
        } => run_backtest_command(&config, start_period, periods),
        Command::Screen {
            config,
            period,
            month,
        } => run_screen(&config, period, month),
        Command::LiquidityStats { config, output } => run_liquidity_stats(&config, &output),
        Command::Validate { config } => run_validate(&config),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, LowvolError> {
    info!("loading config from {}", path.display());
    FileConfigAdapter::from_file(path)
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, LowvolError> {
    let start_str = adapter.require_string("backtest", "start_period")?;
    let start_period = start_str
        .parse::<YearMonth>()
        .map_err(|e| LowvolError::ConfigInvalid {
            section: "backtest".into(),
            key: "start_period".into(),
            reason: e.to_string(),
        })?;

    Ok(BacktestConfig {
        start_period,
        period_count: positive(adapter, "backtest", "period_count", 1)? as usize,
        step_months: positive(adapter, "backtest", "step_months", 3)?,
        initial_cash: adapter.get_double("backtest", "initial_cash", DEFAULT_INITIAL_CASH),
        lookback_months: positive(adapter, "backtest", "lookback_months", 18)?,
        selection_size: positive(adapter, "backtest", "selection_size", 100)? as usize,
        liquidity_threshold: adapter.get_double("backtest", "liquidity_threshold", 10_000_000.0),
    })
}

/// Command-line `--start-period` and `--periods` over the config file values.
pub fn apply_overrides(
    mut config: BacktestConfig,
    start_override: Option<YearMonth>,
    periods_override: Option<usize>,
) -> Result<BacktestConfig, LowvolError> {
    if let Some(start) = start_override {
        config.start_period = start;
    }
    if let Some(periods) = periods_override {
        if periods == 0 {
            return Err(LowvolError::ConfigInvalid {
                section: "backtest".into(),
                key: "period_count".into(),
                reason: "--periods must be a positive integer".into(),
            });
        }
        config.period_count = periods;
    }
    Ok(config)
}

pub fn build_screening_config(adapter: &dyn ConfigPort) -> Result<ScreeningConfig, LowvolError> {
    Ok(ScreeningConfig {
        workers: positive(adapter, "screening", "workers", DEFAULT_WORKERS as u32)? as usize,
        task_timeout: Duration::from_secs(u64::from(positive(
            adapter,
            "screening",
            "task_timeout_secs",
            DEFAULT_TASK_TIMEOUT.as_secs() as u32,
        )?)),
        coverage: CoveragePolicy {
            min_coverage: adapter.get_double("screening", "min_coverage", DEFAULT_MIN_COVERAGE),
            periods_per_month: positive(
                adapter,
                "screening",
                "periods_per_month",
                DEFAULT_PERIODS_PER_MONTH,
            )?,
        },
    })
}

pub fn quarter_lag_days(adapter: &dyn ConfigPort) -> u32 {
    let days = adapter.get_int("universe", "quarter_lag_days", i64::from(DEFAULT_QUARTER_LAG_DAYS));
    u32::try_from(days).unwrap_or(DEFAULT_QUARTER_LAG_DAYS)
}

fn positive(
    adapter: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: u32,
) -> Result<u32, LowvolError> {
    let value = adapter.get_int(section, key, i64::from(default));
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| LowvolError::ConfigInvalid {
            section: section.into(),
            key: key.into(),
            reason: format!("{key} must be a positive integer"),
        })
}

/// SQLite store at `[cache] path`, or an in-memory store when no path is set.
pub fn open_cache_store(adapter: &dyn ConfigPort) -> Result<Arc<dyn KeyValueStore>, LowvolError> {
    let path = adapter
        .get_string("cache", "path")
        .filter(|p| !p.trim().is_empty());
    match path {
        None => {
            info!("no cache path configured, screening results are kept in memory");
            Ok(Arc::new(InMemoryStore::new()))
        }
        #[cfg(feature = "sqlite")]
        Some(_) => {
            let store = crate::adapters::sqlite_adapter::SqliteStore::from_config(adapter)?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        Some(p) => {
            warn!("sqlite feature disabled, ignoring cache path {p}");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

/// Repositories, eligible securities and screening engine for one config.
pub struct Workspace {
    pub market: MarketData,
    pub eligible: Vec<String>,
    pub screening: Screening,
    pub quarter_lag_days: u32,
}

impl Workspace {
    pub fn open(adapter: &dyn ConfigPort) -> Result<Self, LowvolError> {
        validate_data_config(adapter)?;
        validate_screening_config(adapter)?;
        let paths = DataPaths::from_config(adapter)?;
        let eligible = csv_adapter::read_equities(&paths.equities)?;
        let market = MarketData::from_adapter(Arc::new(CsvMarketData::open(&paths)?));
        let screening = Screening::new(
            market.performances.clone(),
            open_cache_store(adapter)?,
            build_screening_config(adapter)?,
        );
        Ok(Self {
            market,
            eligible,
            screening,
            quarter_lag_days: quarter_lag_days(adapter),
        })
    }

    pub fn universe(&self) -> Universe {
        Universe::new(self.eligible.clone(), self.market.liquidity.clone())
            .with_quarter_lag(self.quarter_lag_days)
    }
}

/// Multi-threaded runtime for the screening worker pool.
fn build_runtime() -> Result<tokio::runtime::Runtime, LowvolError> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

/// Drive `future` to completion. Timed-out blocking jobs may still be running
/// afterwards; they are left behind instead of joined.
fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, LowvolError> {
    let runtime = build_runtime()?;
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    Ok(output)
}

fn run_backtest_command(
    config_path: &Path,
    start_override: Option<YearMonth>,
    periods_override: Option<usize>,
) -> Result<(), LowvolError> {
    let adapter = load_config(config_path)?;
    validate_all(&adapter)?;

    let bt_config = apply_overrides(
        build_backtest_config(&adapter)?,
        start_override,
        periods_override,
    )?;

    let workspace = Workspace::open(&adapter)?;
    let results = block_on(run_backtest(
        &workspace.market,
        &workspace.screening,
        workspace.universe(),
        &bt_config,
    ))??;

    print_results(&results);
    print_summary(&Summary::compute(&results, bt_config.initial_cash));
    Ok(())
}

fn run_screen(
    config_path: &Path,
    as_of: YearMonth,
    month: Option<YearMonth>,
) -> Result<(), LowvolError> {
    let adapter = load_config(config_path)?;
    let bt_config = build_backtest_config(&adapter)?;
    let month = match month.or_else(|| as_of.plus_months(1)) {
        Some(m) => m,
        None => {
            return Err(LowvolError::ConfigInvalid {
                section: "screen".into(),
                key: "period".into(),
                reason: format!("no month follows {as_of}"),
            });
        }
    };

    let workspace = Workspace::open(&adapter)?;
    let mut universe = workspace.universe();
    universe.init_month(month, bt_config.liquidity_threshold);

    let table = block_on(workspace.screening.volatilities(
        &universe,
        as_of,
        bt_config.lookback_months,
    ))??;
    let ranked = rank_by_volatility(universe.securities()?, &table, bt_config.selection_size);

    println!(
        "universe {month}: {} securities, {} with volatility over {} months to {as_of}",
        universe.size()?,
        table.len(),
        bt_config.lookback_months
    );
    println!("\nLowest volatility:");
    for code in &ranked.low {
        println!("  {:<10} {:>8.4}%", code, table[code] * 100.0);
    }
    println!("\nHighest volatility:");
    for code in &ranked.high {
        println!("  {:<10} {:>8.4}%", code, table[code] * 100.0);
    }
    Ok(())
}

fn run_liquidity_stats(config_path: &Path, output: &Path) -> Result<(), LowvolError> {
    let adapter = load_config(config_path)?;
    let prices_dir = PathBuf::from(adapter.require_string("data", "prices_dir")?);
    let records = csv_adapter::compute_liquidity_stats(&prices_dir)?;
    csv_adapter::write_liquidity_stats(output, &records)?;
    info!("wrote {} rows to {}", records.len(), output.display());
    println!("{} liquidity rows written to {}", records.len(), output.display());
    Ok(())
}

fn run_validate(config_path: &Path) -> Result<(), LowvolError> {
    let adapter = load_config(config_path)?;
    validate_all(&adapter)?;
    let bt_config = build_backtest_config(&adapter)?;
    let screening = build_screening_config(&adapter)?;
    let paths = DataPaths::from_config(&adapter)?;

    for (name, path) in [
        ("prices_dir", &paths.prices_dir),
        ("returns_prices_dir", &paths.returns_prices_dir),
        ("dividends", &paths.dividends),
        ("benchmark", &paths.benchmark),
        ("liquidity", &paths.liquidity),
        ("equities", &paths.equities),
    ] {
        if !path.exists() {
            warn!("[data] {name} {} does not exist", path.display());
        }
    }

    println!("Configuration is valid");
    println!("  initial cash:        {:.2}", bt_config.initial_cash);
    println!("  lookback months:     {}", bt_config.lookback_months);
    println!("  selection size:      {}", bt_config.selection_size);
    println!("  liquidity threshold: {:.0}", bt_config.liquidity_threshold);
    println!(
        "  screening:           {} workers, {}s timeout, {:.0}% coverage of {} periods/month",
        screening.workers,
        screening.task_timeout.as_secs(),
        screening.coverage.min_coverage * 100.0,
        screening.coverage.periods_per_month
    );
    println!("  quarter lag:         {} days", quarter_lag_days(&adapter));
    println!("Schedule:");
    for period in bt_config.periods() {
        println!("  {period}");
    }
    Ok(())
}

fn print_results(results: &[PeriodResult]) {
    println!(
        "{:<10} {:<10} {:>6} {:>9} {:>16} {:>16} {:>9} {:>9} {:>9}",
        "start", "end", "univ", "positions", "invested", "valuation", "return", "bench", "excess"
    );
    for r in results {
        println!(
            "{:<10} {:<10} {:>6} {:>9} {:>16.2} {:>16.2} {:>8.2}% {:>8.2}% {:>8.2}%",
            r.period.start,
            r.period.end,
            r.universe_size,
            r.portfolio.position_count(),
            r.amount_invested,
            r.valuation,
            r.portfolio_return * 100.0,
            r.benchmark_return * 100.0,
            r.excess_return() * 100.0
        );
    }
}

fn print_summary(summary: &Summary) {
    println!("\nSummary over {} periods", summary.periods);
    println!("  final valuation:      {:.2}", summary.final_valuation);
    println!("  total return:         {:.2}%", summary.total_return * 100.0);
    println!("  benchmark return:     {:.2}%", summary.benchmark_return * 100.0);
    println!("  excess return:        {:.2}%", summary.excess_return * 100.0);
    println!(
        "  periods outperformed: {}/{}",
        summary.periods_outperformed, summary.periods
    );
    println!("  max drawdown:         {:.2}%", summary.max_drawdown * 100.0);
    println!("  dividends collected:  {:.2}", summary.dividends);
    println!(
        "  turnover:             {:.2} added, {:.2} dropped",
        summary.added_amount, summary.dropped_amount
    );
}
