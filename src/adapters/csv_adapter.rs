//! CSV file data adapter.
//!
//! Price files (`CODE.csv`: date,open,high,low,close,volume) are read lazily,
//! one security at a time, and kept for the life of the adapter. Dividends,
//! benchmark levels and liquidity statistics are small and loaded up front.

use crate::domain::asof::AsOfSeries;
use crate::domain::calendar::YearMonth;
use crate::domain::error::LowvolError;
use crate::domain::liquidity::{LiquidityIndex, LiquidityRecord, quarterly_median_dollar_volume};
use crate::domain::ohlcv::PriceBar;
use crate::domain::volatility::daily_returns;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::{
    BenchmarkRepository, DividendRepository, LiquidityRepository, PerformanceRepository,
    PriceRepository,
};
use chrono::NaiveDate;
use csv::StringRecord;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DATE_FORMAT: &str = "%Y-%m-%d";
const MISSING: &str = "#N/A";

/// Locations of every input file, from the `[data]` config section.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPaths {
    pub prices_dir: PathBuf,
    pub returns_prices_dir: PathBuf,
    pub dividends: PathBuf,
    pub benchmark: PathBuf,
    pub liquidity: PathBuf,
    pub equities: PathBuf,
}

impl DataPaths {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, LowvolError> {
        let prices_dir = PathBuf::from(config.require_string("data", "prices_dir")?);
        let returns_prices_dir = config
            .get_string("data", "returns_prices_dir")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| prices_dir.clone());
        Ok(Self {
            prices_dir,
            returns_prices_dir,
            dividends: config.require_string("data", "dividends")?.into(),
            benchmark: config.require_string("data", "benchmark")?.into(),
            liquidity: config.require_string("data", "liquidity")?.into(),
            equities: config.require_string("data", "equities")?.into(),
        })
    }
}

pub struct CsvMarketData {
    prices_dir: PathBuf,
    returns_prices_dir: PathBuf,
    prices: RwLock<HashMap<String, Arc<AsOfSeries>>>,
    returns: RwLock<HashMap<String, Arc<AsOfSeries>>>,
    dividends: HashMap<String, AsOfSeries>,
    benchmark: AsOfSeries,
    liquidity: LiquidityIndex,
}

impl CsvMarketData {
    pub fn open(paths: &DataPaths) -> Result<Self, LowvolError> {
        let dividends = read_dividends(&paths.dividends)?;
        let benchmark = read_benchmark(&paths.benchmark)?;
        let liquidity = read_liquidity(&paths.liquidity)?;
        info!(
            "loaded dividends for {} securities, {} benchmark levels, {} liquidity quarters",
            dividends.len(),
            benchmark.len(),
            liquidity.quarter_count()
        );
        Ok(Self {
            prices_dir: paths.prices_dir.clone(),
            returns_prices_dir: paths.returns_prices_dir.clone(),
            prices: RwLock::new(HashMap::new()),
            returns: RwLock::new(HashMap::new()),
            dividends,
            benchmark,
            liquidity,
        })
    }

    /// Close prices of `code`, loading its file on first access. A security
    /// without a file has an empty series.
    pub fn price_series(&self, code: &str) -> Result<Arc<AsOfSeries>, LowvolError> {
        lazy_load(&self.prices, code, || {
            let path = price_path(&self.prices_dir, code);
            let bars = read_price_bars_if_present(&path)?;
            AsOfSeries::from_sorted(
                &path.display().to_string(),
                bars.into_iter()
                    .filter_map(|b| b.close.map(|close| (b.date, close))),
            )
        })
    }
}

fn lazy_load<F>(
    cache: &RwLock<HashMap<String, Arc<AsOfSeries>>>,
    code: &str,
    load: F,
) -> Result<Arc<AsOfSeries>, LowvolError>
where
    F: FnOnce() -> Result<AsOfSeries, LowvolError>,
{
    if let Some(series) = cache.read().get(code) {
        return Ok(series.clone());
    }
    let series = Arc::new(load()?);
    debug!("loaded {} observations for {code}", series.len());
    Ok(cache
        .write()
        .entry(code.to_string())
        .or_insert(series)
        .clone())
}

impl PriceRepository for CsvMarketData {
    fn get_price(&self, date: NaiveDate, code: &str) -> Result<f64, LowvolError> {
        self.price_series(code)?
            .get(date)
            .map_err(|e| LowvolError::no_data(format!("price:{code}"), e))
    }
}

impl DividendRepository for CsvMarketData {
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

impl BenchmarkRepository for CsvMarketData {
    fn get_level(&self, date: NaiveDate) -> Result<f64, LowvolError> {
        self.benchmark
            .get(date)
            .map_err(|e| LowvolError::no_data("benchmark", e))
    }
}

impl LiquidityRepository for CsvMarketData {
    fn median_volume(&self, quarter: YearMonth, code: &str) -> u64 {
        self.liquidity.median_volume(quarter, code)
    }
}

impl PerformanceRepository for CsvMarketData {
    fn returns(&self, code: &str) -> Result<Arc<AsOfSeries>, LowvolError> {
        lazy_load(&self.returns, code, || {
            let path = price_path(&self.returns_prices_dir, code);
            let bars = read_price_bars_if_present(&path)?;
            let mut previous: Option<NaiveDate> = None;
            for bar in &bars {
                if let Some(prev) = previous.filter(|p| bar.date <= *p) {
                    return Err(LowvolError::InconsistentOrdering {
                        source_name: path.display().to_string(),
                        previous: prev,
                        found: bar.date,
                    });
                }
                previous = Some(bar.date);
            }
            Ok(daily_returns(bars))
        })
    }
}

pub fn price_path(dir: &Path, code: &str) -> PathBuf {
    dir.join(format!("{code}.csv"))
}

/// Security codes with a price file in `dir`, sorted.
pub fn list_codes(dir: &Path) -> Result<Vec<String>, LowvolError> {
    let entries = fs::read_dir(dir).map_err(|e| LowvolError::DataSource {
        reason: format!("failed to read directory {}: {}", dir.display(), e),
    })?;

    let mut codes = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| LowvolError::DataSource {
            reason: format!("directory entry error: {e}"),
        })?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "csv") {
            if let Some(stem) = path.file_stem() {
                codes.push(stem.to_string_lossy().into_owned());
            }
        }
    }
    codes.sort();
    Ok(codes)
}

/// Daily bars of one price file in file order. `#N/A` or empty close and
/// volume cells become `None`.
pub fn read_price_bars(path: &Path) -> Result<Vec<PriceBar>, LowvolError> {
    let mut rdr = open_reader(path)?;
    let mut bars = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(|e| csv_error(path, e))?;
        let date = parse_date(path, field(path, &record, 0, "date")?)?;
        bars.push(PriceBar {
            date,
            close: parse_optional(path, &record, 4, "close")?,
            volume: parse_optional(path, &record, 5, "volume")?,
        });
    }
    Ok(bars)
}

fn read_price_bars_if_present(path: &Path) -> Result<Vec<PriceBar>, LowvolError> {
    if path.exists() {
        read_price_bars(path)
    } else {
        debug!("no price file {}", path.display());
        Ok(Vec::new())
    }
}

/// First column of the equities file, header row excluded.
pub fn read_equities(path: &Path) -> Result<Vec<String>, LowvolError> {
    let mut rdr = open_reader(path)?;
    let mut codes = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(|e| csv_error(path, e))?;
        let code = field(path, &record, 0, "code")?.trim();
        if !code.is_empty() {
            codes.push(code.to_string());
        }
    }
    Ok(codes)
}

/// `code,date,amount` rows; same-day amounts are summed.
pub fn read_dividends(path: &Path) -> Result<HashMap<String, AsOfSeries>, LowvolError> {
    let mut rdr = open_reader(path)?;
    let mut dividends: HashMap<String, AsOfSeries> = HashMap::new();
    for result in rdr.records() {
        let record = result.map_err(|e| csv_error(path, e))?;
        let code = field(path, &record, 0, "code")?.trim();
        let date = parse_date(path, field(path, &record, 1, "date")?)?;
        let amount = parse_number(path, field(path, &record, 2, "amount")?, "amount")?;
        dividends
            .entry(code.to_string())
            .or_default()
            .accumulate(date, amount);
    }
    Ok(dividends)
}

/// `date,level` rows in increasing date order.
pub fn read_benchmark(path: &Path) -> Result<AsOfSeries, LowvolError> {
    let mut rdr = open_reader(path)?;
    let mut levels = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(|e| csv_error(path, e))?;
        let date = parse_date(path, field(path, &record, 0, "date")?)?;
        let Some(level) = parse_optional(path, &record, 1, "level")? else {
            continue;
        };
        levels.push((date, level));
    }
    AsOfSeries::from_sorted(&path.display().to_string(), levels)
}

/// `quarter_start,quarter_end,code,volume` rows.
pub fn read_liquidity(path: &Path) -> Result<LiquidityIndex, LowvolError> {
    let mut rdr = open_reader(path)?;
    let mut records = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(|e| csv_error(path, e))?;
        records.push(LiquidityRecord {
            quarter_start: parse_period(path, field(path, &record, 0, "quarter_start")?)?,
            quarter_end: parse_period(path, field(path, &record, 1, "quarter_end")?)?,
            code: field(path, &record, 2, "code")?.trim().to_string(),
            volume: field(path, &record, 3, "volume")?
                .trim()
                .parse()
                .map_err(|e| LowvolError::DataSource {
                    reason: format!("{}: invalid volume value: {}", path.display(), e),
                })?,
        });
    }
    Ok(records.into_iter().collect())
}

/// Quarterly median dollar volume of every price file in `prices_dir`.
/// Unreadable files are skipped with a warning; out-of-order files abort.
pub fn compute_liquidity_stats(prices_dir: &Path) -> Result<Vec<LiquidityRecord>, LowvolError> {
    let codes = list_codes(prices_dir)?;
    info!("computing liquidity statistics for {} securities", codes.len());
    let mut records = Vec::new();
    for code in codes {
        let path = price_path(prices_dir, &code);
        let bars = match read_price_bars(&path) {
            Ok(bars) => bars,
            Err(e) => {
                warn!("skipping {}: {e}", path.display());
                continue;
            }
        };
        let rows = quarterly_median_dollar_volume(&path.display().to_string(), &code, bars)?;
        debug!("{code}: {} quarters", rows.len());
        records.extend(rows);
    }
    Ok(records)
}

pub fn write_liquidity_stats(path: &Path, records: &[LiquidityRecord]) -> Result<(), LowvolError> {
    let mut wtr = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;
    wtr.write_record(["quarter_start", "quarter_end", "code", "volume"])
        .map_err(|e| csv_error(path, e))?;
    for r in records {
        wtr.write_record([
            r.quarter_start.to_string(),
            r.quarter_end.to_string(),
            r.code.clone(),
            r.volume.to_string(),
        ])
        .map_err(|e| csv_error(path, e))?;
    }
    wtr.flush()?;
    Ok(())
}

fn open_reader(path: &Path) -> Result<csv::Reader<fs::File>, LowvolError> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| csv_error(path, e))
}

fn csv_error(path: &Path, e: csv::Error) -> LowvolError {
    LowvolError::DataSource {
        reason: format!("{}: CSV error: {}", path.display(), e),
    }
}

fn field<'r>(
    path: &Path,
    record: &'r StringRecord,
    index: usize,
    name: &str,
) -> Result<&'r str, LowvolError> {
    record.get(index).ok_or_else(|| LowvolError::DataSource {
        reason: format!("{}: missing {} column", path.display(), name),
    })
}

fn parse_date(path: &Path, value: &str) -> Result<NaiveDate, LowvolError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|e| LowvolError::DataSource {
        reason: format!("{}: invalid date {:?}: {}", path.display(), value, e),
    })
}

fn parse_period(path: &Path, value: &str) -> Result<YearMonth, LowvolError> {
    value
        .trim()
        .parse()
        .map_err(|e| LowvolError::DataSource {
            reason: format!("{}: {}", path.display(), e),
        })
}

fn parse_number(path: &Path, value: &str, name: &str) -> Result<f64, LowvolError> {
    value.trim().parse().map_err(|e| LowvolError::DataSource {
        reason: format!("{}: invalid {} value: {}", path.display(), name, e),
    })
}

fn parse_optional(
    path: &Path,
    record: &StringRecord,
    index: usize,
    name: &str,
) -> Result<Option<f64>, LowvolError> {
    match record.get(index).map(str::trim) {
        None | Some("") | Some(MISSING) => Ok(None),
        Some(value) => parse_number(path, value, name).map(Some),
    }
}
