//! Volatility screen over a universe.
//!
//! Per-security volatilities are computed as a scatter/gather stage: one task
//! per security, at most `workers` running at once, each bounded by its own
//! timeout. A timed-out job is detached and its pool slot freed, so a hung
//! read delays the screen by at most one timeout per slot. Securities that
//! time out or lack data are dropped from the table; repository failures
//! abort the screen. The finished table is memoized on
//! `(as_of, lookback_months)` together with the coverage policy, then ranked
//! into low and high volatility cohorts.

use crate::domain::cache::{CacheKey, MemoizingCache};
use crate::domain::calendar::YearMonth;
use crate::domain::error::{LowvolError, ScreeningSkip};
use crate::domain::universe::SecurityUniverse;
use crate::domain::volatility::{CoveragePolicy, MonthWindow, compute_volatility};
use crate::ports::cache_port::KeyValueStore;
use crate::ports::data_port::PerformanceRepository;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const DEFAULT_WORKERS: usize = 6;
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Volatility per security code.
pub type VolatilityTable = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq)]
pub struct ScreeningConfig {
    pub workers: usize,
    pub task_timeout: Duration,
    pub coverage: CoveragePolicy,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            coverage: CoveragePolicy::default(),
        }
    }
}

/// Both cohorts in ascending volatility order. They overlap only when fewer
/// than twice `count` securities were ranked.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScreenResult {
    pub low: Vec<String>,
    pub high: Vec<String>,
}

/// Cache key for a volatility table. The coverage policy decides which
/// securities make it into the table, so it is part of the key.
pub fn volatility_cache_key(
    as_of: YearMonth,
    lookback_months: u32,
    coverage: &CoveragePolicy,
) -> CacheKey {
    CacheKey::new("volatility", 2)
        .param("as_of", as_of)
        .param("lookback_months", lookback_months)
        .param("min_coverage", coverage.min_coverage)
        .param("periods_per_month", coverage.periods_per_month)
}

enum TaskOutcome {
    Computed(f64),
    Skipped(ScreeningSkip),
    Failed(LowvolError),
}

pub struct Screening {
    performances: Arc<dyn PerformanceRepository>,
    cache: MemoizingCache<(YearMonth, u32), VolatilityTable>,
    config: ScreeningConfig,
}

impl Screening {
    pub fn new(
        performances: Arc<dyn PerformanceRepository>,
        store: Arc<dyn KeyValueStore>,
        config: ScreeningConfig,
    ) -> Self {
        let coverage = config.coverage;
        Self {
            performances,
            cache: MemoizingCache::new(store, move |(as_of, lookback): &(YearMonth, u32)| {
                volatility_cache_key(*as_of, *lookback, &coverage)
            }),
            config,
        }
    }

    pub fn config(&self) -> &ScreeningConfig {
        &self.config
    }

    /// Volatility table for every universe member with enough data over the
    /// `lookback_months` window ending with `as_of`.
    pub async fn volatilities(
        &self,
        universe: &dyn SecurityUniverse,
        as_of: YearMonth,
        lookback_months: u32,
    ) -> Result<VolatilityTable, LowvolError> {
        let window = MonthWindow::trailing(as_of, lookback_months).ok_or_else(|| {
            LowvolError::ConfigInvalid {
                section: "backtest".into(),
                key: "lookback_months".into(),
                reason: format!("{lookback_months} months before {as_of} is out of range"),
            }
        })?;
        info!(
            "considering volatility over [{}; {}]",
            window.start, window.end
        );
        let codes = universe.securities()?.to_vec();

        let table = self
            .cache
            .get_async(&(as_of, lookback_months), || {
                self.compute_table(codes, lookback_months, window)
            })
            .await?;
        info!("computed volatility for {} securities", table.len());
        Ok(table)
    }

    /// Rank the universe by volatility and return the `count` lowest and
    /// `count` highest.
    pub async fn compute_volatilities(
        &self,
        universe: &dyn SecurityUniverse,
        as_of: YearMonth,
        lookback_months: u32,
        count: usize,
    ) -> Result<ScreenResult, LowvolError> {
        let table = self.volatilities(universe, as_of, lookback_months).await?;
        let result = rank_by_volatility(universe.securities()?, &table, count);
        debug!("lowest volatility: {}", describe(&result.low, &table));
        debug!("highest volatility: {}", describe(&result.high, &table));
        Ok(result)
    }

    async fn compute_table(
        &self,
        codes: Vec<String>,
        lookback_months: u32,
        window: MonthWindow,
    ) -> Result<VolatilityTable, LowvolError> {
        let total = codes.len();
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = JoinSet::new();

        for code in codes {
            let semaphore = semaphore.clone();
            let performances = self.performances.clone();
            let policy = self.config.coverage;
            let timeout = self.config.task_timeout;

            tasks.spawn(async move {
                // Held by this task rather than the blocking job, so the slot
                // is released as soon as the wait below gives up.
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(e) => {
                        let err = LowvolError::Worker {
                            code: code.clone(),
                            reason: e.to_string(),
                        };
                        return (code, TaskOutcome::Failed(err));
                    }
                };

                let task_code = code.clone();
                let job = tokio::task::spawn_blocking(move || {
                    let returns = performances.returns(&task_code)?;
                    Ok::<_, LowvolError>(compute_volatility(
                        &task_code,
                        &returns,
                        lookback_months,
                        window,
                        &policy,
                    ))
                });

                let outcome = match tokio::time::timeout(timeout, job).await {
                    Err(_) => TaskOutcome::Skipped(ScreeningSkip::TimeoutExceeded {
                        code: code.clone(),
                        timeout,
                    }),
                    Ok(Err(join_err)) => TaskOutcome::Failed(LowvolError::Worker {
                        code: code.clone(),
                        reason: join_err.to_string(),
                    }),
                    Ok(Ok(Err(err))) => TaskOutcome::Failed(err),
                    Ok(Ok(Ok(Ok(vol)))) => TaskOutcome::Computed(vol),
                    Ok(Ok(Ok(Err(skip)))) => TaskOutcome::Skipped(skip),
                };
                (code, outcome)
            });
        }

        let mut table = VolatilityTable::new();
        while let Some(joined) = tasks.join_next().await {
            let (code, outcome) = joined.map_err(|e| LowvolError::Worker {
                code: "<unknown>".into(),
                reason: e.to_string(),
            })?;
            match outcome {
                TaskOutcome::Computed(vol) => {
                    table.insert(code, vol);
                }
                TaskOutcome::Skipped(skip @ ScreeningSkip::TimeoutExceeded { .. }) => {
                    warn!("{skip}");
                }
                TaskOutcome::Skipped(skip) => {
                    debug!("{skip}");
                }
                TaskOutcome::Failed(err) => return Err(err),
            }
        }
        debug!("{} of {} securities have a volatility", table.len(), total);
        Ok(table)
    }
}

/// Stable ascending sort by volatility. Ties keep universe order; table
/// entries absent from `universe_order` rank after it in code order.
pub fn rank_by_volatility(
    universe_order: &[String],
    table: &VolatilityTable,
    count: usize,
) -> ScreenResult {
    let listed: HashSet<&str> = universe_order.iter().map(String::as_str).collect();
    let mut ranked: Vec<(&str, f64)> = universe_order
        .iter()
        .filter_map(|code| table.get(code).map(|v| (code.as_str(), *v)))
        .chain(
            table
                .iter()
                .filter(|(code, _)| !listed.contains(code.as_str()))
                .map(|(code, v)| (code.as_str(), *v)),
        )
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

    let take = count.min(ranked.len());
    ScreenResult {
        low: ranked[..take].iter().map(|(c, _)| c.to_string()).collect(),
        high: ranked[ranked.len() - take..]
            .iter()
            .map(|(c, _)| c.to_string())
            .collect(),
    }
}

/// Run a volatility screen and return `(low, high)` cohorts.
pub async fn screen_volatility(
    screening: &Screening,
    as_of: YearMonth,
    lookback_months: u32,
    selection_size: usize,
    universe: &dyn SecurityUniverse,
) -> Result<(Vec<String>, Vec<String>), LowvolError> {
    let result = screening
        .compute_volatilities(universe, as_of, lookback_months, selection_size)
        .await?;
    Ok((result.low, result.high))
}

fn describe(codes: &[String], table: &VolatilityTable) -> String {
    codes
        .iter()
        .map(|c| match table.get(c) {
            Some(v) => format!("{c} {:.2}%", v * 100.0),
            None => c.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
