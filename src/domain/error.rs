//! Domain error types.

use chrono::NaiveDate;
use std::time::Duration;

/// An as-of lookup found no stored date at or before the requested one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("no observation at or before {date} (earliest: {})", fmt_earliest(.earliest))]
pub struct NoDataError {
    pub date: NaiveDate,
    pub earliest: Option<NaiveDate>,
}

fn fmt_earliest(earliest: &Option<NaiveDate>) -> String {
    match earliest {
        Some(d) => d.to_string(),
        None => "empty series".to_string(),
    }
}

/// Per-security exclusions raised while screening. These reduce the
/// candidate set and never abort a screen.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScreeningSkip {
    #[error("insufficient data for {code}: {observations} observations, need {required}")]
    InsufficientData {
        code: String,
        observations: usize,
        required: usize,
    },

    #[error("volatility task for {code} exceeded {timeout:?}")]
    TimeoutExceeded { code: String, timeout: Duration },
}

/// Top-level error type for lowvol.
#[derive(Debug, thiserror::Error)]
pub enum LowvolError {
    #[error("data source error: {reason}")]
    DataSource { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("no data in {series} at or before {date}")]
    NoData { series: String, date: NaiveDate },

    #[error("no price for {code} on {date} (period starting {period_start})")]
    PriceUnavailable {
        period_start: NaiveDate,
        code: String,
        date: NaiveDate,
    },

    #[error("universe has not been initialized")]
    NotInitialized,

    #[error("{source_name}: dates out of order ({found} after {previous})")]
    InconsistentOrdering {
        source_name: String,
        previous: NaiveDate,
        found: NaiveDate,
    },

    #[error("cache entry {key}: {reason}")]
    Cache { key: String, reason: String },

    #[error("worker for {code} failed: {reason}")]
    Worker { code: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LowvolError {
    /// Attach a series label to an as-of lookup failure.
    pub fn no_data(series: impl Into<String>, err: NoDataError) -> Self {
        LowvolError::NoData {
            series: series.into(),
            date: err.date,
        }
    }
}

impl From<&LowvolError> for std::process::ExitCode {
    fn from(err: &LowvolError) -> Self {
        let code: u8 = match err {
            LowvolError::Io(_) => 1,
            LowvolError::ConfigParse { .. }
            | LowvolError::ConfigMissing { .. }
            | LowvolError::ConfigInvalid { .. } => 2,
            LowvolError::DataSource { .. }
            | LowvolError::DatabaseQuery { .. }
            | LowvolError::Cache { .. } => 3,
            LowvolError::Worker { .. } => 4,
            LowvolError::NoData { .. } | LowvolError::PriceUnavailable { .. } => 5,
            LowvolError::InconsistentOrdering { .. } => 6,
            LowvolError::NotInitialized => 7,
        };
        std::process::ExitCode::from(code)
    }
}
