//! Configuration validation.
//!
//! Validates every config field before a run touches any data.

use crate::domain::backtest::DEFAULT_INITIAL_CASH;
use crate::domain::calendar::YearMonth;
use crate::domain::error::LowvolError;
use crate::ports::config_port::ConfigPort;

/// `[data]` keys that must name a file or directory.
pub const REQUIRED_DATA_KEYS: [&str; 5] =
    ["prices_dir", "dividends", "benchmark", "liquidity", "equities"];

pub fn validate_data_config(config: &dyn ConfigPort) -> Result<(), LowvolError> {
    for key in REQUIRED_DATA_KEYS {
        config.require_string("data", key)?;
    }
    Ok(())
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), LowvolError> {
    validate_start_period(config)?;
    validate_initial_cash(config)?;
    validate_positive_int(config, "backtest", "period_count")?;
    validate_positive_int(config, "backtest", "step_months")?;
    validate_positive_int(config, "backtest", "lookback_months")?;
    validate_positive_int(config, "backtest", "selection_size")?;
    validate_liquidity_threshold(config)?;
    Ok(())
}

pub fn validate_screening_config(config: &dyn ConfigPort) -> Result<(), LowvolError> {
    validate_positive_int(config, "screening", "workers")?;
    validate_positive_int(config, "screening", "task_timeout_secs")?;
    validate_positive_int(config, "screening", "periods_per_month")?;
    validate_coverage(config)?;
    validate_quarter_lag(config)?;
    Ok(())
}

/// Every section a backtest reads.
pub fn validate_all(config: &dyn ConfigPort) -> Result<(), LowvolError> {
    validate_data_config(config)?;
    validate_backtest_config(config)?;
    validate_screening_config(config)?;
    Ok(())
}

fn validate_start_period(config: &dyn ConfigPort) -> Result<(), LowvolError> {
    let value = config.require_string("backtest", "start_period")?;
    value
        .parse::<YearMonth>()
        .map_err(|e| LowvolError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "start_period".to_string(),
            reason: e.to_string(),
        })?;
    Ok(())
}

fn validate_initial_cash(config: &dyn ConfigPort) -> Result<(), LowvolError> {
    let value = config.get_double("backtest", "initial_cash", DEFAULT_INITIAL_CASH);
    if value <= 0.0 {
        return Err(LowvolError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "initial_cash".to_string(),
            reason: "initial_cash must be positive".to_string(),
        });
    }
    Ok(())
}

fn validate_liquidity_threshold(config: &dyn ConfigPort) -> Result<(), LowvolError> {
    let value = config.get_double("backtest", "liquidity_threshold", 0.0);
    if value < 0.0 {
        return Err(LowvolError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "liquidity_threshold".to_string(),
            reason: "liquidity_threshold must be non-negative".to_string(),
        });
    }
    Ok(())
}

/// A key that is either absent (default applies) or a positive integer.
fn validate_positive_int(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<(), LowvolError> {
    if config.get_string(section, key).is_none() {
        return Ok(());
    }
    let value = config.get_int(section, key, 0);
    if value < 1 || value > i64::from(u32::MAX) {
        return Err(LowvolError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: format!("{key} must be a positive integer"),
        });
    }
    Ok(())
}

fn validate_coverage(config: &dyn ConfigPort) -> Result<(), LowvolError> {
    let value = config.get_double("screening", "min_coverage", 0.8);
    if value <= 0.0 || value > 1.0 {
        return Err(LowvolError::ConfigInvalid {
            section: "screening".to_string(),
            key: "min_coverage".to_string(),
            reason: "min_coverage must be in (0, 1]".to_string(),
        });
    }
    Ok(())
}

fn validate_quarter_lag(config: &dyn ConfigPort) -> Result<(), LowvolError> {
    let value = config.get_int("universe", "quarter_lag_days", 63);
    if !(0..=366).contains(&value) {
        return Err(LowvolError::ConfigInvalid {
            section: "universe".to_string(),
            key: "quarter_lag_days".to_string(),
            reason: "quarter_lag_days must be between 0 and 366".to_string(),
        });
    }
    Ok(())
}
