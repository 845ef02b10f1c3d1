//! Daily price bar as read from a security's price file.

use chrono::NaiveDate;

/// Close and volume for one trading day. Either may be missing in the
/// source (`#N/A`).
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

impl PriceBar {
    pub fn new(date: NaiveDate, close: f64, volume: f64) -> Self {
        Self {
            date,
            close: Some(close),
            volume: Some(volume),
        }
    }

    /// close * volume, when both are present.
    pub fn dollar_volume(&self) -> Option<f64> {
        Some(self.close? * self.volume?)
    }
}
