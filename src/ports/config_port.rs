//! Configuration access port.

use crate::domain::error::LowvolError;

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
    fn get_double(&self, section: &str, key: &str, default: f64) -> f64;
    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;

    /// A non-empty string value, or `ConfigMissing`.
    fn require_string(&self, section: &str, key: &str) -> Result<String, LowvolError> {
        self.get_string(section, key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LowvolError::ConfigMissing {
                section: section.to_string(),
                key: key.to_string(),
            })
    }
}
