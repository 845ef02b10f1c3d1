//! Persistent key-value store port backing the memoizing cache.

use crate::domain::error::LowvolError;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, LowvolError>;
    fn put(&self, key: &str, value: &str) -> Result<(), LowvolError>;
}
